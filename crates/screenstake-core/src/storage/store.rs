//! The engine's persistence seam.
//!
//! Everything the engine needs to survive a process restart goes through
//! [`EngineStore`]: the stake collection, the day's usage ledger, the charge
//! history, violations, and pending authentications. The production
//! implementation is [`Database`](super::Database); tests use
//! [`MemoryStore`].

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::history::{ChargeRecord, ChargeStatus, PendingAuthentication, Violation};
use crate::ledger::UsageLedger;
use crate::stake::{Stake, StakeStatus};

/// Durable state the engine reads on start and writes after every mutation.
pub trait EngineStore: Send + Sync {
    // ── Stakes ───────────────────────────────────────────────────────

    fn load_stakes(&self) -> Result<Vec<Stake>, StoreError>;

    fn upsert_stake(&self, stake: &Stake) -> Result<(), StoreError>;

    /// Bulk upsert after a tick touched several stakes.
    fn upsert_stakes(&self, stakes: &[Stake]) -> Result<(), StoreError> {
        for stake in stakes {
            self.upsert_stake(stake)?;
        }
        Ok(())
    }

    /// Remove completed/failed stakes whose period ended before `cutoff`.
    /// Returns the number pruned.
    fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    // ── Ledger snapshot ──────────────────────────────────────────────

    fn load_ledger(&self) -> Result<Option<UsageLedger>, StoreError>;

    fn save_ledger(&self, ledger: &UsageLedger) -> Result<(), StoreError>;

    // ── Charge history ───────────────────────────────────────────────

    fn append_charge(&self, record: &ChargeRecord) -> Result<(), StoreError>;

    /// Update the status of an existing charge record.
    fn update_charge_status(&self, charge_id: &str, status: ChargeStatus)
        -> Result<(), StoreError>;

    fn charge(&self, charge_id: &str) -> Result<Option<ChargeRecord>, StoreError>;

    fn charges_for_stake(&self, stake_id: Uuid) -> Result<Vec<ChargeRecord>, StoreError>;

    fn charge_history(&self) -> Result<Vec<ChargeRecord>, StoreError>;

    // ── Violations (append-only audit) ───────────────────────────────

    fn append_violation(&self, violation: &Violation) -> Result<(), StoreError>;

    // ── Pending authentications ──────────────────────────────────────

    fn put_pending_auth(&self, pending: &PendingAuthentication) -> Result<(), StoreError>;

    /// Remove and return the pending authentication for a stake, if any.
    fn take_pending_auth(
        &self,
        stake_id: Uuid,
    ) -> Result<Option<PendingAuthentication>, StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    stakes: HashMap<Uuid, Stake>,
    ledger: Option<UsageLedger>,
    charges: Vec<ChargeRecord>,
    violations: Vec<Violation>,
    pending_auth: HashMap<Uuid, PendingAuthentication>,
}

/// In-memory store for tests and ephemeral hosts.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of violations recorded (test helper).
    pub fn violation_count(&self) -> usize {
        self.inner.lock().expect("store poisoned").violations.len()
    }

    /// Snapshot of recorded violations (test helper).
    pub fn violations(&self) -> Vec<Violation> {
        self.inner
            .lock()
            .expect("store poisoned")
            .violations
            .clone()
    }

    /// Whether a pending authentication exists for the stake (test helper).
    pub fn has_pending_auth(&self, stake_id: Uuid) -> bool {
        self.inner
            .lock()
            .expect("store poisoned")
            .pending_auth
            .contains_key(&stake_id)
    }
}

impl EngineStore for MemoryStore {
    fn load_stakes(&self) -> Result<Vec<Stake>, StoreError> {
        let inner = self.inner.lock().expect("store poisoned");
        let mut stakes: Vec<_> = inner.stakes.values().cloned().collect();
        stakes.sort_by_key(|s| s.start_at);
        Ok(stakes)
    }

    fn upsert_stake(&self, stake: &Stake) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("store poisoned")
            .stakes
            .insert(stake.id, stake.clone());
        Ok(())
    }

    fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().expect("store poisoned");
        let before = inner.stakes.len();
        inner.stakes.retain(|_, s| {
            !(matches!(s.status, StakeStatus::Completed | StakeStatus::Failed)
                && s.end_at < cutoff)
        });
        Ok(before - inner.stakes.len())
    }

    fn load_ledger(&self) -> Result<Option<UsageLedger>, StoreError> {
        Ok(self.inner.lock().expect("store poisoned").ledger.clone())
    }

    fn save_ledger(&self, ledger: &UsageLedger) -> Result<(), StoreError> {
        self.inner.lock().expect("store poisoned").ledger = Some(ledger.clone());
        Ok(())
    }

    fn append_charge(&self, record: &ChargeRecord) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("store poisoned")
            .charges
            .push(record.clone());
        Ok(())
    }

    fn update_charge_status(
        &self,
        charge_id: &str,
        status: ChargeStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store poisoned");
        match inner.charges.iter_mut().find(|c| c.id == charge_id) {
            Some(record) => {
                record.status = status;
                Ok(())
            }
            None => Err(StoreError::QueryFailed(format!(
                "no charge with id {charge_id}"
            ))),
        }
    }

    fn charge(&self, charge_id: &str) -> Result<Option<ChargeRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("store poisoned")
            .charges
            .iter()
            .find(|c| c.id == charge_id)
            .cloned())
    }

    fn charges_for_stake(&self, stake_id: Uuid) -> Result<Vec<ChargeRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("store poisoned")
            .charges
            .iter()
            .filter(|c| c.stake_id == stake_id)
            .cloned()
            .collect())
    }

    fn charge_history(&self) -> Result<Vec<ChargeRecord>, StoreError> {
        Ok(self.inner.lock().expect("store poisoned").charges.clone())
    }

    fn append_violation(&self, violation: &Violation) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("store poisoned")
            .violations
            .push(violation.clone());
        Ok(())
    }

    fn put_pending_auth(&self, pending: &PendingAuthentication) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("store poisoned")
            .pending_auth
            .insert(pending.stake_id, pending.clone());
        Ok(())
    }

    fn take_pending_auth(
        &self,
        stake_id: Uuid,
    ) -> Result<Option<PendingAuthentication>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("store poisoned")
            .pending_auth
            .remove(&stake_id))
    }
}
