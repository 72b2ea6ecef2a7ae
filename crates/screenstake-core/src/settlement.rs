//! Settlement coordinator.
//!
//! Drives the charge-and-notify workflow for a violated stake and enforces
//! the engine's core correctness property: at most one successful charge per
//! stake per calendar day, no matter how many times evaluation runs.
//!
//! ## Workflow per violation
//!
//! ```text
//! guard: succeeded charge today?  -> AlreadySettled
//! guard: settlement in flight?    -> InFlight
//! no default payment method       -> notify, NoPaymentMethod
//! provider charge (with timeout):
//!   succeeded          -> record + notify + receipt, Charged
//!   step-up challenge  -> store PendingAuthentication + notify, AuthenticationPending
//!   failure / timeout  -> record + notify, Failed (no same-day retry)
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CoreError, PaymentError};
use crate::events::Notification;
use crate::history::{ChargeRecord, ChargeStatus, PendingAuthentication, Violation};
use crate::ledger::local_day;
use crate::payments::PaymentMethodRegistry;
use crate::providers::{ChargeOutcome, ChargeProvider, ChargeRequest, DisputeGateway, Notifier};
use crate::stake::{format_hm, Stake};
use crate::storage::EngineStore;

/// Terminal result of one settlement pass for one stake.
#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    /// A succeeded charge already exists for this stake today.
    AlreadySettled,
    /// Another settlement for this stake is currently in flight.
    InFlight,
    /// No payment method on file; the user was notified, nothing recorded.
    NoPaymentMethod,
    /// The charge went through.
    Charged(ChargeRecord),
    /// A step-up authentication challenge is pending user action.
    AuthenticationPending { client_secret: String },
    /// The charge failed; no retry until the next daily cycle.
    Failed(ChargeRecord),
}

/// Orchestrates charge attempts and records their outcomes.
pub struct SettlementCoordinator {
    charge_provider: Arc<dyn ChargeProvider>,
    gateway: Arc<dyn DisputeGateway>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn EngineStore>,
    payment_methods: Arc<PaymentMethodRegistry>,
    user_id: String,
    charge_timeout: Duration,
    in_flight: Mutex<HashSet<Uuid>>,
}

impl SettlementCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        charge_provider: Arc<dyn ChargeProvider>,
        gateway: Arc<dyn DisputeGateway>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn EngineStore>,
        payment_methods: Arc<PaymentMethodRegistry>,
        user_id: String,
        charge_timeout: Duration,
    ) -> Self {
        Self {
            charge_provider,
            gateway,
            notifier,
            store,
            payment_methods,
            user_id,
            charge_timeout,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Whether a succeeded charge already exists for the stake on the civil
    /// day of `now`.
    pub fn has_charged_today(&self, stake_id: Uuid, now: DateTime<Utc>) -> Result<bool, CoreError> {
        let today = local_day(now);
        let charges = self.store.charges_for_stake(stake_id)?;
        Ok(charges.iter().any(|c| {
            c.status == ChargeStatus::Succeeded && local_day(c.charged_at) == today
        }))
    }

    /// Run the settlement workflow for one violated stake.
    ///
    /// Serialized per stake id: a concurrent second call for the same stake
    /// observes [`SettlementOutcome::InFlight`] and does nothing.
    pub async fn settle(
        &self,
        stake: &Stake,
        violation: &Violation,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, CoreError> {
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(stake.id) {
                return Ok(SettlementOutcome::InFlight);
            }
        }
        let result = self.settle_inner(stake, violation, now).await;
        self.in_flight.lock().await.remove(&stake.id);
        result
    }

    async fn settle_inner(
        &self,
        stake: &Stake,
        violation: &Violation,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, CoreError> {
        if self.has_charged_today(stake.id, now)? {
            return Ok(SettlementOutcome::AlreadySettled);
        }

        self.store.append_violation(violation)?;

        let method = match self.payment_methods.default_method() {
            Some(method) => method,
            None => {
                warn!(stake = %stake.id, "violation without a payment method on file");
                self.notifier
                    .notify(&Notification::PaymentMethodRequired)
                    .await;
                return Ok(SettlementOutcome::NoPaymentMethod);
            }
        };

        let request = ChargeRequest {
            user_id: self.user_id.clone(),
            payment_method_id: method.id,
            amount: stake.amount,
            stake_id: stake.id.to_string(),
            metadata: HashMap::from([
                ("type".to_string(), "stake_limit_exceeded".to_string()),
                ("timestamp".to_string(), now.to_rfc3339()),
            ]),
        };

        let outcome =
            match tokio::time::timeout(self.charge_timeout, self.charge_provider.charge(&request))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(PaymentError::Timeout {
                    timeout_secs: self.charge_timeout.as_secs(),
                }),
            };

        match outcome {
            Ok(ChargeOutcome::Succeeded {
                charge_id,
                receipt_url,
            }) => {
                let record = ChargeRecord {
                    id: charge_id,
                    stake_id: stake.id,
                    amount: stake.amount,
                    charged_at: now,
                    reason: format!(
                        "Daily limit exceeded by {}",
                        format_hm(violation.exceeded_by_secs)
                    ),
                    status: ChargeStatus::Succeeded,
                    receipt_url,
                };
                self.store.append_charge(&record)?;
                info!(stake = %stake.id, charge = %record.id, amount = record.amount, "charge succeeded");
                self.notifier
                    .notify(&Notification::ChargeProcessed {
                        charge_id: record.id.clone(),
                        amount: record.amount,
                    })
                    .await;
                if let Err(e) = self.gateway.send_receipt(&record).await {
                    warn!(charge = %record.id, error = %e, "receipt dispatch failed");
                }
                Ok(SettlementOutcome::Charged(record))
            }
            Ok(ChargeOutcome::AuthenticationRequired {
                client_secret,
                payment_intent_id: _,
            }) => {
                self.store.put_pending_auth(&PendingAuthentication {
                    stake_id: stake.id,
                    client_secret: client_secret.clone(),
                    amount: stake.amount,
                    created_at: now,
                })?;
                info!(stake = %stake.id, "charge requires step-up authentication");
                self.notifier
                    .notify(&Notification::AuthenticationRequired { stake_id: stake.id })
                    .await;
                Ok(SettlementOutcome::AuthenticationPending { client_secret })
            }
            Err(e) => {
                let record = ChargeRecord {
                    id: Uuid::new_v4().to_string(),
                    stake_id: stake.id,
                    amount: stake.amount,
                    charged_at: now,
                    reason: format!("Charge failed: {e}"),
                    status: ChargeStatus::Failed,
                    receipt_url: None,
                };
                self.store.append_charge(&record)?;
                warn!(stake = %stake.id, error = %e, "charge failed");
                self.notifier
                    .notify(&Notification::ChargeFailed {
                        reason: e.to_string(),
                    })
                    .await;
                Ok(SettlementOutcome::Failed(record))
            }
        }
    }

    /// Resolve a previously stored step-up challenge.
    ///
    /// Invoked by the host after the user completes (or abandons) the
    /// authentication flow. On success, writes the succeeded charge record
    /// and notifies; on abandonment the pending authentication is simply
    /// dropped -- no automatic retry.
    pub async fn resolve_authentication(
        &self,
        stake_id: Uuid,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<ChargeRecord>, CoreError> {
        let pending = match self.store.take_pending_auth(stake_id)? {
            Some(pending) => pending,
            None => return Ok(None),
        };

        if !success {
            info!(stake = %stake_id, "step-up authentication abandoned");
            return Ok(None);
        }

        if self.has_charged_today(stake_id, now)? {
            // The charge landed through another path while the challenge
            // was pending.
            return Ok(None);
        }

        let record = ChargeRecord {
            id: Uuid::new_v4().to_string(),
            stake_id,
            amount: pending.amount,
            charged_at: now,
            reason: "Charge completed after authentication".to_string(),
            status: ChargeStatus::Succeeded,
            receipt_url: None,
        };
        self.store.append_charge(&record)?;
        info!(stake = %stake_id, charge = %record.id, "step-up authentication completed");
        self.notifier
            .notify(&Notification::ChargeProcessed {
                charge_id: record.id.clone(),
                amount: record.amount,
            })
            .await;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct ScriptedCharger {
        outcomes: StdMutex<Vec<Result<ChargeOutcome, PaymentError>>>,
        calls: StdMutex<usize>,
    }

    impl ScriptedCharger {
        fn new(outcomes: Vec<Result<ChargeOutcome, PaymentError>>) -> Self {
            let mut reversed = outcomes;
            reversed.reverse();
            Self {
                outcomes: StdMutex::new(reversed),
                calls: StdMutex::new(0),
            }
        }

        fn call_count(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ChargeProvider for ScriptedCharger {
        async fn charge(&self, _req: &ChargeRequest) -> Result<ChargeOutcome, PaymentError> {
            *self.calls.lock().unwrap() += 1;
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(PaymentError::Backend { status: 500 }))
        }
    }

    /// Charger that never completes within any reasonable timeout.
    struct HangingCharger;

    #[async_trait]
    impl ChargeProvider for HangingCharger {
        async fn charge(&self, _req: &ChargeRequest) -> Result<ChargeOutcome, PaymentError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(PaymentError::Backend { status: 500 })
        }
    }

    #[derive(Default)]
    struct RecordingGateway {
        receipts: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl DisputeGateway for RecordingGateway {
        async fn submit_dispute(
            &self,
            _charge_id: &str,
            _reason: &str,
            _at: DateTime<Utc>,
        ) -> Result<(), crate::error::DisputeError> {
            Ok(())
        }

        async fn send_receipt(&self, record: &ChargeRecord) -> Result<(), PaymentError> {
            self.receipts.lock().unwrap().push(record.id.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: StdMutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        fn sent(&self) -> Vec<Notification> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: &Notification) {
            self.sent.lock().unwrap().push(notification.clone());
        }
    }

    struct Harness {
        coordinator: SettlementCoordinator,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        gateway: Arc<RecordingGateway>,
        charger: Arc<ScriptedCharger>,
    }

    fn harness(outcomes: Vec<Result<ChargeOutcome, PaymentError>>, with_method: bool) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let gateway = Arc::new(RecordingGateway::default());
        let charger = Arc::new(ScriptedCharger::new(outcomes));
        let methods = Arc::new(PaymentMethodRegistry::new());
        if with_method {
            methods.set_methods(vec![crate::payments::SavedPaymentMethod {
                id: "pm_1".to_string(),
                kind: "card".to_string(),
                last4: Some("4242".to_string()),
                brand: Some("visa".to_string()),
                is_default: true,
                created_at: Utc::now(),
            }]);
        }
        let coordinator = SettlementCoordinator::new(
            charger.clone(),
            gateway.clone(),
            notifier.clone(),
            store.clone(),
            methods,
            "user_1".to_string(),
            Duration::from_secs(5),
        );
        Harness {
            coordinator,
            store,
            notifier,
            gateway,
            charger,
        }
    }

    fn violated_stake(now: DateTime<Utc>) -> (Stake, Violation) {
        let stake = Stake::new(vec!["a".into()], 3600, 10.0, 7, now);
        let violation = Violation {
            stake_id: stake.id,
            occurred_at: now,
            exceeded_by_secs: 400,
            total_usage_secs: 4000,
            daily_limit_secs: 3600,
        };
        (stake, violation)
    }

    #[tokio::test]
    async fn success_records_notifies_and_sends_receipt() {
        let now = Utc::now();
        let h = harness(
            vec![Ok(ChargeOutcome::Succeeded {
                charge_id: "ch_1".to_string(),
                receipt_url: Some("https://r".to_string()),
            })],
            true,
        );
        let (stake, violation) = violated_stake(now);

        let outcome = h.coordinator.settle(&stake, &violation, now).await.unwrap();
        let record = match outcome {
            SettlementOutcome::Charged(record) => record,
            other => panic!("expected Charged, got {other:?}"),
        };
        assert_eq!(record.id, "ch_1");
        assert_eq!(record.status, ChargeStatus::Succeeded);
        assert!(record.reason.contains("6m"));

        assert_eq!(h.store.violation_count(), 1);
        assert_eq!(h.store.charges_for_stake(stake.id).unwrap().len(), 1);
        assert_eq!(h.gateway.receipts.lock().unwrap().as_slice(), ["ch_1"]);
        assert!(matches!(
            h.notifier.sent()[0],
            Notification::ChargeProcessed { .. }
        ));
    }

    #[tokio::test]
    async fn second_settle_same_day_is_already_settled() {
        let now = Utc::now();
        let h = harness(
            vec![Ok(ChargeOutcome::Succeeded {
                charge_id: "ch_1".to_string(),
                receipt_url: None,
            })],
            true,
        );
        let (stake, violation) = violated_stake(now);

        h.coordinator.settle(&stake, &violation, now).await.unwrap();
        let outcome = h.coordinator.settle(&stake, &violation, now).await.unwrap();
        assert!(matches!(outcome, SettlementOutcome::AlreadySettled));
        // Exactly one provider call, one charge, one violation.
        assert_eq!(h.charger.call_count(), 1);
        assert_eq!(h.store.charges_for_stake(stake.id).unwrap().len(), 1);
        assert_eq!(h.store.violation_count(), 1);
    }

    #[tokio::test]
    async fn step_up_creates_pending_auth_without_charge_record() {
        let now = Utc::now();
        let h = harness(
            vec![Ok(ChargeOutcome::AuthenticationRequired {
                client_secret: "pi_secret".to_string(),
                payment_intent_id: "pi_1".to_string(),
            })],
            true,
        );
        let (stake, violation) = violated_stake(now);

        let outcome = h.coordinator.settle(&stake, &violation, now).await.unwrap();
        match outcome {
            SettlementOutcome::AuthenticationPending { client_secret } => {
                assert_eq!(client_secret, "pi_secret");
            }
            other => panic!("expected AuthenticationPending, got {other:?}"),
        }
        assert!(h.store.has_pending_auth(stake.id));
        assert!(h.store.charges_for_stake(stake.id).unwrap().is_empty());
        assert!(matches!(
            h.notifier.sent()[0],
            Notification::AuthenticationRequired { .. }
        ));
    }

    #[tokio::test]
    async fn failure_records_failed_charge_and_notifies() {
        let now = Utc::now();
        let h = harness(
            vec![Err(PaymentError::Declined {
                reason: "insufficient_funds".to_string(),
            })],
            true,
        );
        let (stake, violation) = violated_stake(now);

        let outcome = h.coordinator.settle(&stake, &violation, now).await.unwrap();
        let record = match outcome {
            SettlementOutcome::Failed(record) => record,
            other => panic!("expected Failed, got {other:?}"),
        };
        assert_eq!(record.status, ChargeStatus::Failed);
        assert!(record.reason.contains("insufficient_funds"));
        assert!(matches!(
            h.notifier.sent()[0],
            Notification::ChargeFailed { .. }
        ));
    }

    #[tokio::test]
    async fn missing_payment_method_notifies_without_provider_call() {
        let now = Utc::now();
        let h = harness(vec![], false);
        let (stake, violation) = violated_stake(now);

        let outcome = h.coordinator.settle(&stake, &violation, now).await.unwrap();
        assert!(matches!(outcome, SettlementOutcome::NoPaymentMethod));
        assert_eq!(h.charger.call_count(), 0);
        assert!(h.store.charges_for_stake(stake.id).unwrap().is_empty());
        // Violation is still recorded for the audit trail.
        assert_eq!(h.store.violation_count(), 1);
        assert_eq!(h.notifier.sent(), vec![Notification::PaymentMethodRequired]);
    }

    #[tokio::test]
    async fn provider_timeout_is_a_failed_charge() {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let methods = Arc::new(PaymentMethodRegistry::new());
        methods.set_methods(vec![crate::payments::SavedPaymentMethod {
            id: "pm_1".to_string(),
            kind: "card".to_string(),
            last4: None,
            brand: None,
            is_default: true,
            created_at: Utc::now(),
        }]);
        let coordinator = SettlementCoordinator::new(
            Arc::new(HangingCharger),
            Arc::new(RecordingGateway::default()),
            notifier.clone(),
            store.clone(),
            methods,
            "user_1".to_string(),
            Duration::from_millis(50),
        );
        let (stake, violation) = violated_stake(now);

        let outcome = coordinator.settle(&stake, &violation, now).await.unwrap();
        let record = match outcome {
            SettlementOutcome::Failed(record) => record,
            other => panic!("expected Failed, got {other:?}"),
        };
        assert!(record.reason.contains("timed out"));
    }

    #[tokio::test]
    async fn resolve_authentication_success_writes_succeeded_record() {
        let now = Utc::now();
        let h = harness(
            vec![Ok(ChargeOutcome::AuthenticationRequired {
                client_secret: "pi_secret".to_string(),
                payment_intent_id: "pi_1".to_string(),
            })],
            true,
        );
        let (stake, violation) = violated_stake(now);
        h.coordinator.settle(&stake, &violation, now).await.unwrap();

        let record = h
            .coordinator
            .resolve_authentication(stake.id, true, now)
            .await
            .unwrap()
            .expect("expected a charge record");
        assert_eq!(record.status, ChargeStatus::Succeeded);
        assert_eq!(record.amount, stake.amount);
        assert!(!h.store.has_pending_auth(stake.id));

        // Resolving again is a no-op.
        assert!(h
            .coordinator
            .resolve_authentication(stake.id, true, now)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn resolve_authentication_abandonment_drops_pending() {
        let now = Utc::now();
        let h = harness(
            vec![Ok(ChargeOutcome::AuthenticationRequired {
                client_secret: "pi_secret".to_string(),
                payment_intent_id: "pi_1".to_string(),
            })],
            true,
        );
        let (stake, violation) = violated_stake(now);
        h.coordinator.settle(&stake, &violation, now).await.unwrap();

        let record = h
            .coordinator
            .resolve_authentication(stake.id, false, now)
            .await
            .unwrap();
        assert!(record.is_none());
        assert!(!h.store.has_pending_auth(stake.id));
        assert!(h.store.charges_for_stake(stake.id).unwrap().is_empty());
    }
}
