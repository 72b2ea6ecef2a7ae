//! Usage accountant.
//!
//! Owns the day's [`UsageLedger`]: detects day rollover, pulls samples from
//! the usage provider for the full app catalog, merges them by max, and
//! persists the ledger after every mutation so a mid-day restart loses
//! nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::catalog::TrackedApp;
use crate::error::CoreError;
use crate::ledger::UsageLedger;
use crate::providers::UsageProvider;
use crate::storage::EngineStore;

/// Summary of one sampling pass.
#[derive(Debug, Clone, Copy)]
pub struct SampleSummary {
    /// Apps reported by the provider this pass.
    pub apps_reported: usize,
    /// Whether any ledger entry advanced.
    pub changed: bool,
    /// Total seconds across all apps after the merge.
    pub total_secs: u64,
}

/// Maintains the per-app usage ledger and detects day rollover.
pub struct UsageAccountant {
    provider: Arc<dyn UsageProvider>,
    store: Arc<dyn EngineStore>,
    catalog: Vec<TrackedApp>,
    ledger: UsageLedger,
}

impl UsageAccountant {
    /// Construct the accountant, restoring a same-day ledger snapshot from
    /// the store if one exists. A snapshot from a previous day is discarded.
    pub fn new(
        provider: Arc<dyn UsageProvider>,
        store: Arc<dyn EngineStore>,
        catalog: Vec<TrackedApp>,
        now: DateTime<Utc>,
    ) -> Self {
        let ledger = match store.load_ledger() {
            Ok(Some(saved)) if !saved.needs_rollover(now) => {
                debug!(day = %saved.day, entries = saved.usage.len(), "restored ledger snapshot");
                saved
            }
            Ok(_) => UsageLedger::new(now),
            Err(e) => {
                warn!(error = %e, "failed to load ledger snapshot, starting empty");
                UsageLedger::new(now)
            }
        };
        Self {
            provider,
            store,
            catalog,
            ledger,
        }
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub fn catalog(&self) -> &[TrackedApp] {
        &self.catalog
    }

    /// Reset the ledger if `now` falls on a different civil day.
    ///
    /// Must run before [`sample`](Self::sample) on every tick so yesterday's
    /// totals never bleed into today.
    pub fn check_rollover(&mut self, now: DateTime<Utc>) -> Result<bool, CoreError> {
        if !self.ledger.needs_rollover(now) {
            return Ok(false);
        }
        info!(from = %self.ledger.day, "day rollover, resetting usage ledger");
        self.ledger.reset(now);
        self.store.save_ledger(&self.ledger)?;
        Ok(true)
    }

    /// Pull current totals from the provider and merge them by max.
    ///
    /// A provider failure degrades to an empty sample for this tick -- usage
    /// simply does not advance -- and is never fatal.
    pub async fn sample(&mut self, now: DateTime<Utc>) -> Result<SampleSummary, CoreError> {
        let sample = match self.provider.usage_today(&self.catalog, now).await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, "usage provider fetch failed, skipping sample");
                Default::default()
            }
        };

        let apps_reported = sample.len();
        let changed = self.ledger.merge_sample(&sample);
        if changed {
            self.store.save_ledger(&self.ledger)?;
        }
        Ok(SampleSummary {
            apps_reported,
            changed,
            total_secs: self.ledger.total_secs(),
        })
    }
}
