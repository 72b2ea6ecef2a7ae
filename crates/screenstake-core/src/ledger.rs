//! Per-day usage ledger.
//!
//! The ledger maps app bundle ids to cumulative seconds used "today", where a
//! day is the local civil date. Values only move upward within a day:
//! provider samples are merged by `max`, which tolerates providers that
//! report partial or estimated running totals without ever handing time back
//! to the user mid-day.

use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The civil date a timestamp falls on in the device's local timezone.
///
/// Day identity lives here and nowhere else. A DST transition shifts the
/// UTC offset but the civil date still increments exactly once, so rollover
/// and the same-day guards cannot double-fire across the change.
pub fn local_day(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&Local).date_naive()
}

/// App-id → seconds-used-today map for one civil day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLedger {
    /// The civil day the entries pertain to.
    pub day: NaiveDate,

    /// Cumulative seconds per app bundle id.
    pub usage: HashMap<String, u64>,
}

impl UsageLedger {
    /// An empty ledger for the day `now` falls on.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            day: local_day(now),
            usage: HashMap::new(),
        }
    }

    /// Whether `now` has crossed into a different civil day than the ledger.
    pub fn needs_rollover(&self, now: DateTime<Utc>) -> bool {
        local_day(now) != self.day
    }

    /// Clear all entries and re-key the ledger to the day of `now`.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.usage.clear();
        self.day = local_day(now);
    }

    /// Merge a provider sample by `max`. Returns `true` if any entry changed.
    ///
    /// Entries absent from the sample are left untouched; a sample value
    /// below the recorded total never lowers it.
    pub fn merge_sample(&mut self, sample: &HashMap<String, u64>) -> bool {
        let mut changed = false;
        for (app, &secs) in sample {
            let entry = self.usage.entry(app.clone()).or_insert(0);
            if secs > *entry {
                *entry = secs;
                changed = true;
            }
        }
        changed
    }

    /// Seconds recorded today for a single app.
    pub fn usage_for_app(&self, bundle_id: &str) -> u64 {
        self.usage.get(bundle_id).copied().unwrap_or(0)
    }

    /// Total seconds recorded today across a set of apps.
    pub fn usage_for_apps(&self, bundle_ids: &[String]) -> u64 {
        bundle_ids.iter().map(|id| self.usage_for_app(id)).sum()
    }

    /// Total seconds across every tracked app.
    pub fn total_secs(&self) -> u64 {
        self.usage.values().sum()
    }
}
