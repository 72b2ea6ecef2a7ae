//! Stake model.
//!
//! A stake is a user's bound commitment: a set of tracked apps, a daily time
//! budget, and a monetary amount charged when the budget is exceeded.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Lifecycle status of a stake.
///
/// `Failed` is a per-day state: the evaluator restores a failed stake to
/// `Active` at the next day rollover so multi-day stakes keep running.
/// `Completed` is terminal. `Paused` stakes are frozen and never evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StakeStatus {
    Active,
    Completed,
    Failed,
    Paused,
}

impl StakeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StakeStatus::Active => "active",
            StakeStatus::Completed => "completed",
            StakeStatus::Failed => "failed",
            StakeStatus::Paused => "paused",
        }
    }
}

impl std::str::FromStr for StakeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(StakeStatus::Active),
            "completed" => Ok(StakeStatus::Completed),
            "failed" => Ok(StakeStatus::Failed),
            "paused" => Ok(StakeStatus::Paused),
            other => Err(format!("unknown stake status: {other}")),
        }
    }
}

/// A user's commitment of a daily time budget backed by a monetary stake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stake {
    pub id: Uuid,

    /// Bundle identifiers of the tracked apps. Never empty for a valid stake.
    pub apps: Vec<String>,

    /// Daily time limit in seconds.
    pub daily_limit_secs: u64,

    /// Amount charged on violation, in currency units.
    pub amount: f64,

    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,

    pub status: StakeStatus,

    /// Seconds of tracked usage accumulated today.
    pub current_usage_secs: u64,

    pub last_updated: DateTime<Utc>,
}

impl Stake {
    /// Create a new active stake running for `duration_days` from `now`.
    pub fn new(
        apps: Vec<String>,
        daily_limit_secs: u64,
        amount: f64,
        duration_days: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            apps,
            daily_limit_secs,
            amount,
            start_at: now,
            end_at: now + Duration::days(duration_days),
            status: StakeStatus::Active,
            current_usage_secs: 0,
            last_updated: now,
        }
    }

    // ── Derived properties ───────────────────────────────────────────

    /// Seconds left in today's budget (zero once over the limit).
    pub fn remaining_secs(&self) -> u64 {
        self.daily_limit_secs.saturating_sub(self.current_usage_secs)
    }

    pub fn is_over_limit(&self) -> bool {
        self.current_usage_secs > self.daily_limit_secs
    }

    /// 0.0 .. 1.0 progress through today's budget.
    pub fn daily_progress(&self) -> f64 {
        if self.daily_limit_secs == 0 {
            return 0.0;
        }
        (self.current_usage_secs as f64 / self.daily_limit_secs as f64).clamp(0.0, 1.0)
    }

    /// 0.0 .. 1.0 progress through the staking period.
    pub fn overall_progress(&self, now: DateTime<Utc>) -> f64 {
        let total = (self.end_at - self.start_at).num_seconds();
        if total <= 0 {
            return 0.0;
        }
        let elapsed = (now - self.start_at).num_seconds();
        (elapsed as f64 / total as f64).clamp(0.0, 1.0)
    }

    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.end_at - now).num_days().max(0)
    }

    /// Whether the staking period is over and the stake should complete.
    pub fn should_complete(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_at && self.status == StakeStatus::Active
    }

    // ── Validation ───────────────────────────────────────────────────

    /// Check the stake's structural invariants.
    ///
    /// Invalid stakes are excluded from evaluation and settlement entirely
    /// rather than aborting a tick.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.apps.is_empty() {
            return Err(ValidationError::EmptyAppSet);
        }
        if self.daily_limit_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "daily_limit_secs".to_string(),
                message: "daily limit must be positive".to_string(),
            });
        }
        if self.amount <= 0.0 {
            return Err(ValidationError::InvalidValue {
                field: "amount".to_string(),
                message: "stake amount must be positive".to_string(),
            });
        }
        if self.end_at <= self.start_at {
            return Err(ValidationError::InvalidTimeRange {
                start: self.start_at,
                end: self.end_at,
            });
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Render seconds as "2h 5m" / "45m" for notification and audit copy.
pub fn format_hm(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
