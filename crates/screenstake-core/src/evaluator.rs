//! Stake evaluator.
//!
//! Converts ledger state into per-stake usage and status transitions. Pure
//! with respect to its inputs: the caller owns persistence and settlement.
//!
//! ## Transitions
//!
//! ```text
//! Active -> Completed   (staking period over; takes precedence)
//! Active -> Failed      (daily limit + grace exceeded; once per day)
//! Failed -> Active      (at day rollover, new daily cycle)
//! ```

use chrono::{DateTime, Utc};

use crate::history::Violation;
use crate::ledger::{local_day, UsageLedger};
use crate::stake::{Stake, StakeStatus};

/// Why a stake was not evaluated this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Structural invariants violated (empty app set, non-positive limit or
    /// amount). Such stakes are never evaluated or settled.
    Invalid,
    /// Completed or paused stakes are frozen.
    Frozen,
    /// Already failed today; next cycle starts at rollover.
    FailedToday,
}

/// Result of evaluating one stake against the ledger.
#[derive(Debug, Clone)]
pub enum EvalOutcome {
    /// Usage updated, no status transition.
    Unchanged,
    /// Stake excluded from this tick.
    Skipped(SkipReason),
    /// Staking period ended; stake completed.
    Completed,
    /// Daily limit breached; settlement is warranted.
    Violated(Violation),
}

/// The evaluated stake plus what happened to it.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub stake: Stake,
    pub outcome: EvalOutcome,
}

impl Evaluation {
    /// Whether the caller needs to persist the stake.
    pub fn mutated(&self) -> bool {
        !matches!(self.outcome, EvalOutcome::Skipped(_))
    }
}

/// Classifies per-stake state transitions.
#[derive(Debug, Clone, Copy)]
pub struct StakeEvaluator {
    /// Buffer added to the daily limit before a violation fires, absorbing
    /// sampling jitter.
    grace_secs: u64,
}

impl StakeEvaluator {
    pub fn new(grace_secs: u64) -> Self {
        Self { grace_secs }
    }

    pub fn grace_secs(&self) -> u64 {
        self.grace_secs
    }

    /// Evaluate one stake against the current ledger.
    ///
    /// Completion (end of the staking period) takes priority over a limit
    /// violation when both hold in the same tick: the staking period itself
    /// is over, so the stake is recorded as completed, not failed.
    pub fn evaluate(&self, stake: &Stake, ledger: &UsageLedger, now: DateTime<Utc>) -> Evaluation {
        if !stake.is_valid() {
            return Evaluation {
                stake: stake.clone(),
                outcome: EvalOutcome::Skipped(SkipReason::Invalid),
            };
        }

        match stake.status {
            StakeStatus::Completed | StakeStatus::Paused => {
                return Evaluation {
                    stake: stake.clone(),
                    outcome: EvalOutcome::Skipped(SkipReason::Frozen),
                };
            }
            StakeStatus::Active | StakeStatus::Failed => {}
        }

        let mut updated = stake.clone();

        // A stake not touched during the accountant's own rollover (process
        // suspended across midnight) still resets here: its last update
        // falls on an earlier civil day.
        let new_day = local_day(stake.last_updated) != local_day(now);
        if new_day {
            updated.current_usage_secs = 0;
            if updated.status == StakeStatus::Failed {
                updated.status = StakeStatus::Active;
            }
        }

        if updated.status == StakeStatus::Failed {
            // Failed earlier today: one violation per stake per day.
            return Evaluation {
                stake: stake.clone(),
                outcome: EvalOutcome::Skipped(SkipReason::FailedToday),
            };
        }

        updated.current_usage_secs = ledger.usage_for_apps(&updated.apps);
        updated.last_updated = now;

        if updated.should_complete(now) {
            updated.status = StakeStatus::Completed;
            return Evaluation {
                stake: updated,
                outcome: EvalOutcome::Completed,
            };
        }

        if updated.current_usage_secs > updated.daily_limit_secs + self.grace_secs {
            let violation = Violation {
                stake_id: updated.id,
                occurred_at: now,
                exceeded_by_secs: updated.current_usage_secs - updated.daily_limit_secs,
                total_usage_secs: updated.current_usage_secs,
                daily_limit_secs: updated.daily_limit_secs,
            };
            updated.status = StakeStatus::Failed;
            return Evaluation {
                stake: updated,
                outcome: EvalOutcome::Violated(violation),
            };
        }

        Evaluation {
            stake: updated,
            outcome: EvalOutcome::Unchanged,
        }
    }
}
