use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stake::format_hm;

/// Every state change in the engine produces an event.
/// Hosts poll the monitor for events; tests assert on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// The ledger rolled over to a new civil day.
    RolloverCompleted {
        day: NaiveDate,
        at: DateTime<Utc>,
    },
    UsageSampled {
        apps: usize,
        total_secs: u64,
        at: DateTime<Utc>,
    },
    StakeCompleted {
        stake_id: Uuid,
        at: DateTime<Utc>,
    },
    LimitViolated {
        stake_id: Uuid,
        exceeded_by_secs: u64,
        at: DateTime<Utc>,
    },
    ChargeSucceeded {
        stake_id: Uuid,
        charge_id: String,
        amount: f64,
        at: DateTime<Utc>,
    },
    /// A step-up authentication challenge is pending user action.
    AuthenticationPending {
        stake_id: Uuid,
        at: DateTime<Utc>,
    },
    ChargeFailed {
        stake_id: Uuid,
        reason: String,
        at: DateTime<Utc>,
    },
    PaymentMethodMissing {
        stake_id: Uuid,
        at: DateTime<Utc>,
    },
    ChargeDisputed {
        charge_id: String,
        at: DateTime<Utc>,
    },
}

/// User-facing alerts handed to the [`Notifier`](crate::providers::Notifier).
///
/// Delivery (push, banner, sound) is the host's concern; the engine only
/// decides when an alert is warranted and what it says.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    ChargeProcessed {
        charge_id: String,
        amount: f64,
    },
    AuthenticationRequired {
        stake_id: Uuid,
    },
    PaymentMethodRequired,
    ChargeFailed {
        reason: String,
    },
    LimitExceeded {
        stake_id: Uuid,
        daily_limit_secs: u64,
        amount: f64,
    },
}

impl Notification {
    pub fn title(&self) -> &'static str {
        match self {
            Notification::ChargeProcessed { .. } => "Stake Charge Processed",
            Notification::AuthenticationRequired { .. } => "Authentication Required",
            Notification::PaymentMethodRequired => "Payment Method Required",
            Notification::ChargeFailed { .. } => "Charge Failed",
            Notification::LimitExceeded { .. } => "Limit Exceeded",
        }
    }

    pub fn body(&self) -> String {
        match self {
            Notification::ChargeProcessed { amount, .. } => format!(
                "You exceeded your daily limit. ${amount:.0} has been charged."
            ),
            Notification::AuthenticationRequired { .. } => {
                "Tap to complete payment authentication for your stake.".to_string()
            }
            Notification::PaymentMethodRequired => {
                "Add a payment method to continue your stake.".to_string()
            }
            Notification::ChargeFailed { .. } => {
                "We couldn't process your stake charge. Please update your payment method."
                    .to_string()
            }
            Notification::LimitExceeded {
                daily_limit_secs,
                amount,
                ..
            } => format!(
                "You've exceeded your {} limit. ${amount:.0} stake triggered.",
                format_hm(*daily_limit_secs)
            ),
        }
    }
}
