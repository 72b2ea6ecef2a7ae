//! Settlement history records: charges, violations, pending authentications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a charge record.
///
/// Records are append-only; status is the one mutable field
/// (`Disputed`/`Refunded` overwrite `Succeeded` after backend confirmation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeStatus {
    Pending,
    Succeeded,
    Failed,
    Disputed,
    Refunded,
}

impl ChargeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeStatus::Pending => "pending",
            ChargeStatus::Succeeded => "succeeded",
            ChargeStatus::Failed => "failed",
            ChargeStatus::Disputed => "disputed",
            ChargeStatus::Refunded => "refunded",
        }
    }
}

impl std::str::FromStr for ChargeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChargeStatus::Pending),
            "succeeded" => Ok(ChargeStatus::Succeeded),
            "failed" => Ok(ChargeStatus::Failed),
            "disputed" => Ok(ChargeStatus::Disputed),
            "refunded" => Ok(ChargeStatus::Refunded),
            other => Err(format!("unknown charge status: {other}")),
        }
    }
}

/// Outcome of one settlement attempt against the charge provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRecord {
    /// Provider-assigned charge id, or a locally generated id for failures.
    pub id: String,

    pub stake_id: Uuid,

    pub amount: f64,

    pub charged_at: DateTime<Utc>,

    /// Human-readable reason ("Daily limit exceeded by 1h 5m", failure text).
    pub reason: String,

    pub status: ChargeStatus,

    pub receipt_url: Option<String>,
}

/// Audit record of a detected daily-limit breach.
///
/// Write-only from the engine's perspective; the read path is external
/// reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub stake_id: Uuid,

    pub occurred_at: DateTime<Utc>,

    /// Seconds past the limit at detection.
    pub exceeded_by_secs: u64,

    /// Total tracked usage at detection.
    pub total_usage_secs: u64,

    /// The stake's limit at detection.
    pub daily_limit_secs: u64,
}

/// A charge attempt parked on a step-up authentication challenge.
///
/// Exists only between the challenge and its resolution; deleted once the
/// user completes or abandons the challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAuthentication {
    pub stake_id: Uuid,

    /// Opaque secret the host passes to the payment SDK's challenge flow.
    pub client_secret: String,

    pub amount: f64,

    pub created_at: DateTime<Utc>,
}
