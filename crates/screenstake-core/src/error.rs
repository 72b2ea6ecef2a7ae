//! Core error types for screenstake-core.
//!
//! This module defines the error hierarchy using thiserror. Provider-level
//! failures are caught at the narrowest scope (per stake, per call) so one
//! failure never prevents evaluation or settlement of unrelated stakes.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Core error type for screenstake-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Store-related errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Payment-provider errors
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    /// Dispute errors
    #[error("Dispute error: {0}")]
    Dispute(#[from] DisputeError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Store-specific errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open the database
    #[error("Failed to open store at {path}: {source}")]
    OpenFailed {
        path: std::path::PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Store migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Store is locked")]
    Locked,

    /// Stored value could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed {
        path: std::path::PathBuf,
        message: String,
    },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed {
        path: std::path::PathBuf,
        message: String,
    },

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Errors returned by a charge provider.
///
/// A required step-up authentication is NOT an error -- it is the
/// `ChargeOutcome::AuthenticationRequired` branch of a successful provider
/// round-trip. These variants cover genuine failures only.
#[derive(Error, Debug)]
pub enum PaymentError {
    /// The backend rejected the charge
    #[error("Charge declined: {reason}")]
    Declined { reason: String },

    /// Backend returned an unexpected status
    #[error("Billing backend error: HTTP {status}")]
    Backend { status: u16 },

    /// Network-level failure
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The charge call did not complete within the configured timeout
    #[error("Charge timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Backend response could not be decoded
    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    /// No API credentials available for the billing backend
    #[error("Billing credentials not configured")]
    CredentialsNotConfigured,
}

/// Dispute policy violations and backend failures.
#[derive(Error, Debug)]
pub enum DisputeError {
    /// No charge with the given id
    #[error("Unknown charge: {charge_id}")]
    UnknownCharge { charge_id: String },

    /// Disputes must be submitted within the dispute window
    #[error("Dispute window closed for charge {charge_id} (charged at {charged_at})")]
    OutsideWindow {
        charge_id: String,
        charged_at: DateTime<Utc>,
    },

    /// Only succeeded charges can be disputed
    #[error("Charge {charge_id} is not disputable (status: {status})")]
    NotDisputable { charge_id: String, status: String },

    /// The billing backend refused or failed the dispute submission.
    /// The local record is left unchanged in this case.
    #[error("Dispute submission failed: {0}")]
    Backend(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Invalid time range
    #[error("Invalid time range: end ({end}) must be greater than start ({start})")]
    InvalidTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Stake tracks no apps
    #[error("Stake tracks no apps")]
    EmptyAppSet,

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    StoreError::Locked
                } else {
                    StoreError::QueryFailed(err.to_string())
                }
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for CoreError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        CoreError::Custom(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
