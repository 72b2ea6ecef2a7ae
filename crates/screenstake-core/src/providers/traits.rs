//! Seams to the engine's external collaborators.
//!
//! The engine never talks to an OS screen-time API, a payment processor, or
//! a push pipeline directly -- each is an object-safe async trait the host
//! wires in. Tests substitute in-memory doubles.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::catalog::TrackedApp;
use crate::error::{CoreError, DisputeError, PaymentError};
use crate::events::Notification;
use crate::history::ChargeRecord;

/// Supplies per-app usage accumulated "so far today".
///
/// May be backed by a real OS screen-time API or a synthetic estimator.
/// Totals may be partial or estimated; the accountant merges them by max.
#[async_trait]
pub trait UsageProvider: Send + Sync {
    /// Seconds of usage today per bundle id, for the requested apps.
    ///
    /// A failure degrades the current tick (usage does not advance); it is
    /// never fatal to the engine.
    async fn usage_today(
        &self,
        apps: &[TrackedApp],
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, u64>, CoreError>;
}

/// One charge attempt against the billing backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    pub user_id: String,
    pub payment_method_id: String,
    pub amount: f64,
    pub stake_id: String,
    pub metadata: HashMap<String, String>,
}

/// Result of a charge call that reached the provider.
///
/// A step-up challenge is an expected branch, not an error; genuine failures
/// come back as `Err(PaymentError)`. Callers match exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum ChargeOutcome {
    Succeeded {
        charge_id: String,
        receipt_url: Option<String>,
    },
    /// The payment network requires cardholder authentication (3-D Secure).
    AuthenticationRequired {
        client_secret: String,
        payment_intent_id: String,
    },
}

/// Attempts charges against a saved payment method.
#[async_trait]
pub trait ChargeProvider: Send + Sync {
    async fn charge(&self, req: &ChargeRequest) -> Result<ChargeOutcome, PaymentError>;
}

/// Fire-and-forget delivery of user-facing alerts.
///
/// Delivery failures are the implementation's problem; the engine never
/// blocks or errors on a notification.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification);
}

/// Opaque billing backend used for disputes and receipts.
#[async_trait]
pub trait DisputeGateway: Send + Sync {
    /// Submit a dispute. The local record is only updated after this
    /// confirms.
    async fn submit_dispute(
        &self,
        charge_id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DisputeError>;

    /// Dispatch a receipt for a succeeded charge.
    async fn send_receipt(&self, record: &ChargeRecord) -> Result<(), PaymentError>;
}

/// Default notifier: logs alerts through `tracing`.
///
/// Hosts replace this with their push-delivery implementation.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &Notification) {
        tracing::info!(
            title = notification.title(),
            body = %notification.body(),
            "notification"
        );
    }
}
