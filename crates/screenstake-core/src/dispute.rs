//! Dispute handling.
//!
//! A succeeded charge can be disputed within a fixed window (default 24 h).
//! The local record only flips to `disputed` after the billing backend
//! confirms -- a failed submission leaves the record untouched so the user
//! never sees a false "money back" state.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::error::{CoreError, DisputeError};
use crate::history::{ChargeRecord, ChargeStatus};
use crate::providers::DisputeGateway;
use crate::storage::EngineStore;

/// Accepts or rejects dispute requests against the charge history.
pub struct DisputeHandler {
    gateway: Arc<dyn DisputeGateway>,
    store: Arc<dyn EngineStore>,
    window: Duration,
}

impl DisputeHandler {
    pub fn new(gateway: Arc<dyn DisputeGateway>, store: Arc<dyn EngineStore>, window: Duration) -> Self {
        Self {
            gateway,
            store,
            window,
        }
    }

    /// Dispute a charge.
    ///
    /// Fails with [`DisputeError::OutsideWindow`] once the window has fully
    /// elapsed (exactly at the boundary counts as outside), and with
    /// [`DisputeError::NotDisputable`] unless the charge currently stands
    /// `succeeded`. Returns the updated record on success.
    pub async fn dispute(
        &self,
        charge_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ChargeRecord, CoreError> {
        let charge = self
            .store
            .charge(charge_id)?
            .ok_or_else(|| DisputeError::UnknownCharge {
                charge_id: charge_id.to_string(),
            })?;

        if charge.status != ChargeStatus::Succeeded {
            return Err(DisputeError::NotDisputable {
                charge_id: charge_id.to_string(),
                status: charge.status.as_str().to_string(),
            }
            .into());
        }

        if now - charge.charged_at >= self.window {
            return Err(DisputeError::OutsideWindow {
                charge_id: charge_id.to_string(),
                charged_at: charge.charged_at,
            }
            .into());
        }

        // Backend first; the local record must never claim `disputed`
        // without confirmation.
        self.gateway.submit_dispute(charge_id, reason, now).await?;

        self.store
            .update_charge_status(charge_id, ChargeStatus::Disputed)?;
        info!(charge = charge_id, "charge disputed");

        Ok(ChargeRecord {
            status: ChargeStatus::Disputed,
            ..charge
        })
    }
}
