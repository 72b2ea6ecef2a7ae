//! HTTP client for the billing backend.
//!
//! The backend fronts the payment processor: it owns customers, payment
//! methods, and charges. This client implements both [`ChargeProvider`]
//! (charge attempts, with the HTTP 402 step-up branch) and
//! [`DisputeGateway`] (disputes, receipts). The API token lives in the OS
//! keyring under `billing_api_token`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DisputeError, PaymentError};
use crate::history::ChargeRecord;
use crate::payments::SavedPaymentMethod;
use crate::providers::keyring_store;
use crate::providers::traits::{ChargeOutcome, ChargeProvider, ChargeRequest, DisputeGateway};

#[derive(Serialize)]
struct ChargeBody<'a> {
    user_id: &'a str,
    payment_method_id: &'a str,
    amount: f64,
    stake_id: &'a str,
    metadata: &'a HashMap<String, String>,
}

#[derive(Deserialize)]
struct ChargeResult {
    charge_id: String,
    receipt_url: Option<String>,
}

#[derive(Deserialize)]
struct StepUpChallenge {
    client_secret: String,
    payment_intent_id: String,
}

#[derive(Deserialize)]
struct BackendError {
    error: String,
}

#[derive(Serialize)]
struct DisputeBody<'a> {
    charge_id: &'a str,
    reason: &'a str,
    timestamp: String,
}

#[derive(Serialize)]
struct ReceiptBody<'a> {
    charge_id: &'a str,
    amount: f64,
    reason: &'a str,
    timestamp: String,
}

/// Billing backend client.
pub struct BillingClient {
    client: Client,
    base_url: Url,
    user_id: String,
    token: Option<String>,
}

impl BillingClient {
    /// Create a client, loading the API token from the OS keyring
    /// (absent token means calls fail with `CredentialsNotConfigured`).
    pub fn new(base_url: Url, user_id: &str) -> Self {
        let token = keyring_store::get("billing_api_token").ok().flatten();
        Self {
            client: Client::new(),
            base_url,
            user_id: user_id.to_string(),
            token,
        }
    }

    /// Create a client with an explicit token (tests, host-managed creds).
    pub fn with_token(base_url: Url, user_id: &str, token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url,
            user_id: user_id.to_string(),
            token: Some(token.to_string()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn endpoint(&self, path: &str) -> Result<Url, PaymentError> {
        self.base_url
            .join(path)
            .map_err(|e| PaymentError::InvalidResponse(e.to_string()))
    }

    fn bearer(&self) -> Result<&str, PaymentError> {
        self.token
            .as_deref()
            .ok_or(PaymentError::CredentialsNotConfigured)
    }

    /// Fetch the user's saved payment methods from the backend.
    pub async fn load_payment_methods(&self) -> Result<Vec<SavedPaymentMethod>, PaymentError> {
        let url = self.endpoint(&format!("payment-methods/{}", self.user_id))?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(self.bearer()?)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(PaymentError::Backend {
                status: resp.status().as_u16(),
            });
        }
        resp.json()
            .await
            .map_err(|e| PaymentError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ChargeProvider for BillingClient {
    async fn charge(&self, req: &ChargeRequest) -> Result<ChargeOutcome, PaymentError> {
        let url = self.endpoint("charge-stake")?;
        let body = ChargeBody {
            user_id: &req.user_id,
            payment_method_id: &req.payment_method_id,
            amount: req.amount,
            stake_id: &req.stake_id,
            metadata: &req.metadata,
        };
        let resp = self
            .client
            .post(url)
            .bearer_auth(self.bearer()?)
            .json(&body)
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK => {
                let result: ChargeResult = resp
                    .json()
                    .await
                    .map_err(|e| PaymentError::InvalidResponse(e.to_string()))?;
                Ok(ChargeOutcome::Succeeded {
                    charge_id: result.charge_id,
                    receipt_url: result.receipt_url,
                })
            }
            StatusCode::PAYMENT_REQUIRED => {
                let challenge: StepUpChallenge = resp
                    .json()
                    .await
                    .map_err(|e| PaymentError::InvalidResponse(e.to_string()))?;
                Ok(ChargeOutcome::AuthenticationRequired {
                    client_secret: challenge.client_secret,
                    payment_intent_id: challenge.payment_intent_id,
                })
            }
            status if status.is_client_error() => {
                // Declined charges come back with a reason body.
                match resp.json::<BackendError>().await {
                    Ok(err) => Err(PaymentError::Declined { reason: err.error }),
                    Err(_) => Err(PaymentError::Backend {
                        status: status.as_u16(),
                    }),
                }
            }
            status => Err(PaymentError::Backend {
                status: status.as_u16(),
            }),
        }
    }
}

#[async_trait]
impl DisputeGateway for BillingClient {
    async fn submit_dispute(
        &self,
        charge_id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DisputeError> {
        let url = self
            .endpoint("dispute-charge")
            .map_err(|e| DisputeError::Backend(e.to_string()))?;
        let body = DisputeBody {
            charge_id,
            reason,
            timestamp: at.to_rfc3339(),
        };
        let resp = self
            .client
            .post(url)
            .bearer_auth(
                self.bearer()
                    .map_err(|e| DisputeError::Backend(e.to_string()))?,
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| DisputeError::Backend(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(DisputeError::Backend(format!(
                "HTTP {}",
                resp.status().as_u16()
            )));
        }
        Ok(())
    }

    async fn send_receipt(&self, record: &ChargeRecord) -> Result<(), PaymentError> {
        let url = self.endpoint("send-receipt")?;
        let body = ReceiptBody {
            charge_id: &record.id,
            amount: record.amount,
            reason: &record.reason,
            timestamp: record.charged_at.to_rfc3339(),
        };
        let resp = self
            .client
            .post(url)
            .bearer_auth(self.bearer()?)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(PaymentError::Backend {
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }
}
