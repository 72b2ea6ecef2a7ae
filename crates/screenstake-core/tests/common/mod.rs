//! Shared test doubles for the integration suites.
//!
//! Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use screenstake_core::{
    ChargeOutcome, ChargeProvider, ChargeRecord, ChargeRequest, CoreError, DisputeError,
    DisputeGateway, Notification, Notifier, PaymentError, TrackedApp, UsageProvider,
};

/// Noon today in local time, so ticks minutes apart never straddle a day
/// boundary while a test runs.
pub fn midday() -> DateTime<Utc> {
    chrono::Local::now()
        .date_naive()
        .and_hms_opt(12, 0, 0)
        .unwrap()
        .and_local_timezone(chrono::Local)
        .unwrap()
        .with_timezone(&Utc)
}

/// Usage provider backed by a mutable map the test scripts directly.
#[derive(Default)]
pub struct FakeUsageProvider {
    usage: Mutex<HashMap<String, u64>>,
    fail_next: Mutex<bool>,
}

impl FakeUsageProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, app: &str, secs: u64) {
        self.usage.lock().unwrap().insert(app.to_string(), secs);
    }

    pub fn clear(&self) {
        self.usage.lock().unwrap().clear();
    }

    /// Make the next fetch fail (transient provider outage).
    pub fn fail_next(&self) {
        *self.fail_next.lock().unwrap() = true;
    }
}

#[async_trait]
impl UsageProvider for FakeUsageProvider {
    async fn usage_today(
        &self,
        _apps: &[TrackedApp],
        _now: DateTime<Utc>,
    ) -> Result<HashMap<String, u64>, CoreError> {
        let mut fail = self.fail_next.lock().unwrap();
        if *fail {
            *fail = false;
            return Err(CoreError::Custom("provider unreachable".to_string()));
        }
        Ok(self.usage.lock().unwrap().clone())
    }
}

/// Charge provider that replays scripted outcomes and counts calls.
pub struct FakeChargeProvider {
    outcomes: Mutex<Vec<Result<ChargeOutcome, PaymentError>>>,
    calls: Mutex<usize>,
}

impl FakeChargeProvider {
    pub fn new(outcomes: Vec<Result<ChargeOutcome, PaymentError>>) -> Arc<Self> {
        let mut reversed = outcomes;
        reversed.reverse();
        Arc::new(Self {
            outcomes: Mutex::new(reversed),
            calls: Mutex::new(0),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(Vec::new()),
            calls: Mutex::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ChargeProvider for FakeChargeProvider {
    async fn charge(&self, _req: &ChargeRequest) -> Result<ChargeOutcome, PaymentError> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        match self.outcomes.lock().unwrap().pop() {
            Some(outcome) => outcome,
            // Default script: every charge succeeds.
            None => Ok(ChargeOutcome::Succeeded {
                charge_id: format!("ch_{}", *calls),
                receipt_url: None,
            }),
        }
    }
}

/// Notifier that records what was sent.
#[derive(Default)]
pub struct FakeNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl FakeNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, notification: &Notification) {
        self.sent.lock().unwrap().push(notification.clone());
    }
}

/// Dispute gateway that records receipts and can be scripted to fail.
#[derive(Default)]
pub struct FakeGateway {
    pub fail_disputes: bool,
    receipts: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_disputes: true,
            receipts: Mutex::new(Vec::new()),
        })
    }

    pub fn receipts(&self) -> Vec<String> {
        self.receipts.lock().unwrap().clone()
    }
}

#[async_trait]
impl DisputeGateway for FakeGateway {
    async fn submit_dispute(
        &self,
        _charge_id: &str,
        _reason: &str,
        _at: DateTime<Utc>,
    ) -> Result<(), DisputeError> {
        if self.fail_disputes {
            Err(DisputeError::Backend("HTTP 503".to_string()))
        } else {
            Ok(())
        }
    }

    async fn send_receipt(&self, record: &ChargeRecord) -> Result<(), PaymentError> {
        self.receipts.lock().unwrap().push(record.id.clone());
        Ok(())
    }
}
