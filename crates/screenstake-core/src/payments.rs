//! Saved payment method registry.
//!
//! The billing backend owns the authoritative list; the engine keeps an
//! in-memory mirror and only ever needs the default method at settlement
//! time. No payment method on file is a normal, notified condition -- not an
//! error.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A payment method reference stored with the billing backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPaymentMethod {
    pub id: String,

    /// "apple_pay" or "card".
    #[serde(rename = "type")]
    pub kind: String,

    pub last4: Option<String>,
    pub brand: Option<String>,

    pub is_default: bool,

    pub created_at: DateTime<Utc>,
}

/// Thread-safe mirror of the user's saved payment methods.
#[derive(Debug, Default)]
pub struct PaymentMethodRegistry {
    methods: RwLock<Vec<SavedPaymentMethod>>,
}

impl PaymentMethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the mirrored list (e.g. after a backend refresh).
    pub fn set_methods(&self, methods: Vec<SavedPaymentMethod>) {
        *self.methods.write().expect("payment registry poisoned") = methods;
    }

    pub fn add(&self, method: SavedPaymentMethod) {
        self.methods
            .write()
            .expect("payment registry poisoned")
            .push(method);
    }

    pub fn remove(&self, method_id: &str) {
        self.methods
            .write()
            .expect("payment registry poisoned")
            .retain(|m| m.id != method_id);
    }

    /// The method settlement charges against, if any.
    pub fn default_method(&self) -> Option<SavedPaymentMethod> {
        self.methods
            .read()
            .expect("payment registry poisoned")
            .iter()
            .find(|m| m.is_default)
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.methods
            .read()
            .expect("payment registry poisoned")
            .is_empty()
    }
}
