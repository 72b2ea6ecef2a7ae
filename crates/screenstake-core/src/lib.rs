//! # Screenstake Core Library
//!
//! This library implements the usage accounting and stake settlement engine
//! behind Screenstake: a user stakes money against a daily screen-time
//! budget for a set of apps, and is charged when the budget is exceeded.
//! The surrounding application (views, auth, push delivery, payment SDK) is
//! a thin layer over this crate.
//!
//! ## Architecture
//!
//! - **Accountant**: merges provider usage samples into a monotonic per-day
//!   ledger and owns day-rollover detection
//! - **Evaluator**: pure per-stake state machine (active -> completed /
//!   failed, one violation per day)
//! - **Settlement**: the charge-and-notify workflow, including the 3-D
//!   Secure step-up branch, with an at-most-one-charge-per-day guard
//! - **Monitor**: cancellable periodic driver running one full tick:
//!   rollover -> sample -> evaluate -> settle -> persist
//! - **Storage**: SQLite-backed store and TOML configuration
//! - **Providers**: async seams to the usage source, the billing backend,
//!   and the notification pipeline
//!
//! ## Key Components
//!
//! - [`StakeMonitor`]: the tick driver hosts embed
//! - [`UsageAccountant`] / [`StakeEvaluator`] / [`SettlementCoordinator`]:
//!   the engine stages, injectable for testing
//! - [`DisputeHandler`]: reversal requests within the dispute window
//! - [`Database`] / [`Config`]: persistence and configuration

pub mod accountant;
pub mod catalog;
pub mod dispute;
pub mod error;
pub mod events;
pub mod evaluator;
pub mod history;
pub mod ledger;
pub mod monitor;
pub mod payments;
pub mod providers;
pub mod settlement;
pub mod stake;
pub mod storage;

pub use accountant::{SampleSummary, UsageAccountant};
pub use catalog::{builtin_catalog, TrackedApp};
pub use dispute::DisputeHandler;
pub use error::{
    ConfigError, CoreError, DisputeError, PaymentError, StoreError, ValidationError,
};
pub use events::{EngineEvent, Notification};
pub use evaluator::{EvalOutcome, Evaluation, SkipReason, StakeEvaluator};
pub use history::{ChargeRecord, ChargeStatus, PendingAuthentication, Violation};
pub use ledger::{local_day, UsageLedger};
pub use monitor::{MonitorHandle, StakeMonitor, TickReport};
pub use payments::{PaymentMethodRegistry, SavedPaymentMethod};
pub use providers::{
    BillingClient, ChargeOutcome, ChargeProvider, ChargeRequest, DisputeGateway, Notifier,
    SyntheticUsageProvider, TracingNotifier, UsageProvider,
};
pub use settlement::{SettlementCoordinator, SettlementOutcome};
pub use stake::{Stake, StakeStatus};
pub use storage::{Config, Database, EngineStore, MemoryStore};
