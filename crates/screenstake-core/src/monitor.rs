//! Stake monitor: the engine's periodic driver.
//!
//! One full tick runs rollover-check -> sample -> evaluate-all-stakes ->
//! settle-violations -> persist. The loop is single-flight by construction:
//! a tick is awaited to completion inside the loop body, and missed interval
//! firings are skipped rather than queued. A second, coarser interval exists
//! purely as a rollover safety net for long-suspended hosts.
//!
//! Shutdown is graceful: an in-flight tick (including an awaited charge
//! call) finishes before the task exits, so a charge is never abandoned
//! mid-flight with an ambiguous outcome.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::accountant::UsageAccountant;
use crate::error::CoreError;
use crate::events::{EngineEvent, Notification};
use crate::evaluator::{EvalOutcome, StakeEvaluator};
use crate::providers::Notifier;
use crate::settlement::{SettlementCoordinator, SettlementOutcome};
use crate::stake::Stake;
use crate::storage::{Config, EngineStore};

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    pub events: Vec<EngineEvent>,
    /// Stakes that went through evaluation (invalid/frozen ones excluded).
    pub evaluated: usize,
    /// Violations that reached the settlement coordinator this tick.
    pub settled: usize,
}

/// Periodic driver wiring the accountant, evaluator and coordinator.
pub struct StakeMonitor {
    accountant: UsageAccountant,
    evaluator: StakeEvaluator,
    coordinator: Arc<SettlementCoordinator>,
    store: Arc<dyn EngineStore>,
    notifier: Arc<dyn Notifier>,
    tick_interval: StdDuration,
    rollover_interval: StdDuration,
    retention_days: i64,
}

impl StakeMonitor {
    pub fn new(
        accountant: UsageAccountant,
        evaluator: StakeEvaluator,
        coordinator: Arc<SettlementCoordinator>,
        store: Arc<dyn EngineStore>,
        notifier: Arc<dyn Notifier>,
        config: &Config,
    ) -> Self {
        Self {
            accountant,
            evaluator,
            coordinator,
            store,
            notifier,
            tick_interval: StdDuration::from_secs(config.monitor.tick_interval_secs),
            rollover_interval: StdDuration::from_secs(config.monitor.rollover_check_secs),
            retention_days: config.stakes.retention_days,
        }
    }

    pub fn accountant(&self) -> &UsageAccountant {
        &self.accountant
    }

    /// Run one full tick. Never fails: stake-level and provider-level errors
    /// are logged and degrade only their own scope.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        // Rollover always precedes sampling so yesterday's totals never
        // bleed into today.
        match self.accountant.check_rollover(now) {
            Ok(true) => {
                report.events.push(EngineEvent::RolloverCompleted {
                    day: self.accountant.ledger().day,
                    at: now,
                });
                self.sweep_retention(now);
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "rollover persistence failed"),
        }

        match self.accountant.sample(now).await {
            Ok(summary) => report.events.push(EngineEvent::UsageSampled {
                apps: summary.apps_reported,
                total_secs: summary.total_secs,
                at: now,
            }),
            Err(e) => warn!(error = %e, "ledger persistence failed"),
        }

        let stakes = match self.store.load_stakes() {
            Ok(stakes) => stakes,
            Err(e) => {
                warn!(error = %e, "failed to load stakes, skipping evaluation");
                return report;
            }
        };

        let mut mutated: Vec<Stake> = Vec::new();
        for stake in &stakes {
            let evaluation = self.evaluator.evaluate(stake, self.accountant.ledger(), now);
            match &evaluation.outcome {
                EvalOutcome::Skipped(reason) => {
                    debug!(stake = %stake.id, ?reason, "stake skipped");
                    continue;
                }
                EvalOutcome::Unchanged => {}
                EvalOutcome::Completed => {
                    info!(stake = %stake.id, "stake completed");
                    report.events.push(EngineEvent::StakeCompleted {
                        stake_id: stake.id,
                        at: now,
                    });
                }
                EvalOutcome::Violated(violation) => {
                    report.events.push(EngineEvent::LimitViolated {
                        stake_id: stake.id,
                        exceeded_by_secs: violation.exceeded_by_secs,
                        at: now,
                    });
                    self.notifier
                        .notify(&Notification::LimitExceeded {
                            stake_id: stake.id,
                            daily_limit_secs: stake.daily_limit_secs,
                            amount: stake.amount,
                        })
                        .await;
                    report.settled += 1;
                    self.settle_one(&evaluation.stake, violation, now, &mut report)
                        .await;
                }
            }
            report.evaluated += 1;
            if evaluation.mutated() {
                mutated.push(evaluation.stake);
            }
        }

        if !mutated.is_empty() {
            if let Err(e) = self.store.upsert_stakes(&mutated) {
                warn!(error = %e, "failed to persist evaluated stakes");
            }
        }

        report
    }

    /// Settle one violating stake, mapping the outcome to events. A
    /// settlement failure is contained to this stake.
    async fn settle_one(
        &self,
        stake: &Stake,
        violation: &crate::history::Violation,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        match self.coordinator.settle(stake, violation, now).await {
            Ok(SettlementOutcome::Charged(record)) => {
                report.events.push(EngineEvent::ChargeSucceeded {
                    stake_id: stake.id,
                    charge_id: record.id,
                    amount: record.amount,
                    at: now,
                });
            }
            Ok(SettlementOutcome::AuthenticationPending { .. }) => {
                report.events.push(EngineEvent::AuthenticationPending {
                    stake_id: stake.id,
                    at: now,
                });
            }
            Ok(SettlementOutcome::Failed(record)) => {
                report.events.push(EngineEvent::ChargeFailed {
                    stake_id: stake.id,
                    reason: record.reason,
                    at: now,
                });
            }
            Ok(SettlementOutcome::NoPaymentMethod) => {
                report.events.push(EngineEvent::PaymentMethodMissing {
                    stake_id: stake.id,
                    at: now,
                });
            }
            Ok(SettlementOutcome::AlreadySettled | SettlementOutcome::InFlight) => {}
            Err(e) => {
                warn!(stake = %stake.id, error = %e, "settlement failed");
            }
        }
    }

    /// Redundant rollover check for hosts suspended across midnight. Runs a
    /// full tick if the day changed.
    pub async fn rollover_check(&mut self, now: DateTime<Utc>) -> Option<TickReport> {
        if self.accountant.ledger().needs_rollover(now) {
            info!("rollover safety net fired");
            return Some(self.tick(now).await);
        }
        None
    }

    fn sweep_retention(&self, now: DateTime<Utc>) {
        let cutoff = now - Duration::days(self.retention_days);
        match self.store.prune_finished_before(cutoff) {
            Ok(0) => {}
            Ok(pruned) => info!(pruned, "pruned finished stakes"),
            Err(e) => warn!(error = %e, "retention sweep failed"),
        }
    }

    /// Move the monitor onto a background task driven by its intervals.
    pub fn spawn(mut self) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.tick_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut rollover = tokio::time::interval(self.rollover_interval);
            rollover.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("monitor shutting down");
                        break;
                    }
                    _ = tick.tick() => {
                        let report = self.tick(Utc::now()).await;
                        debug!(
                            evaluated = report.evaluated,
                            settled = report.settled,
                            "tick complete"
                        );
                    }
                    _ = rollover.tick() => {
                        self.rollover_check(Utc::now()).await;
                    }
                }
            }
        });
        MonitorHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a spawned monitor task.
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal shutdown and wait for the in-flight tick to finish.
    pub async fn shutdown(self) -> Result<(), CoreError> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| CoreError::Custom(format!("monitor task panicked: {e}")))
    }

    /// Abort without waiting (tests only; prefer `shutdown`).
    pub fn abort(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{builtin_catalog, TrackedApp};
    use crate::error::PaymentError;
    use crate::history::ChargeRecord;
    use crate::payments::{PaymentMethodRegistry, SavedPaymentMethod};
    use crate::providers::{ChargeOutcome, ChargeProvider, ChargeRequest, DisputeGateway, UsageProvider};
    use crate::stake::StakeStatus;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct SharedUsage {
        usage: StdMutex<HashMap<String, u64>>,
    }

    impl SharedUsage {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                usage: StdMutex::new(HashMap::new()),
            })
        }

        fn set(&self, app: &str, secs: u64) {
            self.usage.lock().unwrap().insert(app.to_string(), secs);
        }
    }

    #[async_trait]
    impl UsageProvider for SharedUsage {
        async fn usage_today(
            &self,
            _apps: &[TrackedApp],
            _now: DateTime<Utc>,
        ) -> Result<HashMap<String, u64>, CoreError> {
            Ok(self.usage.lock().unwrap().clone())
        }
    }

    struct CountingCharger {
        calls: StdMutex<usize>,
    }

    #[async_trait]
    impl ChargeProvider for CountingCharger {
        async fn charge(&self, _req: &ChargeRequest) -> Result<ChargeOutcome, PaymentError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            Ok(ChargeOutcome::Succeeded {
                charge_id: format!("ch_{}", *calls),
                receipt_url: None,
            })
        }
    }

    struct NullGateway;

    #[async_trait]
    impl DisputeGateway for NullGateway {
        async fn submit_dispute(
            &self,
            _charge_id: &str,
            _reason: &str,
            _at: DateTime<Utc>,
        ) -> Result<(), crate::error::DisputeError> {
            Ok(())
        }

        async fn send_receipt(&self, _record: &ChargeRecord) -> Result<(), PaymentError> {
            Ok(())
        }
    }

    struct NullNotifier;

    #[async_trait]
    impl crate::providers::Notifier for NullNotifier {
        async fn notify(&self, _notification: &Notification) {}
    }

    struct Fixture {
        monitor: StakeMonitor,
        usage: Arc<SharedUsage>,
        store: Arc<MemoryStore>,
        charger: Arc<CountingCharger>,
    }

    /// Noon today in local time, so ticks minutes apart never straddle a
    /// day boundary.
    fn midday() -> DateTime<Utc> {
        chrono::Local::now()
            .date_naive()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_local_timezone(chrono::Local)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn fixture(now: DateTime<Utc>) -> Fixture {
        let usage = SharedUsage::new();
        let store = Arc::new(MemoryStore::new());
        let charger = Arc::new(CountingCharger {
            calls: StdMutex::new(0),
        });
        let methods = Arc::new(PaymentMethodRegistry::new());
        methods.set_methods(vec![SavedPaymentMethod {
            id: "pm_1".to_string(),
            kind: "card".to_string(),
            last4: None,
            brand: None,
            is_default: true,
            created_at: now,
        }]);

        let config = Config::default();
        let accountant = UsageAccountant::new(
            usage.clone(),
            store.clone(),
            builtin_catalog(),
            now,
        );
        let coordinator = Arc::new(SettlementCoordinator::new(
            charger.clone(),
            Arc::new(NullGateway),
            Arc::new(NullNotifier),
            store.clone(),
            methods,
            "user_1".to_string(),
            StdDuration::from_secs(5),
        ));
        let monitor = StakeMonitor::new(
            accountant,
            StakeEvaluator::new(config.stakes.grace_secs),
            coordinator,
            store.clone(),
            Arc::new(NullNotifier),
            &config,
        );
        Fixture {
            monitor,
            usage,
            store,
            charger,
        }
    }

    const APP: &str = "com.burbn.instagram";

    #[tokio::test]
    async fn under_limit_tick_updates_usage_without_charging() {
        let now = midday();
        let mut f = fixture(now);
        let stake = Stake::new(vec![APP.to_string()], 3600, 10.0, 7, now);
        f.store.upsert_stake(&stake).unwrap();

        f.usage.set(APP, 3000);
        let report = f.monitor.tick(now).await;
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.settled, 0);

        let loaded = &f.store.load_stakes().unwrap()[0];
        assert_eq!(loaded.current_usage_secs, 3000);
        assert_eq!(loaded.status, StakeStatus::Active);
        assert_eq!(*f.charger.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn violation_charges_once_and_fails_stake() {
        let now = midday();
        let mut f = fixture(now);
        let stake = Stake::new(vec![APP.to_string()], 3600, 10.0, 7, now);
        f.store.upsert_stake(&stake).unwrap();

        f.usage.set(APP, 3000);
        f.monitor.tick(now).await;

        f.usage.set(APP, 4000);
        let report = f.monitor.tick(now + Duration::minutes(1)).await;
        assert_eq!(report.settled, 1);
        assert!(report
            .events
            .iter()
            .any(|e| matches!(e, EngineEvent::ChargeSucceeded { .. })));

        let loaded = &f.store.load_stakes().unwrap()[0];
        assert_eq!(loaded.status, StakeStatus::Failed);
        assert_eq!(*f.charger.calls.lock().unwrap(), 1);
        assert_eq!(f.store.violation_count(), 1);
    }

    #[tokio::test]
    async fn ten_violating_ticks_produce_one_charge() {
        let now = midday();
        let mut f = fixture(now);
        let stake = Stake::new(vec![APP.to_string()], 3600, 10.0, 7, now);
        f.store.upsert_stake(&stake).unwrap();

        f.usage.set(APP, 9000);
        for i in 0..10 {
            f.monitor.tick(now + Duration::minutes(i)).await;
        }
        assert_eq!(*f.charger.calls.lock().unwrap(), 1);
        assert_eq!(f.store.charges_for_stake(stake.id).unwrap().len(), 1);
        assert_eq!(f.store.violation_count(), 1);
    }

    #[tokio::test]
    async fn expired_stake_completes_even_when_over_limit() {
        let now = midday();
        let mut f = fixture(now);
        let mut stake = Stake::new(vec![APP.to_string()], 3600, 10.0, 7, now - Duration::days(8));
        stake.last_updated = now;
        f.store.upsert_stake(&stake).unwrap();

        f.usage.set(APP, 9000);
        let report = f.monitor.tick(now).await;
        assert!(report
            .events
            .iter()
            .any(|e| matches!(e, EngineEvent::StakeCompleted { .. })));

        let loaded = &f.store.load_stakes().unwrap()[0];
        assert_eq!(loaded.status, StakeStatus::Completed);
        assert_eq!(*f.charger.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn rollover_resets_ledger_and_reactivates_failed_stake() {
        let now = midday();
        let mut f = fixture(now);
        let stake = Stake::new(vec![APP.to_string()], 3600, 10.0, 7, now);
        f.store.upsert_stake(&stake).unwrap();

        f.usage.set(APP, 9000);
        f.monitor.tick(now).await;
        assert_eq!(f.store.load_stakes().unwrap()[0].status, StakeStatus::Failed);

        // Next day: provider reports fresh low totals.
        let tomorrow = now + Duration::days(1);
        f.usage.set(APP, 120);
        let report = f.monitor.tick(tomorrow).await;
        assert!(report
            .events
            .iter()
            .any(|e| matches!(e, EngineEvent::RolloverCompleted { .. })));

        let loaded = &f.store.load_stakes().unwrap()[0];
        assert_eq!(loaded.status, StakeStatus::Active);
        assert_eq!(loaded.current_usage_secs, 120);
    }

    #[tokio::test]
    async fn rollover_check_is_a_noop_within_the_same_day() {
        let now = midday();
        let mut f = fixture(now);
        assert!(f.monitor.rollover_check(now).await.is_none());
        assert!(f
            .monitor
            .rollover_check(now + Duration::days(1))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn spawned_monitor_shuts_down_gracefully() {
        let now = midday();
        let f = fixture(now);
        let handle = f.monitor.spawn();
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        handle.shutdown().await.unwrap();
    }
}
