//! Synthetic usage estimator.
//!
//! Stands in for the OS screen-time API during development and testing.
//! Produces a deterministic time-of-day curve per app: usage accrues over
//! the active hours (06:00-22:00 local) toward a per-app daily target, with
//! a steeper evening slope. Optional seeded jitter under-reports totals to
//! exercise the accountant's merge-by-max path.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Local, Timelike, Utc};
use rand::Rng;
use rand::SeedableRng;
use rand_pcg::Mcg128Xsl64;

use crate::catalog::TrackedApp;
use crate::error::CoreError;
use crate::providers::traits::UsageProvider;

/// First and last active hour of the simulated day.
const ACTIVE_START_HOUR: f64 = 6.0;
const ACTIVE_HOURS: f64 = 16.0;

/// Deterministic usage estimator with per-app daily targets.
pub struct SyntheticUsageProvider {
    /// Bundle id → expected full-day usage in seconds.
    targets: HashMap<String, u64>,

    /// When set, each reported total is scaled by a random factor in
    /// [0.85, 1.0] to simulate a provider that reports partial totals.
    jitter: Option<Mutex<Mcg128Xsl64>>,

    /// Test-injected minimum totals per app.
    floors: Mutex<HashMap<String, u64>>,
}

impl SyntheticUsageProvider {
    pub fn new() -> Self {
        let mut targets = HashMap::new();
        targets.insert("com.burbn.instagram".to_string(), 3600);
        targets.insert("com.zhiliaoapp.musically".to_string(), 4800);
        targets.insert("com.google.ios.youtube".to_string(), 5400);
        targets.insert("com.atebits.Tweetie2".to_string(), 1800);
        targets.insert("com.toyopagroup.picaboo".to_string(), 2400);
        Self {
            targets,
            jitter: None,
            floors: Mutex::new(HashMap::new()),
        }
    }

    /// Enable seeded under-reporting jitter.
    pub fn with_jitter(mut self, seed: u64) -> Self {
        self.jitter = Some(Mutex::new(Mcg128Xsl64::seed_from_u64(seed)));
        self
    }

    /// Override the daily target for one app.
    pub fn set_target(&mut self, bundle_id: &str, daily_secs: u64) {
        self.targets.insert(bundle_id.to_string(), daily_secs);
    }

    // ── Test controls ────────────────────────────────────────────────

    /// Pin an app's reported total to at least `secs`.
    pub fn set_usage(&self, bundle_id: &str, secs: u64) {
        self.floors
            .lock()
            .expect("floors poisoned")
            .insert(bundle_id.to_string(), secs);
    }

    /// Simulate `hours` of additional usage on every known app.
    pub fn advance_hours(&self, hours: f64) {
        let mut floors = self.floors.lock().expect("floors poisoned");
        for (bundle_id, _) in &self.targets {
            let per_hour = match bundle_id.as_str() {
                "com.burbn.instagram" | "com.zhiliaoapp.musically" => 900.0,
                "com.google.ios.youtube" => 1200.0,
                "com.atebits.Tweetie2" | "com.toyopagroup.picaboo" => 600.0,
                _ => 450.0,
            };
            let extra = (hours * per_hour) as u64;
            *floors.entry(bundle_id.clone()).or_insert(0) += extra;
        }
    }

    /// Drop all injected totals (new-day reset in tests).
    pub fn clear_usage(&self) {
        self.floors.lock().expect("floors poisoned").clear();
    }

    fn curve_value(&self, bundle_id: &str, now: DateTime<Utc>) -> u64 {
        let target = self.targets.get(bundle_id).copied().unwrap_or(1800) as f64;
        let local = now.with_timezone(&Local);
        let hours_elapsed =
            local.hour() as f64 + local.minute() as f64 / 60.0 + local.second() as f64 / 3600.0;
        let active_elapsed = (hours_elapsed - ACTIVE_START_HOUR).clamp(0.0, ACTIVE_HOURS);
        let progress = active_elapsed / ACTIVE_HOURS;
        // Steeper accrual toward the evening.
        (target * progress.powf(1.2)) as u64
    }
}

impl Default for SyntheticUsageProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageProvider for SyntheticUsageProvider {
    async fn usage_today(
        &self,
        apps: &[TrackedApp],
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, u64>, CoreError> {
        let floors = self.floors.lock().expect("floors poisoned");
        let mut usage = HashMap::new();
        for app in apps {
            let mut value = self.curve_value(&app.bundle_id, now);
            if let Some(rng) = &self.jitter {
                let factor: f64 = rng.lock().expect("rng poisoned").gen_range(0.85..=1.0);
                value = (value as f64 * factor) as u64;
            }
            let floor = floors.get(&app.bundle_id).copied().unwrap_or(0);
            usage.insert(app.bundle_id.clone(), value.max(floor));
        }
        Ok(usage)
    }
}
