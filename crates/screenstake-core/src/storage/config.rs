//! TOML-based engine configuration.
//!
//! Stores the monitor cadence, violation grace buffer, settlement and
//! dispute policy knobs, and the billing backend coordinates.
//!
//! Configuration is stored at `~/.config/screenstake/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::data_dir;
use crate::error::ConfigError;

/// Monitor cadence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between full ticks (sample + evaluate + settle).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Seconds between redundant rollover checks for long-suspended hosts.
    #[serde(default = "default_rollover_check")]
    pub rollover_check_secs: u64,
}

/// Stake evaluation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakesConfig {
    /// Grace buffer in seconds added to the daily limit to absorb sampling
    /// jitter before a violation fires.
    #[serde(default = "default_grace")]
    pub grace_secs: u64,
    /// Days a finished stake is kept before the retention sweep prunes it.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

/// Settlement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Hard timeout on a single charge-provider call.
    #[serde(default = "default_charge_timeout")]
    pub charge_timeout_secs: u64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

/// Dispute configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeConfig {
    /// Window after a charge during which a dispute is accepted.
    #[serde(default = "default_dispute_window")]
    pub window_secs: u64,
}

/// Billing backend coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    #[serde(default = "default_billing_url")]
    pub base_url: String,
    #[serde(default)]
    pub user_id: String,
}

/// Engine configuration.
///
/// Serialized to/from TOML at `~/.config/screenstake/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub stakes: StakesConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub dispute: DisputeConfig,
    #[serde(default)]
    pub billing: BillingConfig,
}

fn default_tick_interval() -> u64 {
    60
}
fn default_rollover_check() -> u64 {
    3600
}
fn default_grace() -> u64 {
    300
}
fn default_retention_days() -> i64 {
    30
}
fn default_charge_timeout() -> u64 {
    30
}
fn default_currency() -> String {
    "USD".to_string()
}
fn default_dispute_window() -> u64 {
    86_400
}
fn default_billing_url() -> String {
    "https://api.screenstake.com/".to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            rollover_check_secs: default_rollover_check(),
        }
    }
}

impl Default for StakesConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            charge_timeout_secs: default_charge_timeout(),
            currency: default_currency(),
        }
    }
}

impl Default for DisputeConfig {
    fn default() -> Self {
        Self {
            window_secs: default_dispute_window(),
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            base_url: default_billing_url(),
            user_id: String::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            stakes: StakesConfig::default(),
            settlement: SettlementConfig::default(),
            dispute: DisputeConfig::default(),
            billing: BillingConfig::default(),
        }
    }
}

impl Config {
    fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("~/.config/screenstake"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load the configuration, falling back to defaults if the file is
    /// missing.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError::LoadFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    /// Persist the configuration.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        let raw = toml::to_string_pretty(self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        std::fs::write(&path, raw).map_err(|e| ConfigError::SaveFailed {
            path: path.clone(),
            message: e.to_string(),
        })
    }
}
