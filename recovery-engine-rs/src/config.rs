//! # Engine Configuration
//!
//! Tunables for retry/backoff, the strategy cache, log retention, and the
//! alerting thresholds. Values can be overridden from a `config::Config`
//! source under the `recovery.` key prefix.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the recovery engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum callback invocations for a retry plan
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub retry_delay_ms: u64,
    /// Cap on a single backoff delay
    pub max_backoff_ms: u64,
    /// Jitter factor (0.0 - 1.0) added to backoff delays
    pub jitter_factor: f64,
    /// How long a remembered strategy stays trusted
    pub strategy_ttl_secs: u64,
    /// Maximum entries in the strategy cache
    pub strategy_capacity: usize,
    /// Maximum entries in the rolling failure log
    pub history_retention: usize,
    /// Trailing record count used for analytics and alert checks
    pub alert_window: usize,
    /// Error-rate threshold over the window (0.0 - 1.0)
    pub error_rate_threshold: f64,
    /// Critical failure count in the window that triggers an alert
    pub critical_errors_threshold: u64,
    /// Repetitions of one signature in the window that trigger an alert
    pub same_error_threshold: u64,
    /// Handled-record count an alert key stays suppressed after firing
    pub alert_cooldown: usize,
    /// Whether to record metrics
    pub record_metrics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 100,
            max_backoff_ms: 30_000,
            jitter_factor: 0.0,
            strategy_ttl_secs: 300,
            strategy_capacity: 256,
            history_retention: 1000,
            alert_window: 100,
            error_rate_threshold: 0.5,
            critical_errors_threshold: 5,
            same_error_threshold: 10,
            alert_cooldown: 100,
            record_metrics: true,
        }
    }
}

impl EngineConfig {
    /// Base retry delay as a `Duration`
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Backoff cap as a `Duration`
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Strategy TTL as a `chrono::Duration`
    pub fn strategy_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.strategy_ttl_secs as i64)
    }
}

impl TryFrom<config::Config> for EngineConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        // Start with defaults and override from config where present.
        let mut base = EngineConfig::default();

        if let Ok(max_retries) = cfg.get::<u32>("recovery.max_retries") {
            base.max_retries = max_retries;
        }
        if let Ok(retry_delay_ms) = cfg.get::<u64>("recovery.retry_delay_ms") {
            base.retry_delay_ms = retry_delay_ms;
        }
        if let Ok(max_backoff_ms) = cfg.get::<u64>("recovery.max_backoff_ms") {
            base.max_backoff_ms = max_backoff_ms;
        }
        if let Ok(jitter_factor) = cfg.get::<f64>("recovery.jitter_factor") {
            base.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        }
        if let Ok(strategy_ttl_secs) = cfg.get::<u64>("recovery.strategy_ttl_secs") {
            base.strategy_ttl_secs = strategy_ttl_secs;
        }
        if let Ok(strategy_capacity) = cfg.get::<usize>("recovery.strategy_capacity") {
            base.strategy_capacity = strategy_capacity;
        }
        if let Ok(history_retention) = cfg.get::<usize>("recovery.history_retention") {
            base.history_retention = history_retention;
        }
        if let Ok(alert_window) = cfg.get::<usize>("recovery.alert_window") {
            base.alert_window = alert_window;
        }
        if let Ok(error_rate_threshold) = cfg.get::<f64>("recovery.error_rate_threshold") {
            base.error_rate_threshold = error_rate_threshold;
        }
        if let Ok(critical_errors_threshold) = cfg.get::<u64>("recovery.critical_errors_threshold") {
            base.critical_errors_threshold = critical_errors_threshold;
        }
        if let Ok(same_error_threshold) = cfg.get::<u64>("recovery.same_error_threshold") {
            base.same_error_threshold = same_error_threshold;
        }
        if let Ok(alert_cooldown) = cfg.get::<usize>("recovery.alert_cooldown") {
            base.alert_cooldown = alert_cooldown;
        }
        if let Ok(record_metrics) = cfg.get::<bool>("recovery.record_metrics") {
            base.record_metrics = record_metrics;
        }

        Ok(base)
    }
}
