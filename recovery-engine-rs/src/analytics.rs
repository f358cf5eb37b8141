//! # Analytics & Alerting Aggregator
//!
//! Keeps the rolling log of handled failures, the running recovery
//! counters, and the alert state. Snapshots are recomputed on demand from
//! the trailing window; nothing here is persisted. Alerts are
//! edge-triggered: a threshold crossing fires once and the alert key then
//! stays suppressed for a cooldown measured in handled records.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use metrics::{counter, gauge};
use tracing::{error, warn};

use crate::config::EngineConfig;
use crate::types::{
    Alert, AlertKind, AlertSink, AnalyticsSnapshot, ErrorCategory, FailureRecord, Severity,
    TopError,
};

/// How many signatures the top-errors ranking reports
const TOP_ERRORS_LIMIT: usize = 5;

/// Rolling log plus alert bookkeeping. Mutations are serialized by the
/// engine; this type itself is single-writer.
#[derive(Debug)]
pub struct Analytics {
    config: EngineConfig,
    log: VecDeque<FailureRecord>,
    total_handled: u64,
    successful_recoveries: u64,
    failed_recoveries: u64,
    /// Sequence number of the last record that fired each alert key;
    /// a key re-arms once the cooldown has elapsed past this point.
    alert_fired_at: HashMap<String, u64>,
}

impl Analytics {
    /// Creates an empty aggregator
    pub fn new(config: EngineConfig) -> Self {
        Self {
            log: VecDeque::with_capacity(config.history_retention.min(256)),
            config,
            total_handled: 0,
            successful_recoveries: 0,
            failed_recoveries: 0,
            alert_fired_at: HashMap::new(),
        }
    }

    /// Appends a record, trims the log, updates counters, and returns the
    /// alerts whose thresholds this record crossed.
    pub fn record(&mut self, record: FailureRecord) -> Vec<Alert> {
        self.total_handled += 1;
        if record.recovery_succeeded {
            self.successful_recoveries += 1;
        } else {
            self.failed_recoveries += 1;
        }

        if self.config.record_metrics {
            counter!("recovery.handled", 1);
            counter!(format!("recovery.category.{}", record.category), 1);
            if record.recovery_succeeded {
                counter!("recovery.recovered", 1);
            } else {
                counter!("recovery.unrecovered", 1);
            }
        }

        self.log.push_back(record);
        while self.log.len() > self.config.history_retention {
            self.log.pop_front();
        }

        if self.config.record_metrics {
            gauge!("recovery.log.size", self.log.len() as f64);
        }

        self.check_thresholds()
    }

    /// How often the given signature appears in the trailing window
    pub fn signature_count(&self, signature: &str) -> u64 {
        self.window()
            .filter(|record| record.signature == signature)
            .count() as u64
    }

    /// Computes the analytics snapshot from the trailing window
    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let window: Vec<&FailureRecord> = self.window().collect();
        if window.is_empty() {
            return AnalyticsSnapshot {
                successful_recoveries: self.successful_recoveries,
                failed_recoveries: self.failed_recoveries,
                ..AnalyticsSnapshot::empty()
            };
        }

        let error_count = window.len() as u64;
        let error_rate = error_count as f64 / self.config.alert_window.max(1) as f64;

        let total_recovery_ms: u64 = window.iter().map(|r| r.recovery_duration_ms).sum();
        let average_recovery_time_ms = total_recovery_ms as f64 / window.len() as f64;

        let critical_alerts_in_window = window
            .iter()
            .filter(|r| r.severity == Severity::Critical)
            .count() as u64;

        AnalyticsSnapshot {
            error_count,
            error_rate,
            average_recovery_time_ms,
            successful_recoveries: self.successful_recoveries,
            failed_recoveries: self.failed_recoveries,
            top_errors: self.top_errors(&window),
            critical_alerts_in_window,
        }
    }

    /// The full log, oldest first
    pub fn log(&self) -> Vec<FailureRecord> {
        self.log.iter().cloned().collect()
    }

    /// Resets the log, the counters, and the alert cooldowns
    pub fn clear(&mut self) {
        self.log.clear();
        self.total_handled = 0;
        self.successful_recoveries = 0;
        self.failed_recoveries = 0;
        self.alert_fired_at.clear();
    }

    fn window(&self) -> impl Iterator<Item = &FailureRecord> {
        let skip = self.log.len().saturating_sub(self.config.alert_window);
        self.log.iter().skip(skip)
    }

    fn top_errors(&self, window: &[&FailureRecord]) -> Vec<TopError> {
        let mut by_signature: HashMap<&str, (u64, &str, ErrorCategory)> = HashMap::new();
        for record in window {
            let entry = by_signature
                .entry(record.signature.as_str())
                .or_insert((0, record.message.as_str(), record.category));
            entry.0 += 1;
            // Keep the most recent message as the representative one
            entry.1 = record.message.as_str();
        }

        let mut ranked: Vec<TopError> = by_signature
            .into_iter()
            .map(|(signature, (count, message, category))| TopError {
                signature: signature.to_string(),
                message: message.to_string(),
                count,
                category,
            })
            .collect();

        ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.signature.cmp(&b.signature)));
        ranked.truncate(TOP_ERRORS_LIMIT);
        ranked
    }

    fn check_thresholds(&mut self) -> Vec<Alert> {
        let mut alerts = Vec::new();

        // Gather the window stats up front so no log borrow is held while
        // firing.
        let (window_len, critical_count, latest) = {
            let window: Vec<&FailureRecord> = self.window().collect();
            let window_len = window.len() as u64;
            let critical_count = window
                .iter()
                .filter(|r| r.severity == Severity::Critical)
                .count() as u64;
            let latest = self.log.back().map(|record| {
                let signature = record.signature.clone();
                let count = window
                    .iter()
                    .filter(|r| r.signature == signature)
                    .count() as u64;
                (signature, count)
            });
            (window_len, critical_count, latest)
        };

        let error_rate = window_len as f64 / self.config.alert_window.max(1) as f64;
        if error_rate >= self.config.error_rate_threshold {
            if let Some(alert) = self.fire(
                "error-rate",
                AlertKind::ErrorRate,
                Severity::High,
                None,
                error_rate,
                self.config.error_rate_threshold,
                format!(
                    "error rate {:.2} crossed threshold {:.2} over the last {} records",
                    error_rate, self.config.error_rate_threshold, self.config.alert_window
                ),
            ) {
                alerts.push(alert);
            }
        }

        if critical_count >= self.config.critical_errors_threshold {
            if let Some(alert) = self.fire(
                "critical-errors",
                AlertKind::CriticalErrors,
                Severity::Critical,
                None,
                critical_count as f64,
                self.config.critical_errors_threshold as f64,
                format!(
                    "{} critical failures in the last {} records",
                    critical_count, self.config.alert_window
                ),
            ) {
                alerts.push(alert);
            }
        }

        // Only the just-appended signature can newly cross the repeat
        // threshold.
        if let Some((signature, count)) = latest {
            if count >= self.config.same_error_threshold {
                let message = format!(
                    "signature {} repeated {} times in the last {} records",
                    signature, count, self.config.alert_window
                );
                if let Some(alert) = self.fire(
                    &format!("same-error:{}", signature),
                    AlertKind::RepeatedSignature,
                    Severity::High,
                    Some(signature),
                    count as f64,
                    self.config.same_error_threshold as f64,
                    message,
                ) {
                    alerts.push(alert);
                }
            }
        }

        alerts
    }

    /// Emits one alert unless its key is still cooling down.
    #[allow(clippy::too_many_arguments)]
    fn fire(
        &mut self,
        key: &str,
        kind: AlertKind,
        severity: Severity,
        signature: Option<String>,
        value: f64,
        threshold: f64,
        message: String,
    ) -> Option<Alert> {
        if let Some(&fired_at) = self.alert_fired_at.get(key) {
            let elapsed = self.total_handled.saturating_sub(fired_at);
            if elapsed < self.config.alert_cooldown as u64 {
                return None;
            }
        }
        self.alert_fired_at.insert(key.to_string(), self.total_handled);

        if self.config.record_metrics {
            counter!("recovery.alerts", 1);
            counter!(format!("recovery.alerts.{}", kind), 1);
        }

        Some(Alert {
            kind,
            message,
            severity,
            signature,
            value,
            threshold,
            timestamp: Utc::now(),
        })
    }
}

/// Delivers alerts to the log, and critical ones to the external sink if
/// configured. A sink error must never fail the surrounding `handle`.
pub fn dispatch_alerts(alerts: &[Alert], sink: Option<&dyn AlertSink>) {
    for alert in alerts {
        match alert.severity {
            Severity::Critical => error!(
                kind = %alert.kind,
                value = %alert.value,
                threshold = %alert.threshold,
                message = %alert.message,
                "Recovery alert"
            ),
            _ => warn!(
                kind = %alert.kind,
                value = %alert.value,
                threshold = %alert.threshold,
                message = %alert.message,
                "Recovery alert"
            ),
        }

        if alert.severity == Severity::Critical {
            if let Some(sink) = sink {
                if let Err(err) = sink.notify(alert) {
                    warn!(error = %err, kind = %alert.kind, "Alert sink rejected notification");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecoveryAction;
    use uuid::Uuid;

    fn config() -> EngineConfig {
        EngineConfig {
            history_retention: 10,
            alert_window: 5,
            error_rate_threshold: 2.0, // effectively off unless a test lowers it
            critical_errors_threshold: 100,
            same_error_threshold: 3,
            alert_cooldown: 5,
            record_metrics: false,
            ..EngineConfig::default()
        }
    }

    fn record(signature: &str, severity: Severity, succeeded: bool, duration_ms: u64) -> FailureRecord {
        FailureRecord {
            id: Uuid::new_v4(),
            signature: signature.to_string(),
            category: ErrorCategory::Network,
            severity,
            service_name: "fetcher".to_string(),
            operation: "pull_docs".to_string(),
            message: format!("{} failed", signature),
            raw_details: None,
            timestamp: Utc::now(),
            recovery_action: RecoveryAction::Retry,
            recovery_succeeded: succeeded,
            recovery_attempts: 1,
            recovery_duration_ms: duration_ms,
        }
    }

    #[test]
    fn test_log_is_bounded_fifo() {
        let mut analytics = Analytics::new(config());
        for i in 0..15 {
            analytics.record(record(&format!("sig-{}", i), Severity::Medium, true, 10));
        }

        let log = analytics.log();
        assert_eq!(log.len(), 10);
        // Oldest evicted first: the log starts at sig-5
        assert_eq!(log.first().unwrap().signature, "sig-5");
        assert_eq!(log.last().unwrap().signature, "sig-14");
    }

    #[test]
    fn test_snapshot_computes_window_stats() {
        let mut analytics = Analytics::new(config());
        analytics.record(record("sig-a", Severity::Medium, true, 100));
        analytics.record(record("sig-a", Severity::Critical, false, 300));
        analytics.record(record("sig-b", Severity::Medium, true, 200));

        let snapshot = analytics.snapshot();
        assert_eq!(snapshot.error_count, 3);
        assert!((snapshot.error_rate - 0.6).abs() < f64::EPSILON);
        assert!((snapshot.average_recovery_time_ms - 200.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.successful_recoveries, 2);
        assert_eq!(snapshot.failed_recoveries, 1);
        assert_eq!(snapshot.critical_alerts_in_window, 1);

        assert_eq!(snapshot.top_errors.first().unwrap().signature, "sig-a");
        assert_eq!(snapshot.top_errors.first().unwrap().count, 2);
    }

    #[test]
    fn test_repeated_signature_alerts_once() {
        let mut analytics = Analytics::new(config());

        let mut fired = Vec::new();
        for _ in 0..3 {
            fired.extend(analytics.record(record("sig-a", Severity::Medium, false, 10)));
        }

        let repeat_alerts: Vec<&Alert> = fired
            .iter()
            .filter(|a| a.kind == AlertKind::RepeatedSignature)
            .collect();
        assert_eq!(repeat_alerts.len(), 1);
        assert_eq!(repeat_alerts[0].signature.as_deref(), Some("sig-a"));
        assert_eq!(repeat_alerts[0].value, 3.0);
    }

    #[test]
    fn test_alert_rearms_after_cooldown() {
        let mut cfg = config();
        cfg.alert_cooldown = 2;
        let mut analytics = Analytics::new(cfg);

        let mut fired = 0usize;
        for _ in 0..7 {
            fired += analytics
                .record(record("sig-a", Severity::Medium, false, 10))
                .iter()
                .filter(|a| a.kind == AlertKind::RepeatedSignature)
                .count();
        }

        // Fires at record 3, re-arms after 2 more records (5, 7)
        assert_eq!(fired, 3);
    }

    #[test]
    fn test_critical_errors_threshold() {
        let mut cfg = config();
        cfg.critical_errors_threshold = 2;
        let mut analytics = Analytics::new(cfg);

        let mut alerts = Vec::new();
        alerts.extend(analytics.record(record("sig-a", Severity::Critical, false, 10)));
        alerts.extend(analytics.record(record("sig-b", Severity::Critical, false, 10)));

        let critical: Vec<&Alert> = alerts
            .iter()
            .filter(|a| a.kind == AlertKind::CriticalErrors)
            .collect();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].severity, Severity::Critical);
    }

    #[test]
    fn test_error_rate_threshold() {
        let mut cfg = config();
        cfg.error_rate_threshold = 0.6; // 3 of 5 window slots
        let mut analytics = Analytics::new(cfg);

        let mut rate_alerts = 0usize;
        for i in 0..3 {
            rate_alerts += analytics
                .record(record(&format!("sig-{}", i), Severity::Medium, false, 10))
                .iter()
                .filter(|a| a.kind == AlertKind::ErrorRate)
                .count();
        }
        assert_eq!(rate_alerts, 1);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut analytics = Analytics::new(config());
        for _ in 0..4 {
            analytics.record(record("sig-a", Severity::Medium, true, 10));
        }
        analytics.clear();

        let snapshot = analytics.snapshot();
        assert_eq!(snapshot.error_count, 0);
        assert_eq!(snapshot.error_rate, 0.0);
        assert_eq!(snapshot.successful_recoveries, 0);
        assert_eq!(snapshot.failed_recoveries, 0);
        assert!(snapshot.top_errors.is_empty());
        assert!(analytics.log().is_empty());
    }

    #[test]
    fn test_dispatch_forwards_critical_to_sink() {
        struct Recorder(std::sync::Mutex<Vec<AlertKind>>);
        impl AlertSink for Recorder {
            fn notify(&self, alert: &Alert) -> crate::types::Result<()> {
                self.0.lock().unwrap().push(alert.kind);
                Ok(())
            }
        }

        let sink = Recorder(std::sync::Mutex::new(Vec::new()));
        let alerts = vec![
            Alert {
                kind: AlertKind::CriticalErrors,
                message: "critical".to_string(),
                severity: Severity::Critical,
                signature: None,
                value: 5.0,
                threshold: 5.0,
                timestamp: Utc::now(),
            },
            Alert {
                kind: AlertKind::ErrorRate,
                message: "rate".to_string(),
                severity: Severity::High,
                signature: None,
                value: 0.7,
                threshold: 0.5,
                timestamp: Utc::now(),
            },
        ];

        dispatch_alerts(&alerts, Some(&sink));
        // Only the critical alert reaches the sink
        assert_eq!(sink.0.lock().unwrap().as_slice(), [AlertKind::CriticalErrors]);
    }

    #[test]
    fn test_sink_failure_is_swallowed() {
        struct Failing;
        impl AlertSink for Failing {
            fn notify(&self, _alert: &Alert) -> crate::types::Result<()> {
                Err(crate::types::Error::AlertSink("sink offline".to_string()))
            }
        }

        let alert = Alert {
            kind: AlertKind::CriticalErrors,
            message: "critical".to_string(),
            severity: Severity::Critical,
            signature: None,
            value: 5.0,
            threshold: 5.0,
            timestamp: Utc::now(),
        };

        // Must not panic or propagate
        dispatch_alerts(&[alert], Some(&Failing));
    }
}
