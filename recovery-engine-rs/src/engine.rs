//! # Recovery Engine
//!
//! The single entry point the rest of the pipeline calls into. `handle`
//! classifies a failure, derives its signature, selects a strategy
//! (remembered strategies first), executes it, records the outcome, and
//! runs the alert checks. It never returns an error and never panics
//! outward: the caller always gets a `RecoveryOutcome`.
//!
//! Shared mutable state (rolling log, strategy cache, counters) lives
//! behind async mutexes held only across short critical sections;
//! classification and strategy decisions for concurrent calls proceed in
//! parallel, and no lock is ever held across a backoff sleep.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::analytics::{dispatch_alerts, Analytics};
use crate::classify::{categorize, derive_severity};
use crate::config::EngineConfig;
use crate::executor::{RecoveryCallback, RecoveryExecutor};
use crate::logging::log_failure_record;
use crate::selector::select;
use crate::signature::signature;
use crate::strategy_cache::StrategyCache;
use crate::types::{
    AlertSink, AnalyticsSnapshot, CacheInvalidator, Failure, FailureRecord, InvocationContext,
    RecoveryAction, RecoveryOutcome, ServiceRestarter,
};

/// The recovery/alerting engine. One instance serves the whole pipeline;
/// it is cheap to share behind an `Arc`.
pub struct RecoveryEngine {
    config: EngineConfig,
    executor: RecoveryExecutor,
    strategy_cache: Mutex<StrategyCache>,
    analytics: Mutex<Analytics>,
    cache_invalidator: Option<Arc<dyn CacheInvalidator>>,
    alert_sink: Option<Arc<dyn AlertSink>>,
    restarter: Option<Arc<dyn ServiceRestarter>>,
}

impl RecoveryEngine {
    /// Creates an engine with the given configuration and no collaborators
    pub fn new(config: EngineConfig) -> Self {
        Self {
            executor: RecoveryExecutor::new(config.clone()),
            strategy_cache: Mutex::new(StrategyCache::new(
                config.strategy_ttl(),
                config.strategy_capacity,
                config.record_metrics,
            )),
            analytics: Mutex::new(Analytics::new(config.clone())),
            cache_invalidator: None,
            alert_sink: None,
            restarter: None,
            config,
        }
    }

    /// Attaches the cache collaborator used by clear-dependent-cache
    pub fn with_cache_invalidator(mut self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.cache_invalidator = Some(invalidator);
        self
    }

    /// Attaches the external sink that receives critical alerts
    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    /// Attaches the restart hook used by restart-service
    pub fn with_restarter(mut self, restarter: Arc<dyn ServiceRestarter>) -> Self {
        self.restarter = Some(restarter);
        self
    }

    /// Handles one failure end to end and returns the normalized outcome.
    ///
    /// Exactly one `FailureRecord` is appended per call. This method is a
    /// terminal sink: it never returns an error, whatever the callback
    /// does.
    pub async fn handle(
        &self,
        failure: Failure,
        context: InvocationContext,
        callback: Option<RecoveryCallback>,
    ) -> RecoveryOutcome {
        let started = Instant::now();
        let handled_at = Utc::now();

        // Signature needs the category, and severity escalation needs the
        // signature's prior frequency, so categorize first, hash, then
        // derive severity with the repeat count.
        let category = categorize(&failure, &context);
        let sig = signature(
            category,
            &failure.message,
            &context.service_name,
            &context.operation,
        );

        let prior_count = {
            let analytics = self.analytics.lock().await;
            analytics.signature_count(&sig)
        };
        let severity = derive_severity(
            &failure,
            &context,
            category,
            prior_count,
            self.config.same_error_threshold,
        );

        let plan = {
            let mut cache = self.strategy_cache.lock().await;
            select(&mut cache, &sig, category, severity, self.config.max_retries)
        };

        let execution = self
            .executor
            .execute(
                plan,
                callback.as_ref(),
                self.cache_invalidator.as_deref(),
                self.restarter.as_deref(),
                &context,
            )
            .await;

        // Learn from the outcome: a success is remembered for this
        // signature, a failed cached strategy is forgotten.
        {
            let mut cache = self.strategy_cache.lock().await;
            if execution.succeeded && plan.action != RecoveryAction::None {
                cache.record_success(&sig, plan.action);
            } else if !execution.succeeded && plan.from_cache {
                cache.record_failure(&sig);
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;

        let record = FailureRecord {
            id: Uuid::new_v4(),
            signature: sig,
            category,
            severity,
            service_name: context.service_name.clone(),
            operation: context.operation.clone(),
            message: failure.message.clone(),
            raw_details: failure.details.clone(),
            timestamp: handled_at,
            recovery_action: plan.action,
            recovery_succeeded: execution.succeeded,
            recovery_attempts: execution.attempts,
            recovery_duration_ms: duration_ms,
        };

        log_failure_record(&record);

        let alerts = {
            let mut analytics = self.analytics.lock().await;
            analytics.record(record)
        };
        dispatch_alerts(&alerts, self.alert_sink.as_deref());

        let message = if execution.succeeded {
            format!("recovered via {} after {} attempt(s)", plan.action, execution.attempts)
        } else {
            match &execution.last_error {
                Some(err) => format!("unrecovered ({}): {}", plan.action, err),
                None => format!("unrecovered ({})", plan.action),
            }
        };

        let additional_data = if execution.succeeded {
            execution.value
        } else {
            // Preserve the original failure for the caller to inspect.
            serde_json::to_value(&failure).ok()
        };

        RecoveryOutcome {
            success: execution.succeeded,
            action: plan.action,
            message,
            retry_attempts: execution.attempts,
            time_to_recover_ms: duration_ms,
            additional_data,
        }
    }

    /// Computes the current analytics snapshot
    pub async fn get_analytics(&self) -> AnalyticsSnapshot {
        self.analytics.lock().await.snapshot()
    }

    /// Returns the rolling log, most-recent-last
    pub async fn get_log(&self) -> Vec<FailureRecord> {
        self.analytics.lock().await.log()
    }

    /// Resets the log, the counters, the alert state, and the strategy
    /// cache. Used by tests and administrative reset.
    pub async fn clear_log(&self) {
        self.analytics.lock().await.clear();
        self.strategy_cache.lock().await.clear();
    }

    /// The configuration this engine runs with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
