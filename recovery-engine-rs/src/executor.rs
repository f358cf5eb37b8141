//! # Recovery Executor
//!
//! Runs the selected recovery action against the caller-supplied recovery
//! callback. The retry path backs off exponentially between attempts with
//! an optional jitter and a hard cap; backoff waits are async so one
//! caller's delay never stalls another caller's handling, and they abort
//! promptly when the surrounding operation's deadline would be exceeded.
//!
//! Contract: nothing the callback does escapes this module. A callback
//! that returns an error, or panics, is counted as a failed attempt; the
//! executor always produces an `Execution`.

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use metrics::{counter, histogram};
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::selector::StrategyPlan;
use crate::types::{CacheInvalidator, InvocationContext, RecoveryAction, ServiceRestarter};

/// Future returned by one recovery callback invocation
pub type CallbackFuture = BoxFuture<'static, std::result::Result<serde_json::Value, String>>;

/// A zero-argument retryable re-invocation of the original operation,
/// supplied per `handle` call and never stored.
pub type RecoveryCallback = Box<dyn Fn() -> CallbackFuture + Send + Sync>;

/// Outcome of executing one recovery plan.
#[derive(Debug, Clone)]
pub struct Execution {
    /// Whether any attempt produced a usable value
    pub succeeded: bool,
    /// Callback invocations actually performed
    pub attempts: u32,
    /// The recovered value, when successful
    pub value: Option<serde_json::Value>,
    /// Description of the final failed attempt, when unsuccessful
    pub last_error: Option<String>,
}

impl Execution {
    fn failed(attempts: u32, last_error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            attempts,
            value: None,
            last_error: Some(last_error.into()),
        }
    }

    fn recovered(attempts: u32, value: serde_json::Value) -> Self {
        Self {
            succeeded: true,
            attempts,
            value: Some(value),
            last_error: None,
        }
    }
}

/// Executes recovery plans; owns the backoff tunables.
#[derive(Debug, Clone)]
pub struct RecoveryExecutor {
    config: EngineConfig,
}

impl RecoveryExecutor {
    /// Creates an executor with the given configuration
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Runs the plan to completion. Never returns an error and never
    /// propagates a callback panic.
    pub async fn execute(
        &self,
        plan: StrategyPlan,
        callback: Option<&RecoveryCallback>,
        cache_invalidator: Option<&dyn CacheInvalidator>,
        restarter: Option<&dyn ServiceRestarter>,
        context: &InvocationContext,
    ) -> Execution {
        let start = Instant::now();

        let execution = match plan.action {
            RecoveryAction::None => Execution::failed(0, "no automated recovery for this failure"),
            RecoveryAction::Retry => {
                self.retry_loop(plan.max_attempts, callback, context).await
            }
            RecoveryAction::Fallback => self.fallback(callback, context).await,
            RecoveryAction::ClearDependentCache => {
                let related_key = format!("{}:{}", context.service_name, context.operation);
                match cache_invalidator {
                    Some(cache) => {
                        cache.invalidate(&related_key);
                        debug!(
                            service = %context.service_name,
                            operation = %context.operation,
                            related_key = %related_key,
                            "Dependent cache invalidated"
                        );
                    }
                    None => {
                        debug!(related_key = %related_key, "No cache collaborator configured");
                    }
                }
                self.single_attempt(callback, context).await
            }
            RecoveryAction::RestartService => {
                match restarter {
                    Some(restarter) => {
                        restarter.restart(&context.service_name);
                        info!(service = %context.service_name, "Service restart signaled");
                    }
                    None => {
                        debug!(service = %context.service_name, "No restart hook configured");
                    }
                }
                self.single_attempt(callback, context).await
            }
        };

        if self.config.record_metrics {
            counter!("recovery.executions", 1);
            if execution.succeeded {
                counter!("recovery.executions.succeeded", 1);
            } else {
                counter!("recovery.executions.failed", 1);
            }
            histogram!(
                "recovery.execution.duration_ms",
                start.elapsed().as_millis() as f64
            );
        }

        execution
    }

    /// Delay before the attempt following `completed` failed attempts:
    /// `retry_delay * 2^(completed-1)`, capped at the configured maximum,
    /// with optional jitter.
    pub fn backoff_delay(&self, completed: u32) -> Duration {
        let base_ms = self.config.retry_delay_ms as f64;
        let max_ms = self.config.max_backoff_ms as f64;

        let exponent = completed.saturating_sub(1);
        let exp_backoff = base_ms * 2.0_f64.powf(exponent as f64);
        let capped = exp_backoff.min(max_ms);

        let with_jitter = if self.config.jitter_factor > 0.0 {
            let jitter_range = capped * self.config.jitter_factor;
            let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
            (capped + jitter).max(0.0)
        } else {
            capped
        };

        Duration::from_millis(with_jitter as u64)
    }

    async fn retry_loop(
        &self,
        max_attempts: u32,
        callback: Option<&RecoveryCallback>,
        context: &InvocationContext,
    ) -> Execution {
        let callback = match callback {
            Some(callback) => callback,
            None => return Execution::failed(0, "no recovery callback supplied"),
        };
        if max_attempts == 0 {
            return Execution::failed(0, "retry budget exhausted before first attempt");
        }

        let mut last_error = String::from("recovery not attempted");

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.backoff_delay(attempt - 1);

                if deadline_exceeded(context, delay) {
                    warn!(
                        service = %context.service_name,
                        operation = %context.operation,
                        attempt = %attempt,
                        backoff_ms = %delay.as_millis(),
                        "Aborting retries: deadline would be exceeded during backoff"
                    );
                    return Execution::failed(attempt - 1, "operation deadline exceeded during backoff");
                }

                debug!(
                    service = %context.service_name,
                    operation = %context.operation,
                    attempt = %attempt,
                    max_attempts = %max_attempts,
                    backoff_ms = %delay.as_millis(),
                    "Backing off before retry"
                );
                sleep(delay).await;
            }

            match invoke(callback).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            service = %context.service_name,
                            operation = %context.operation,
                            attempt = %attempt,
                            "Recovery succeeded after retries"
                        );
                    }
                    if self.config.record_metrics {
                        counter!("recovery.retry.attempts", attempt as u64);
                    }
                    return Execution::recovered(attempt, value);
                }
                Err(err) => {
                    debug!(
                        service = %context.service_name,
                        operation = %context.operation,
                        attempt = %attempt,
                        max_attempts = %max_attempts,
                        error = %err,
                        "Recovery attempt failed"
                    );
                    last_error = err;
                }
            }
        }

        if self.config.record_metrics {
            counter!("recovery.retry.exhausted", 1);
        }
        Execution::failed(max_attempts, last_error)
    }

    async fn fallback(
        &self,
        callback: Option<&RecoveryCallback>,
        context: &InvocationContext,
    ) -> Execution {
        match callback {
            Some(callback) => match invoke(callback).await {
                Ok(value) => {
                    debug!(
                        service = %context.service_name,
                        operation = %context.operation,
                        "Fallback produced a degraded result"
                    );
                    Execution::recovered(1, value)
                }
                Err(err) => Execution::failed(1, err),
            },
            // No callback: degrade to an explicit empty result.
            None => Execution::recovered(1, serde_json::Value::Null),
        }
    }

    async fn single_attempt(
        &self,
        callback: Option<&RecoveryCallback>,
        _context: &InvocationContext,
    ) -> Execution {
        match callback {
            Some(callback) => match invoke(callback).await {
                Ok(value) => Execution::recovered(1, value),
                Err(err) => Execution::failed(1, err),
            },
            None => Execution::failed(0, "no recovery callback supplied"),
        }
    }
}

/// Runs one callback invocation, converting a panic into a failed
/// attempt.
async fn invoke(callback: &RecoveryCallback) -> std::result::Result<serde_json::Value, String> {
    match std::panic::AssertUnwindSafe(callback()).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "recovery callback panicked".to_string());
            warn!(error = %message, "Recovery callback panicked");
            Err(format!("callback panicked: {}", message))
        }
    }
}

/// Returns true when sleeping for `delay` would overrun the context's
/// deadline.
fn deadline_exceeded(context: &InvocationContext, delay: Duration) -> bool {
    match context.deadline {
        Some(deadline) => match Instant::now().checked_add(delay) {
            Some(wakeup) => wakeup > deadline,
            None => true,
        },
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use crate::selector::StrategyPlan;
    use crate::types::InvocationContext;

    fn executor() -> RecoveryExecutor {
        RecoveryExecutor::new(EngineConfig::default())
    }

    fn ctx() -> InvocationContext {
        InvocationContext::new("fetcher", "pull_docs")
    }

    fn plan(action: RecoveryAction, max_attempts: u32) -> StrategyPlan {
        StrategyPlan {
            action,
            max_attempts,
            from_cache: false,
        }
    }

    fn failing_then_ok(failures: u32) -> (RecoveryCallback, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let callback: RecoveryCallback = Box::new(move || {
            let calls = calls_clone.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    Err(format!("attempt {} failed", n + 1))
                } else {
                    Ok(serde_json::json!({"recovered": true}))
                }
            }
            .boxed()
        });
        (callback, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_on_third_attempt() {
        let (callback, calls) = failing_then_ok(2);

        let execution = executor()
            .execute(plan(RecoveryAction::Retry, 3), Some(&callback), None, None, &ctx())
            .await;

        assert!(execution.succeeded);
        assert_eq!(execution.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_budget() {
        let (callback, calls) = failing_then_ok(u32::MAX);

        let execution = executor()
            .execute(plan(RecoveryAction::Retry, 3), Some(&callback), None, None, &ctx())
            .await;

        assert!(!execution.succeeded);
        assert_eq!(execution.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(execution.last_error.unwrap().contains("attempt 3 failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_between_attempts() {
        let exec = executor();
        assert_eq!(exec.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(exec.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(exec.backoff_delay(3), Duration::from_millis(400));

        // Capped at the configured maximum
        let mut config = EngineConfig::default();
        config.max_backoff_ms = 250;
        let exec = RecoveryExecutor::new(config);
        assert_eq!(exec.backoff_delay(3), Duration::from_millis(250));

        // Wall-clock check under the paused clock: two failures before
        // success means waits of 100ms and 200ms.
        let start = tokio::time::Instant::now();
        let (callback, _) = failing_then_ok(2);
        executor()
            .execute(plan(RecoveryAction::Retry, 3), Some(&callback), None, None, &ctx())
            .await;
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_backoff() {
        let (callback, calls) = failing_then_ok(u32::MAX);
        let context = ctx().deadline(Instant::now() + Duration::from_millis(50));

        let execution = executor()
            .execute(plan(RecoveryAction::Retry, 5), Some(&callback), None, None, &context)
            .await;

        assert!(!execution.succeeded);
        // First attempt ran; the 100ms backoff would overrun the 50ms
        // deadline, so no second attempt.
        assert_eq!(execution.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(execution.last_error.unwrap().contains("deadline"));
    }

    #[tokio::test]
    async fn test_panicking_callback_is_a_failed_attempt() {
        let callback: RecoveryCallback = Box::new(|| {
            async { panic!("boom in callback") }.boxed()
        });

        let execution = executor()
            .execute(plan(RecoveryAction::Fallback, 1), Some(&callback), None, None, &ctx())
            .await;

        assert!(!execution.succeeded);
        assert_eq!(execution.attempts, 1);
        assert!(execution.last_error.unwrap().contains("boom"));
    }

    // The paths below never sleep, so a plain block_on executor is
    // enough.
    #[test]
    fn test_fallback_without_callback_is_noop_success() {
        let execution = tokio_test::block_on(executor().execute(
            plan(RecoveryAction::Fallback, 1),
            None,
            None,
            None,
            &ctx(),
        ));

        assert!(execution.succeeded);
        assert_eq!(execution.attempts, 1);
        assert_eq!(execution.value, Some(serde_json::Value::Null));
    }

    #[test]
    fn test_none_action_performs_no_invocation() {
        let (callback, calls) = failing_then_ok(0);

        let execution = tokio_test::block_on(executor().execute(
            plan(RecoveryAction::None, 0),
            Some(&callback),
            None,
            None,
            &ctx(),
        ));

        assert!(!execution.succeeded);
        assert_eq!(execution.attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_clear_cache_invalidates_then_retries_once() {
        struct Recorder(std::sync::Mutex<Vec<String>>);
        impl CacheInvalidator for Recorder {
            fn invalidate(&self, related_key: &str) {
                self.0.lock().unwrap().push(related_key.to_string());
            }
        }

        let recorder = Recorder(std::sync::Mutex::new(Vec::new()));
        let (callback, calls) = failing_then_ok(0);

        let execution = executor()
            .execute(
                plan(RecoveryAction::ClearDependentCache, 1),
                Some(&callback),
                Some(&recorder),
                None,
                &ctx(),
            )
            .await;

        assert!(execution.succeeded);
        assert_eq!(execution.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.0.lock().unwrap().as_slice(), ["fetcher:pull_docs"]);
    }

    #[tokio::test]
    async fn test_restart_service_signals_hook_once() {
        struct Recorder(AtomicU32);
        impl ServiceRestarter for Recorder {
            fn restart(&self, _service_name: &str) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let recorder = Recorder(AtomicU32::new(0));
        let (callback, _) = failing_then_ok(0);

        let execution = executor()
            .execute(
                plan(RecoveryAction::RestartService, 1),
                Some(&callback),
                None,
                Some(&recorder),
                &ctx(),
            )
            .await;

        assert!(execution.succeeded);
        assert_eq!(recorder.0.load(Ordering::SeqCst), 1);
    }
}
