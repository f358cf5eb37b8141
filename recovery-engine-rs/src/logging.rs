//! # Structured Logging
//!
//! One-shot tracing initialization plus severity-mapped structured
//! logging for handled failures.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::types::{Error, FailureRecord, Result, Severity};

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to use JSON formatting
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: true,
        }
    }
}

/// Initializes the structured logging system
pub fn init_logging(config: Option<LoggingConfig>) -> Result<()> {
    // Don't re-initialize if already done
    if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
        return Ok(());
    }

    let config = config.unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},warn", config.level)));

    let subscriber = Registry::default().with(filter);

    let result = if config.json_format {
        let json_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true);
        tracing::subscriber::set_global_default(subscriber.with(json_layer))
    } else {
        let text_layer = fmt::layer().with_target(true).with_thread_ids(true);
        tracing::subscriber::set_global_default(subscriber.with(text_layer))
    };

    result.map_err(|e| Error::Initialization(format!("failed to set global subscriber: {}", e)))?;

    LOGGING_INITIALIZED.store(true, Ordering::SeqCst);

    tracing::info!(
        level = %config.level,
        json = %config.json_format,
        "Recovery engine logging initialized"
    );

    Ok(())
}

/// Logs a handled failure at the level matching its severity
pub fn log_failure_record(record: &FailureRecord) {
    use tracing::{debug, error, warn};

    match record.severity {
        Severity::Critical | Severity::High => {
            error!(
                failure_id = %record.id,
                signature = %record.signature,
                category = %record.category,
                severity = %record.severity,
                service = %record.service_name,
                operation = %record.operation,
                action = %record.recovery_action,
                recovered = %record.recovery_succeeded,
                attempts = %record.recovery_attempts,
                duration_ms = %record.recovery_duration_ms,
                message = %record.message,
                "Failure handled"
            );
        }
        Severity::Medium => {
            warn!(
                failure_id = %record.id,
                signature = %record.signature,
                category = %record.category,
                service = %record.service_name,
                operation = %record.operation,
                action = %record.recovery_action,
                recovered = %record.recovery_succeeded,
                attempts = %record.recovery_attempts,
                message = %record.message,
                "Failure handled"
            );
        }
        Severity::Low => {
            debug!(
                failure_id = %record.id,
                signature = %record.signature,
                category = %record.category,
                service = %record.service_name,
                action = %record.recovery_action,
                recovered = %record.recovery_succeeded,
                message = %record.message,
                "Failure handled"
            );
        }
    }
}
