//! # Core Recovery Types
//!
//! This module provides the data model shared by every component of the
//! recovery engine: the closed category/severity/action sets, the failure
//! input type, the immutable `FailureRecord` kept in the rolling log, and
//! the `RecoveryOutcome` returned to callers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A type alias for Result with the error type defaulting to our Error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Internal faults of the engine itself (initialization, configuration).
///
/// These never escape `handle`; they only surface from setup entry points
/// such as `init_logging` or config conversion.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Logging or engine initialization failed
    #[error("initialization error: {0}")]
    Initialization(String),
    /// Configuration could not be read or converted
    #[error("configuration error: {0}")]
    Configuration(String),
    /// An alert sink rejected a notification
    #[error("alert sink error: {0}")]
    AlertSink(String),
}

/// Closed set of failure categories handled by the engine.
///
/// Extending the taxonomy means adding a variant here plus a default
/// strategy in the selector; the exhaustive matches keep the two in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Connectivity, timeouts, connection refusals
    Network,
    /// File access, permissions, missing paths
    Filesystem,
    /// Schema or shape mismatches in data
    Validation,
    /// Source parsing failures
    Parsing,
    /// AI provider errors (rate limits, model failures)
    AiProvider,
    /// Cache subsystem failures
    Cache,
    /// Configuration loading or merging failures
    Configuration,
    /// Authentication or authorization failures
    Authentication,
    /// Unclassified internal errors
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Filesystem => "filesystem",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Parsing => "parsing",
            ErrorCategory::AiProvider => "ai-provider",
            ErrorCategory::Cache => "cache",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

/// The severity level of a handled failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// A minor issue that doesn't affect overall functionality
    Low,
    /// A significant issue that may impact some functionality
    Medium,
    /// A serious issue impacting a whole pipeline stage
    High,
    /// A critical issue requiring immediate attention
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

/// Closed set of automated recovery actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryAction {
    /// No automated recovery; surface immediately
    None,
    /// Retry with exponential backoff
    Retry,
    /// Degrade to a safe default supplied by the caller
    Fallback,
    /// Invalidate dependent cache entries, then retry once
    ClearDependentCache,
    /// Signal a service restart, then retry once
    RestartService,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecoveryAction::None => "none",
            RecoveryAction::Retry => "retry",
            RecoveryAction::Fallback => "fallback",
            RecoveryAction::ClearDependentCache => "clear-dependent-cache",
            RecoveryAction::RestartService => "restart-service",
        };
        write!(f, "{}", name)
    }
}

/// A raw failure handed to the engine by a service.
///
/// Services construct these at the failure site with whatever detail they
/// have; the classifier turns message/kind phrasing into a category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    /// Human-readable description of what went wrong
    pub message: String,
    /// Optional free-form kind hint from the failure site (e.g. "timeout")
    pub kind: Option<String>,
    /// Opaque diagnostic payload (stack, response body, context)
    pub details: Option<serde_json::Value>,
    /// Explicit severity hint, overriding the category default
    pub severity: Option<Severity>,
}

impl Failure {
    /// Creates a new failure with the given message
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            kind: None,
            details: None,
            severity: None,
        }
    }

    /// Sets the kind hint
    pub fn kind<S: Into<String>>(mut self, kind: S) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Attaches an opaque diagnostic payload
    pub fn details<V: Serialize>(mut self, details: V) -> Self {
        if let Ok(value) = serde_json::to_value(details) {
            self.details = Some(value);
        }
        self
    }

    /// Sets an explicit severity hint
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Some(kind) => write!(f, "[{}] {}", kind, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl From<std::io::Error> for Failure {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string()).kind(format!("io:{:?}", err.kind()))
    }
}

/// Context describing what a service was attempting when it failed.
///
/// Owned by the caller and only read by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationContext {
    /// The service where the failure originated
    pub service_name: String,
    /// The operation being performed
    pub operation: String,
    /// Arbitrary parameters of the failing call
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// Session identifier for request tracing
    pub session_id: Option<String>,
    /// User identifier, if the operation was user-initiated
    pub user_id: Option<String>,
    /// Request identifier for correlation across services
    pub request_id: Option<String>,
    /// When the surrounding operation started
    pub start_time: DateTime<Utc>,
    /// Remaining budget for the surrounding operation; backoff waits
    /// abort once this would be exceeded
    #[serde(skip)]
    pub deadline: Option<std::time::Instant>,
    /// Explicit severity hint from the caller
    pub severity: Option<Severity>,
}

impl InvocationContext {
    /// Creates a context for the given service and operation
    pub fn new<S: Into<String>, O: Into<String>>(service_name: S, operation: O) -> Self {
        Self {
            service_name: service_name.into(),
            operation: operation.into(),
            parameters: serde_json::Map::new(),
            session_id: None,
            user_id: None,
            request_id: None,
            start_time: Utc::now(),
            deadline: None,
            severity: None,
        }
    }

    /// Adds a parameter describing the failing call
    pub fn parameter<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.parameters.insert(key.into(), value);
        }
        self
    }

    /// Sets the session identifier
    pub fn session_id<S: Into<String>>(mut self, id: S) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Sets the request identifier
    pub fn request_id<S: Into<String>>(mut self, id: S) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Sets the user identifier
    pub fn user_id<S: Into<String>>(mut self, id: S) -> Self {
        self.user_id = Some(id.into());
        self
    }

    /// Sets the deadline after which backoff waits must abort
    pub fn deadline(mut self, deadline: std::time::Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets an explicit severity hint
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// One handled failure, as kept in the rolling log.
///
/// Created exactly once per `handle` invocation and never mutated
/// afterward; evicted oldest-first past the retention limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Unique identifier assigned at handling time
    pub id: Uuid,
    /// Deduplication key (category + normalized message + call site)
    pub signature: String,
    /// Classified category
    pub category: ErrorCategory,
    /// Derived severity
    pub severity: Severity,
    /// The service where the failure originated
    pub service_name: String,
    /// The operation being performed
    pub operation: String,
    /// Human-readable description
    pub message: String,
    /// Opaque diagnostic payload
    pub raw_details: Option<serde_json::Value>,
    /// When handling began
    pub timestamp: DateTime<Utc>,
    /// Which recovery action was attempted
    pub recovery_action: RecoveryAction,
    /// Whether the recovery succeeded
    pub recovery_succeeded: bool,
    /// Number of callback invocations performed
    pub recovery_attempts: u32,
    /// Wall-clock time spent recovering
    pub recovery_duration_ms: u64,
}

/// The normalized result of one `handle` call, returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    /// Whether the failure was recovered from
    pub success: bool,
    /// The recovery action that was attempted
    pub action: RecoveryAction,
    /// Summary of what happened
    pub message: String,
    /// Number of callback invocations performed
    pub retry_attempts: u32,
    /// Wall-clock time spent recovering
    pub time_to_recover_ms: u64,
    /// Recovered value, or the preserved original failure on `None`
    pub additional_data: Option<serde_json::Value>,
}

impl RecoveryOutcome {
    /// Returns true if the recovery produced a usable value
    pub fn is_success(&self) -> bool {
        self.success
    }
}

/// A remembered strategy: the last action that succeeded for a signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedStrategyEntry {
    /// The signature this entry generalizes over
    pub signature: String,
    /// The action that last succeeded
    pub action: RecoveryAction,
    /// When the entry was first created
    pub created_at: DateTime<Utc>,
    /// When the entry stops being trusted
    pub expires_at: DateTime<Utc>,
    /// How many times the action has succeeded for this signature
    pub success_count: u64,
}

/// One entry of the top-errors ranking in an analytics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopError {
    /// The deduplication signature
    pub signature: String,
    /// A representative message for the signature
    pub message: String,
    /// Occurrences within the analytics window
    pub count: u64,
    /// The failure category
    pub category: ErrorCategory,
}

/// Rolling analytics derived from the log; recomputed on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    /// Failures in the analytics window
    pub error_count: u64,
    /// Failures per window slot (count divided by window size)
    pub error_rate: f64,
    /// Mean recovery duration across the window
    pub average_recovery_time_ms: f64,
    /// Recoveries that succeeded since the last reset
    pub successful_recoveries: u64,
    /// Recoveries that failed since the last reset
    pub failed_recoveries: u64,
    /// Most frequent signatures in the window
    pub top_errors: Vec<TopError>,
    /// Critical-severity failures in the window
    pub critical_alerts_in_window: u64,
}

impl AnalyticsSnapshot {
    /// A snapshot with every counter at zero
    pub fn empty() -> Self {
        Self {
            error_count: 0,
            error_rate: 0.0,
            average_recovery_time_ms: 0.0,
            successful_recoveries: 0,
            failed_recoveries: 0,
            top_errors: Vec::new(),
            critical_alerts_in_window: 0,
        }
    }
}

/// Which alert threshold was crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    /// Error rate over the window crossed its threshold
    ErrorRate,
    /// Critical-severity failure count crossed its threshold
    CriticalErrors,
    /// One signature repeated past its threshold
    RepeatedSignature,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertKind::ErrorRate => "error-rate",
            AlertKind::CriticalErrors => "critical-errors",
            AlertKind::RepeatedSignature => "repeated-signature",
        };
        write!(f, "{}", name)
    }
}

/// An edge-triggered alert emitted when a threshold is crossed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Which threshold was crossed
    pub kind: AlertKind,
    /// Human-readable description
    pub message: String,
    /// Severity of the alert itself
    pub severity: Severity,
    /// The offending signature, for repeated-signature alerts
    pub signature: Option<String>,
    /// The observed value at the crossing
    pub value: f64,
    /// The configured threshold
    pub threshold: f64,
    /// When the alert fired
    pub timestamp: DateTime<Utc>,
}

/// Cache collaborator consumed by the clear-dependent-cache action.
pub trait CacheInvalidator: Send + Sync {
    /// Drops cache entries related to the failing operation
    fn invalidate(&self, related_key: &str);
}

/// Alert sink collaborator; receives critical alerts. A sink failure is
/// logged and swallowed, never failing the `handle` call.
pub trait AlertSink: Send + Sync {
    /// Delivers one alert
    fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Restart hook consumed by the restart-service action.
pub trait ServiceRestarter: Send + Sync {
    /// Signals that the named service should be restarted
    fn restart(&self, service_name: &str);
}
