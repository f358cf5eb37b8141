//! # Recovery Engine
//!
//! A recovery-oriented error handling engine for the documentation
//! generation pipeline. Every internal service (parsing, AI enhancement,
//! output generation, configuration, caching) funnels failures through
//! this engine instead of propagating raw errors.
//!
//! ## Features
//!
//! - Deterministic failure classification into a closed category set
//! - Stable failure signatures that collapse near-identical messages
//! - A TTL strategy cache remembering which recovery action last worked
//! - Retry with exponential backoff, deadline-aware and panic-isolating
//! - Fallback, cache-invalidation, and service-restart recovery paths
//! - Rolling failure log with on-demand analytics snapshots
//! - Edge-triggered threshold alerting with external sink forwarding
//!

pub mod analytics;
pub mod classify;
pub mod config;
pub mod engine;
pub mod executor;
pub mod logging;
pub mod selector;
pub mod signature;
pub mod strategy_cache;
pub mod types;

// Re-export commonly used types
pub use classify::{categorize, classify, derive_severity};
pub use crate::config::EngineConfig;
pub use engine::RecoveryEngine;
pub use executor::{CallbackFuture, Execution, RecoveryCallback, RecoveryExecutor};
pub use logging::{init_logging, LoggingConfig};
pub use selector::{default_action, StrategyPlan};
pub use signature::signature;
pub use strategy_cache::StrategyCache;
pub use types::{
    Alert, AlertKind, AlertSink, AnalyticsSnapshot, CacheInvalidator, CachedStrategyEntry, Error,
    ErrorCategory, Failure, FailureRecord, InvocationContext, RecoveryAction, RecoveryOutcome,
    Result, ServiceRestarter, Severity, TopError,
};

// The external `config` crate would otherwise shadow our own `config`
// module in this scope.
use ::config as config_rs;

/// Initializes the engine with default settings
pub fn init() -> Result<RecoveryEngine> {
    init_logging(None)?;
    Ok(RecoveryEngine::new(EngineConfig::default()))
}

/// Initializes the engine with settings loaded from a config source
pub fn init_with_config(config: config_rs::Config) -> Result<RecoveryEngine> {
    init_logging(None)?;

    let engine_config = EngineConfig::try_from(config)
        .map_err(|e| Error::Configuration(e.to_string()))?;
    Ok(RecoveryEngine::new(engine_config))
}
