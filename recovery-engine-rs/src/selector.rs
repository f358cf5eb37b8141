//! # Strategy Selector
//!
//! Decides which recovery action to run for a classified failure. A live
//! strategy-cache entry wins outright; otherwise the closed
//! category-default table applies. Critical severity caps any plan at a
//! single attempt so serious failures are never masked behind silent
//! retry loops.

use tracing::debug;

use crate::strategy_cache::StrategyCache;
use crate::types::{ErrorCategory, RecoveryAction, Severity};

/// The selector's decision for one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyPlan {
    /// The action to execute
    pub action: RecoveryAction,
    /// Hard cap on callback invocations for this plan
    pub max_attempts: u32,
    /// Whether the action came from the strategy cache
    pub from_cache: bool,
}

/// Default action for each category. Exhaustive on purpose: adding a
/// category forces a decision here.
pub fn default_action(category: ErrorCategory) -> RecoveryAction {
    match category {
        ErrorCategory::Network | ErrorCategory::AiProvider => RecoveryAction::Retry,
        ErrorCategory::Cache => RecoveryAction::ClearDependentCache,
        ErrorCategory::Filesystem
        | ErrorCategory::Configuration
        | ErrorCategory::Parsing
        | ErrorCategory::Validation => RecoveryAction::Fallback,
        ErrorCategory::Internal | ErrorCategory::Authentication => RecoveryAction::None,
    }
}

/// Picks the recovery plan for a failure, consulting the strategy cache
/// first.
pub fn select(
    cache: &mut StrategyCache,
    signature: &str,
    category: ErrorCategory,
    severity: Severity,
    max_retries: u32,
) -> StrategyPlan {
    let (action, from_cache) = match cache.lookup(signature) {
        Some(entry) => {
            debug!(
                signature = %signature,
                action = %entry.action,
                success_count = %entry.success_count,
                "Using remembered strategy"
            );
            (entry.action, true)
        }
        None => (default_action(category), false),
    };

    let max_attempts = attempts_for(action, severity, max_retries, from_cache);

    StrategyPlan {
        action,
        max_attempts,
        from_cache,
    }
}

fn attempts_for(
    action: RecoveryAction,
    severity: Severity,
    max_retries: u32,
    from_cache: bool,
) -> u32 {
    let base = match action {
        RecoveryAction::None => 0,
        RecoveryAction::Retry => max_retries.max(1),
        // Single-shot actions: one callback invocation each
        RecoveryAction::Fallback
        | RecoveryAction::ClearDependentCache
        | RecoveryAction::RestartService => 1,
    };

    // A remembered strategy resolves with one attempt instead of
    // re-running the full chain.
    let base = if from_cache && action == RecoveryAction::Retry {
        1
    } else {
        base
    };

    // Critical failures get at most one attempt regardless of category.
    if severity == Severity::Critical {
        base.min(1)
    } else {
        base
    }
}
