//! # Strategy Cache
//!
//! A bounded, TTL-based map from failure signature to the recovery action
//! that last succeeded for it. Lets the engine skip the category decision
//! and full retry chain for failure classes it has already learned to
//! resolve, while self-healing when an old fix stops working: a failure
//! while using a cached action evicts the entry.

use std::collections::HashMap;

use chrono::Utc;
use metrics::counter;
use tracing::debug;

use crate::types::{CachedStrategyEntry, RecoveryAction};

/// TTL cache of remembered recovery strategies.
///
/// Expiry is lazy: entries past `expires_at` are treated as absent and
/// purged on lookup, no background sweep.
#[derive(Debug)]
pub struct StrategyCache {
    entries: HashMap<String, CachedStrategyEntry>,
    ttl: chrono::Duration,
    capacity: usize,
    record_metrics: bool,
}

impl StrategyCache {
    /// Creates a cache with the given TTL and capacity
    pub fn new(ttl: chrono::Duration, capacity: usize, record_metrics: bool) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.min(64)),
            ttl,
            capacity,
            record_metrics,
        }
    }

    /// Looks up a live entry for a signature. Expired entries count as
    /// absent and are removed.
    pub fn lookup(&mut self, signature: &str) -> Option<CachedStrategyEntry> {
        let now = Utc::now();

        match self.entries.get(signature) {
            Some(entry) if entry.expires_at > now => {
                if self.record_metrics {
                    counter!("recovery.strategy_cache.hit", 1);
                }
                Some(entry.clone())
            }
            Some(_) => {
                debug!(signature = %signature, "Expired strategy entry purged");
                self.entries.remove(signature);
                if self.record_metrics {
                    counter!("recovery.strategy_cache.expired", 1);
                }
                None
            }
            None => {
                if self.record_metrics {
                    counter!("recovery.strategy_cache.miss", 1);
                }
                None
            }
        }
    }

    /// Remembers that an action succeeded for a signature: inserts a fresh
    /// entry or refreshes an existing one (TTL extended, success count
    /// bumped).
    pub fn record_success(&mut self, signature: &str, action: RecoveryAction) {
        let now = Utc::now();

        if let Some(entry) = self.entries.get_mut(signature) {
            entry.action = action;
            entry.expires_at = now + self.ttl;
            entry.success_count += 1;
            return;
        }

        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        self.entries.insert(
            signature.to_string(),
            CachedStrategyEntry {
                signature: signature.to_string(),
                action,
                created_at: now,
                expires_at: now + self.ttl,
                success_count: 1,
            },
        );

        debug!(signature = %signature, action = %action, "Strategy remembered");
    }

    /// Forgets the entry for a signature after the cached action failed
    /// again, so a stale strategy is never reused indefinitely.
    pub fn record_failure(&mut self, signature: &str) {
        if self.entries.remove(signature).is_some() {
            debug!(signature = %signature, "Stale strategy evicted after failure");
            if self.record_metrics {
                counter!("recovery.strategy_cache.evicted_stale", 1);
            }
        }
    }

    /// Drops every remembered strategy
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries currently held, expired or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .values()
            .min_by_key(|entry| entry.created_at)
            .map(|entry| entry.signature.clone());

        if let Some(signature) = oldest {
            self.entries.remove(&signature);
            if self.record_metrics {
                counter!("recovery.strategy_cache.evicted_capacity", 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_secs: i64, capacity: usize) -> StrategyCache {
        StrategyCache::new(chrono::Duration::seconds(ttl_secs), capacity, false)
    }

    #[test]
    fn test_lookup_returns_recorded_entry() {
        let mut cache = cache(300, 16);
        cache.record_success("sig-a", RecoveryAction::Retry);

        let entry = cache.lookup("sig-a").expect("entry should be live");
        assert_eq!(entry.action, RecoveryAction::Retry);
        assert_eq!(entry.success_count, 1);
        assert!(cache.lookup("sig-b").is_none());
    }

    #[test]
    fn test_repeat_success_refreshes_and_counts() {
        let mut cache = cache(300, 16);
        cache.record_success("sig-a", RecoveryAction::Retry);
        cache.record_success("sig-a", RecoveryAction::ClearDependentCache);

        let entry = cache.lookup("sig-a").unwrap();
        assert_eq!(entry.success_count, 2);
        assert_eq!(entry.action, RecoveryAction::ClearDependentCache);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entries_are_purged_lazily() {
        // Zero TTL: entries are born expired.
        let mut cache = cache(0, 16);
        cache.record_success("sig-a", RecoveryAction::Retry);
        assert_eq!(cache.len(), 1);

        assert!(cache.lookup("sig-a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failure_evicts_entry() {
        let mut cache = cache(300, 16);
        cache.record_success("sig-a", RecoveryAction::Retry);
        cache.record_failure("sig-a");
        assert!(cache.lookup("sig-a").is_none());

        // Removing an absent entry is a no-op
        cache.record_failure("sig-a");
    }

    #[test]
    fn test_capacity_evicts_oldest_created() {
        let mut cache = cache(300, 2);
        cache.record_success("sig-a", RecoveryAction::Retry);
        std::thread::sleep(std::time::Duration::from_millis(5));
        cache.record_success("sig-b", RecoveryAction::Fallback);
        std::thread::sleep(std::time::Duration::from_millis(5));
        cache.record_success("sig-c", RecoveryAction::Retry);

        assert_eq!(cache.len(), 2);
        assert!(cache.lookup("sig-a").is_none());
        assert!(cache.lookup("sig-b").is_some());
        assert!(cache.lookup("sig-c").is_some());
    }
}
