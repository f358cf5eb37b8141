//! # Signature Hasher
//!
//! Derives the stable deduplication key that groups occurrences of the
//! same kind of failure. Two failures from the same call site whose
//! messages differ only in embedded IDs or numbers must produce the same
//! signature; that is what makes repeat detection and the strategy cache
//! work.

use std::hash::{Hash, Hasher};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::ErrorCategory;

// Numeric literals (including hex fragments of UUIDs and addresses) are
// replaced so "worker 17 died" and "worker 42 died" collapse together.
static NUMERIC_LITERALS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b0x[0-9a-fA-F]+\b|\d+").expect("numeric pattern is valid"));

static WHITESPACE_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Upper bound on the normalized message fed to the hasher. Longer
/// messages carry no extra dedup signal and just cost cycles.
const NORMALIZED_MESSAGE_LIMIT: usize = 256;

/// Normalizes a failure message for hashing: lower-cased, numeric
/// literals stripped, whitespace collapsed, bounded length.
pub fn normalize_message(message: &str) -> String {
    let lowered = message.to_lowercase();
    let stripped = NUMERIC_LITERALS.replace_all(&lowered, "#");
    let collapsed = WHITESPACE_RUNS.replace_all(stripped.trim(), " ");

    let mut normalized = collapsed.into_owned();
    if normalized.len() > NORMALIZED_MESSAGE_LIMIT {
        let mut cut = NORMALIZED_MESSAGE_LIMIT;
        while !normalized.is_char_boundary(cut) {
            cut -= 1;
        }
        normalized.truncate(cut);
    }
    normalized
}

/// Computes the deduplication signature for a failure.
///
/// The key keeps the call site readable (`category:service:operation`)
/// and appends a short hash of the normalized message, so log output and
/// alerts stay greppable while near-identical messages still collapse.
///
/// The call site is hashed alongside the message, and colons in the
/// readable components are substituted, so a service or operation name
/// containing the separator cannot collide with a different call site.
pub fn signature(
    category: ErrorCategory,
    message: &str,
    service_name: &str,
    operation: &str,
) -> String {
    let normalized = normalize_message(message);

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    service_name.hash(&mut hasher);
    operation.hash(&mut hasher);
    normalized.hash(&mut hasher);
    let digest = hasher.finish();

    format!(
        "{}:{}:{}:{:016x}",
        category,
        service_name.replace(':', "_"),
        operation.replace(':', "_"),
        digest
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_strips_numbers_and_whitespace() {
        assert_eq!(
            normalize_message("Worker   17 died\tat offset 4096"),
            "worker # died at offset #"
        );
        assert_eq!(
            normalize_message("request 0xDEADBEEF failed"),
            "request # failed"
        );
    }

    #[test]
    fn test_numeric_variants_hash_identically() {
        let a = signature(
            ErrorCategory::Network,
            "connection to 10.0.0.1:8080 timed out after 30s",
            "fetcher",
            "pull_docs",
        );
        let b = signature(
            ErrorCategory::Network,
            "connection to 10.9.8.7:9090 timed out after 5s",
            "fetcher",
            "pull_docs",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_call_site_separates_signatures() {
        let a = signature(ErrorCategory::Network, "timed out", "fetcher", "pull_docs");
        let b = signature(ErrorCategory::Network, "timed out", "fetcher", "push_docs");
        let c = signature(ErrorCategory::Cache, "timed out", "fetcher", "pull_docs");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_colons_in_call_site_do_not_collide() {
        // Without escaping, ("svc:a", "op") and ("svc", "a:op") would
        // render the same readable prefix.
        let a = signature(ErrorCategory::Internal, "boom", "svc:a", "op");
        let b = signature(ErrorCategory::Internal, "boom", "svc", "a:op");
        assert_ne!(a, b);

        let sig = signature(ErrorCategory::Internal, "boom", "svc:a", "run:fast");
        assert!(sig.starts_with("internal:svc_a:run_fast:"));
    }

    #[test]
    fn test_signature_shape_is_readable() {
        let sig = signature(ErrorCategory::AiProvider, "rate limit", "enhancer", "summarize");
        assert!(sig.starts_with("ai-provider:enhancer:summarize:"));
        let digest = sig.rsplit(':').next().unwrap();
        assert_eq!(digest.len(), 16);
    }

    #[test]
    fn test_long_messages_are_bounded() {
        let long = "x".repeat(10_000);
        assert!(normalize_message(&long).len() <= 256);
    }
}
