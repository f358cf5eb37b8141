//! # Error Classifier
//!
//! Pure classification of a raw failure into `(category, severity)`.
//! Service-name defaults are consulted first, then refined by inspecting
//! the failure's message and kind phrasing. Deterministic by construction:
//! the same failure and context always classify identically, which is what
//! keeps signatures stable.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{ErrorCategory, Failure, InvocationContext, Severity};

/// Default category per service-name token prefix. Checked in order; the
/// first fragment matching a token wins.
static SERVICE_DEFAULTS: &[(&str, ErrorCategory)] = &[
    ("parse", ErrorCategory::Parsing),
    ("ai", ErrorCategory::AiProvider),
    ("llm", ErrorCategory::AiProvider),
    ("enhance", ErrorCategory::AiProvider),
    ("cache", ErrorCategory::Cache),
    ("config", ErrorCategory::Configuration),
    ("auth", ErrorCategory::Authentication),
    ("output", ErrorCategory::Filesystem),
    ("template", ErrorCategory::Validation),
];

static NETWORK_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)timeout|timed out|connection (refused|reset|closed)|econnrefused|econnreset|socket hang up|dns|unreachable|network")
        .expect("network pattern is valid")
});

static FILESYSTEM_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)permission denied|eacces|enoent|no such file|not a directory|file not found|path .* (not found|does not exist)|read-only file system|disk full|enospc")
        .expect("filesystem pattern is valid")
});

static VALIDATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)schema|invalid (type|shape|format|value)|expected .* (got|found)|missing (required|field)|validation failed|does not match")
        .expect("validation pattern is valid")
});

static AI_PROVIDER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)rate limit|quota|overloaded|model .* (unavailable|not found)|completion failed|provider|too many requests|429")
        .expect("ai provider pattern is valid")
});

static AUTH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)unauthorized|forbidden|invalid (api key|token|credentials)|authentication|access denied|401|403")
        .expect("auth pattern is valid")
});

/// Classifies a failure into a category and severity.
///
/// `prior_signature_count` is how many times this failure's signature has
/// already been seen in the alert window; crossing the repeat threshold
/// escalates severity to critical.
pub fn classify(
    failure: &Failure,
    context: &InvocationContext,
    prior_signature_count: u64,
    same_error_threshold: u64,
) -> (ErrorCategory, Severity) {
    let category = categorize(failure, context);
    let severity = derive_severity(
        failure,
        context,
        category,
        prior_signature_count,
        same_error_threshold,
    );
    (category, severity)
}

/// Determines the failure category from the service default table plus
/// message/kind pattern inspection. Pattern matches override the service
/// default, since the phrasing of the failure is more specific than the
/// call site.
pub fn categorize(failure: &Failure, context: &InvocationContext) -> ErrorCategory {
    let mut haystack = failure.message.clone();
    if let Some(kind) = &failure.kind {
        haystack.push(' ');
        haystack.push_str(kind);
    }

    // Auth phrasing is checked first: an unauthorized response from any
    // service is an authentication problem, not a transport one.
    if AUTH_PATTERN.is_match(&haystack) {
        return ErrorCategory::Authentication;
    }
    if NETWORK_PATTERN.is_match(&haystack) {
        return ErrorCategory::Network;
    }
    if FILESYSTEM_PATTERN.is_match(&haystack) {
        return ErrorCategory::Filesystem;
    }
    if AI_PROVIDER_PATTERN.is_match(&haystack) {
        return ErrorCategory::AiProvider;
    }
    if VALIDATION_PATTERN.is_match(&haystack) {
        return ErrorCategory::Validation;
    }

    let service = context.service_name.to_lowercase();
    for (fragment, category) in SERVICE_DEFAULTS {
        if service_matches(&service, fragment) {
            return *category;
        }
    }

    ErrorCategory::Internal
}

/// Matches a fragment against the hyphen/underscore-delimited tokens of a
/// lowercased service name. Anchoring at token starts keeps incidental
/// substrings (the "ai" in "email-sender", the "parse" in nothing but
/// parser services) from hijacking the default.
fn service_matches(service: &str, fragment: &str) -> bool {
    service
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token.starts_with(fragment))
}

/// Derives the severity for an already-categorized failure.
pub fn derive_severity(
    failure: &Failure,
    context: &InvocationContext,
    category: ErrorCategory,
    prior_signature_count: u64,
    same_error_threshold: u64,
) -> Severity {
    // Repeated failure of the same signature escalates regardless of
    // hints: the threshold counts occurrences within the alert window.
    if same_error_threshold > 0 && prior_signature_count + 1 >= same_error_threshold {
        return Severity::Critical;
    }

    // An explicit hint wins over the category default; the failure site
    // knows more than the taxonomy does.
    if let Some(severity) = failure.severity {
        return severity;
    }
    if let Some(severity) = context.severity {
        return severity;
    }

    match category {
        ErrorCategory::Authentication => Severity::Critical,
        ErrorCategory::Configuration | ErrorCategory::Internal => Severity::High,
        _ => Severity::default(),
    }
}
