//! Retriable-error classification and backoff
//!
//! The injected operation can fail with anything; the only channel for
//! classifying a failure is its message. The transient patterns live in
//! one place so callers can extend them.

use std::time::Duration;

use rand::Rng;
use regex::RegexSet;

use super::config::PoolConfig;

/// Message fragments that mark a failure as transient
pub const RETRIABLE_PATTERNS: &[&str] = &[
    "ETIMEDOUT",
    "ECONNRESET",
    "ENOTFOUND",
    "rate limit",
    "temporary failure",
    "try again",
    "gateway timeout",
    "service unavailable",
];

/// Case-insensitive matcher over the transient-failure patterns
pub struct RetryClassifier {
    patterns: RegexSet,
}

impl RetryClassifier {
    /// Classifier over the built-in pattern set
    pub fn new() -> Self {
        Self::with_extra_patterns(&[])
    }

    /// Classifier over the built-in patterns plus caller extensions
    pub fn with_extra_patterns(extra: &[&str]) -> Self {
        let patterns = RETRIABLE_PATTERNS
            .iter()
            .chain(extra.iter())
            .map(|p| format!("(?i){}", regex::escape(p)));

        Self {
            // Patterns are escaped literals, so the set always compiles
            patterns: RegexSet::new(patterns).expect("escaped literal patterns"),
        }
    }

    /// Whether an error message looks transient
    pub fn is_retriable(&self, message: &str) -> bool {
        self.patterns.is_match(message)
    }
}

impl Default for RetryClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff for the given attempt (1-indexed), with up to 10% jitter
///
/// `min(initial * multiplier^(attempt - 1), max)` plus additive jitter.
pub fn retry_delay(config: &PoolConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let base = config.initial_retry_delay.as_millis() as f64 * config.backoff_multiplier.powi(exponent as i32);
    let capped = base.min(config.max_retry_delay.as_millis() as f64);

    let jitter = capped * rand::rng().random_range(0.0..0.10);
    Duration::from_millis((capped + jitter) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_patterns_are_retriable() {
        let classifier = RetryClassifier::new();

        assert!(classifier.is_retriable("connect ETIMEDOUT 10.0.0.1:443"));
        assert!(classifier.is_retriable("socket hang up: ECONNRESET"));
        assert!(classifier.is_retriable("registry rate limit exceeded"));
        assert!(classifier.is_retriable("503 Service Unavailable"));
        assert!(classifier.is_retriable("504 Gateway Timeout"));
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let classifier = RetryClassifier::new();

        assert!(classifier.is_retriable("etimedout while publishing"));
        assert!(classifier.is_retriable("Temporary Failure in name resolution"));
    }

    #[test]
    fn test_permanent_errors_do_not_match() {
        let classifier = RetryClassifier::new();

        assert!(!classifier.is_retriable("compilation failed: syntax error"));
        assert!(!classifier.is_retriable("exit code 1"));
    }

    #[test]
    fn test_extra_patterns_extend_the_set() {
        let classifier = RetryClassifier::with_extra_patterns(&["EAI_AGAIN"]);

        assert!(classifier.is_retriable("getaddrinfo EAI_AGAIN registry.example"));
        assert!(classifier.is_retriable("ETIMEDOUT"));
    }

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let config = PoolConfig {
            initial_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_millis(350),
            backoff_multiplier: 2.0,
            ..Default::default()
        };

        // Jitter adds at most 10%
        let first = retry_delay(&config, 1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(110));

        let second = retry_delay(&config, 2);
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(220));

        let capped = retry_delay(&config, 10);
        assert!(capped >= Duration::from_millis(350) && capped <= Duration::from_millis(385));
    }
}
