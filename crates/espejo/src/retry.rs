//! Failure classification and bounded retry with backoff.
//!
//! Deterministic outcomes of the artifact under test (diff breach, dimension
//! mismatch, metric regression, failed checks) are [`Classification::ClearFailure`]
//! and never retried. Infrastructure signals from the driver (timeouts,
//! transient capture failures) are [`Classification::Indeterminate`] and
//! retried up to `max_retries` times.

use crate::config::millis;
use crate::result::EspejoError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What went wrong in an attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureContext {
    /// Diff exceeded tolerance
    DiffBreach,
    /// Capture and baseline differ in size
    DimensionMismatch,
    /// A metric regressed past its threshold
    MetricsRegression,
    /// A hard-fail external check failed
    CheckFailed {
        /// Check name
        check: String,
    },
    /// Driver or probe did not answer in time
    DriverTimeout {
        /// Timeout in milliseconds
        ms: u64,
    },
    /// Driver reported a transient failure
    CaptureFailed {
        /// Driver message
        message: String,
    },
    /// Any other error while producing the capture
    Other {
        /// Error message
        message: String,
    },
}

impl FailureContext {
    /// Map a driver/probe error to its context
    #[must_use]
    pub fn from_error(error: &EspejoError) -> Self {
        match error {
            EspejoError::Timeout { ms } => Self::DriverTimeout { ms: *ms },
            EspejoError::InfraTransient { message } => Self::CaptureFailed {
                message: message.clone(),
            },
            EspejoError::DimensionMismatch { .. } => Self::DimensionMismatch,
            other => Self::Other {
                message: other.to_string(),
            },
        }
    }

    /// Short description for reports
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::DiffBreach => "visual diff breach".to_string(),
            Self::DimensionMismatch => "dimension mismatch".to_string(),
            Self::MetricsRegression => "performance regression".to_string(),
            Self::CheckFailed { check } => format!("check {check} failed"),
            Self::DriverTimeout { ms } => format!("driver timed out after {ms}ms"),
            Self::CaptureFailed { message } => format!("capture failed: {message}"),
            Self::Other { message } => message.clone(),
        }
    }
}

/// Retry classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Deterministic failure of the artifact; final
    ClearFailure,
    /// Infrastructure instability; eligible for retry
    Indeterminate,
}

/// Exponential backoff between attempts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBackoff {
    /// Delay before the first retry
    #[serde(rename = "initial_ms", with = "millis")]
    pub initial: Duration,
    /// Growth factor per retry (>= 1)
    pub multiplier: f64,
    /// Upper bound on any delay
    #[serde(rename = "max_ms", with = "millis")]
    pub max: Duration,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            multiplier: 2.0,
            max: Duration::from_secs(5),
        }
    }
}

impl RetryBackoff {
    /// Constant delay
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            multiplier: 1.0,
            max: delay,
        }
    }

    /// Delay before retry number `retry` (1-based):
    /// `min(initial * multiplier^(retry - 1), max)`
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let nanos = self.initial.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max.as_nanos() as f64 {
            return self.max;
        }
        Duration::from_nanos(nanos as u64)
    }
}

/// Retry policy for indeterminate failures
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay schedule
    pub backoff: RetryBackoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: RetryBackoff::default(),
        }
    }
}

impl RetryConfig {
    /// Never retry
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: RetryBackoff::default(),
        }
    }

    /// Set maximum retries
    #[must_use]
    pub const fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the backoff schedule
    #[must_use]
    pub const fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// One failed attempt in a run's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// Attempt number (1 = first try)
    pub attempt: u32,
    /// What failed
    pub failure: FailureContext,
    /// How it was classified
    pub classification: Classification,
    /// Delay waited before the next attempt; `None` if finalized
    pub backoff_ms: Option<u64>,
}

/// Stateless retry decisions
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryController;

impl RetryController {
    /// Classify a failure
    #[must_use]
    pub const fn classify(context: &FailureContext) -> Classification {
        match context {
            FailureContext::DriverTimeout { .. } | FailureContext::CaptureFailed { .. } => {
                Classification::Indeterminate
            }
            FailureContext::DiffBreach
            | FailureContext::DimensionMismatch
            | FailureContext::MetricsRegression
            | FailureContext::CheckFailed { .. }
            | FailureContext::Other { .. } => Classification::ClearFailure,
        }
    }

    /// Whether to re-attempt after attempt number `attempt` (1-based) failed
    #[must_use]
    pub const fn should_retry(attempt: u32, classification: Classification, config: &RetryConfig) -> bool {
        matches!(classification, Classification::Indeterminate) && attempt <= config.max_retries
    }

    /// Backoff before the retry following `attempt`
    #[must_use]
    pub fn backoff(attempt: u32, config: &RetryConfig) -> Duration {
        config.backoff.delay(attempt)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    mod classify_tests {
        use super::*;

        #[test]
        fn test_artifact_failures_are_clear() {
            for ctx in [
                FailureContext::DiffBreach,
                FailureContext::DimensionMismatch,
                FailureContext::MetricsRegression,
                FailureContext::CheckFailed { check: "tls".into() },
            ] {
                assert_eq!(RetryController::classify(&ctx), Classification::ClearFailure);
            }
        }

        #[test]
        fn test_infra_failures_are_indeterminate() {
            let timeout = FailureContext::from_error(&EspejoError::Timeout { ms: 500 });
            assert_eq!(timeout, FailureContext::DriverTimeout { ms: 500 });
            assert_eq!(RetryController::classify(&timeout), Classification::Indeterminate);
            let flaky = FailureContext::from_error(&EspejoError::transient("adb disconnected"));
            assert_eq!(RetryController::classify(&flaky), Classification::Indeterminate);
            assert_eq!(flaky.describe(), "capture failed: adb disconnected");
        }

        #[test]
        fn test_other_errors_are_clear() {
            let ctx = FailureContext::from_error(&EspejoError::image("bad png"));
            assert_eq!(RetryController::classify(&ctx), Classification::ClearFailure);
        }
    }

    mod backoff_tests {
        use super::*;

        #[test]
        fn test_exponential_growth_capped() {
            let b = RetryBackoff::default();
            assert_eq!(b.delay(1), Duration::from_millis(100));
            assert_eq!(b.delay(2), Duration::from_millis(200));
            assert_eq!(b.delay(3), Duration::from_millis(400));
            assert_eq!(b.delay(10), Duration::from_secs(5));
            assert_eq!(b.delay(u32::MAX), Duration::from_secs(5));
        }

        #[test]
        fn test_fixed_backoff() {
            let b = RetryBackoff::fixed(Duration::from_millis(25));
            assert_eq!(b.delay(1), b.delay(7));
        }

        #[test]
        fn test_backoff_yaml_in_millis() {
            let cfg: RetryConfig =
                serde_yaml_ng::from_str("max_retries: 4\nbackoff:\n  initial_ms: 50\n").unwrap();
            assert_eq!(cfg.max_retries, 4);
            assert_eq!(cfg.backoff.initial, Duration::from_millis(50));
            assert_eq!(cfg.backoff.max, Duration::from_secs(5));
        }
    }

    mod should_retry_tests {
        use super::*;

        #[test]
        fn test_bounded_by_max_retries() {
            let cfg = RetryConfig::default().with_max_retries(2);
            assert!(RetryController::should_retry(1, Classification::Indeterminate, &cfg));
            assert!(RetryController::should_retry(2, Classification::Indeterminate, &cfg));
            assert!(!RetryController::should_retry(3, Classification::Indeterminate, &cfg));
        }

        #[test]
        fn test_zero_retries() {
            assert!(!RetryController::should_retry(
                1,
                Classification::Indeterminate,
                &RetryConfig::none()
            ));
        }
    }

    proptest! {
        #[test]
        fn prop_clear_failure_never_retried(attempt in 0u32..100, max in 0u32..100) {
            let cfg = RetryConfig::default().with_max_retries(max);
            prop_assert!(!RetryController::should_retry(attempt, Classification::ClearFailure, &cfg));
        }

        #[test]
        fn prop_indeterminate_retried_at_most_max(max in 0u32..20) {
            let cfg = RetryConfig::default().with_max_retries(max);
            let retries = (1..=100u32)
                .take_while(|a| RetryController::should_retry(*a, Classification::Indeterminate, &cfg))
                .count();
            prop_assert_eq!(retries, max as usize);
        }

        #[test]
        fn prop_delay_never_exceeds_max(retry in 1u32..64, mult in 1.0f64..4.0) {
            let b = RetryBackoff { multiplier: mult, ..RetryBackoff::default() };
            prop_assert!(b.delay(retry) <= b.max);
        }
    }
}
