//! Submission configuration.
//!
//! Configuration is an explicit structure, loaded from YAML or JSON by the
//! caller. Durations are written in milliseconds in files.

use crate::checks::CheckRegistry;
use crate::device::DeviceMatrix;
use crate::diff::ToleranceConfig;
use crate::gate::{GateConfig, GatePolicy};
use crate::result::{EspejoError, EspejoResult};
use crate::retry::RetryConfig;
use crate::run::TestSelection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default allowed performance regression in percent
pub const DEFAULT_PERF_REGRESSION_PERCENT: f64 = 20.0;

/// Largest accepted `slots_per_profile`
pub const MAX_SLOTS_PER_PROFILE: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Default per-run timeout
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(30);

/// `Duration` as integer milliseconds
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Everything a submission is evaluated with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Visual tolerances
    pub tolerance: ToleranceConfig,
    /// Retry policy for indeterminate failures
    pub retry: RetryConfig,
    /// Per-category gate policy
    pub gate: GatePolicy,
    /// Allowed mean regression in percent
    pub perf_regression_percent: f64,
    /// Per-attempt timeout for capture and probe
    #[serde(rename = "run_timeout_ms", with = "millis")]
    pub run_timeout: Duration,
    /// Concurrent runs allowed per device profile
    pub slots_per_profile: usize,
    /// Registered external checks to run
    pub checks: Vec<String>,
    /// Baseline version to compare against; latest when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_version: Option<String>,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            tolerance: ToleranceConfig::default(),
            retry: RetryConfig::default(),
            gate: GatePolicy::default(),
            perf_regression_percent: DEFAULT_PERF_REGRESSION_PERCENT,
            run_timeout: DEFAULT_RUN_TIMEOUT,
            slots_per_profile: 1,
            checks: Vec::new(),
            release_version: None,
        }
    }
}

impl SubmissionConfig {
    /// Create a config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from YAML
    ///
    /// # Errors
    ///
    /// Returns error on malformed YAML
    pub fn from_yaml_str(yaml: &str) -> EspejoResult<Self> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    /// Parse from JSON
    ///
    /// # Errors
    ///
    /// Returns error on malformed JSON
    pub fn from_json_str(json: &str) -> EspejoResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a file; `.json` is parsed as JSON, anything else as YAML
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> EspejoResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        if path.extension().is_some_and(|e| e == "json") {
            Self::from_json_str(&raw)
        } else {
            Self::from_yaml_str(&raw)
        }
    }

    /// Set visual tolerances
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: ToleranceConfig) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the gate policy
    #[must_use]
    pub fn with_gate(mut self, gate: GatePolicy) -> Self {
        self.gate = gate;
        self
    }

    /// Set the performance regression threshold
    #[must_use]
    pub const fn with_perf_regression_percent(mut self, percent: f64) -> Self {
        self.perf_regression_percent = percent;
        self
    }

    /// Set the per-attempt timeout
    #[must_use]
    pub const fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Set slots per profile
    #[must_use]
    pub const fn with_slots_per_profile(mut self, slots: usize) -> Self {
        self.slots_per_profile = slots;
        self
    }

    /// Run a registered external check
    #[must_use]
    pub fn with_check(mut self, name: impl Into<String>) -> Self {
        self.checks.push(name.into());
        self
    }

    /// Compare against a specific baseline version
    #[must_use]
    pub fn with_release_version(mut self, version: impl Into<String>) -> Self {
        self.release_version = Some(version.into());
        self
    }

    /// Gate thresholds derived from this config
    #[must_use]
    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            policy: self.gate.clone(),
            max_diff_ratio: self.tolerance.max_diff_ratio,
            perf_regression_percent: self.perf_regression_percent,
        }
    }

    /// Check the configuration on its own
    ///
    /// # Errors
    ///
    /// Returns [`EspejoError::ConfigInvalid`] naming the first bad field
    pub fn validate(&self) -> EspejoResult<()> {
        let ratio = self.tolerance.max_diff_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(EspejoError::config(format!(
                "max_diff_ratio must be within [0, 1], got {ratio}"
            )));
        }
        if !(self.perf_regression_percent >= 0.0) {
            return Err(EspejoError::config(format!(
                "perf_regression_percent must be non-negative, got {}",
                self.perf_regression_percent
            )));
        }
        if self.slots_per_profile == 0 {
            return Err(EspejoError::config("slots_per_profile must be at least 1"));
        }
        if self.slots_per_profile > MAX_SLOTS_PER_PROFILE {
            return Err(EspejoError::config(format!(
                "slots_per_profile must be at most {MAX_SLOTS_PER_PROFILE}, got {}",
                self.slots_per_profile
            )));
        }
        if self.run_timeout.is_zero() {
            return Err(EspejoError::config("run_timeout_ms must be positive"));
        }
        let multiplier = self.retry.backoff.multiplier;
        if !(multiplier >= 1.0) {
            return Err(EspejoError::config(format!(
                "backoff multiplier must be >= 1, got {multiplier}"
            )));
        }
        let regions = self
            .tolerance
            .ignore_regions
            .iter()
            .map(|r| ("ignore", r))
            .chain(self.tolerance.critical_regions.iter().map(|r| ("critical", r)));
        for (kind, region) in regions {
            if region.is_empty() {
                return Err(EspejoError::config(format!(
                    "{kind} region at ({}, {}) has zero area",
                    region.x, region.y
                )));
            }
        }
        Ok(())
    }

    /// Check the configuration against what it will run on
    ///
    /// # Errors
    ///
    /// Returns [`EspejoError::ConfigInvalid`] for any invalid field, an empty
    /// selection or matrix, duplicate test ids, or an unregistered check
    pub fn validate_for(
        &self,
        selection: &TestSelection,
        matrix: &DeviceMatrix,
        registry: &CheckRegistry,
    ) -> EspejoResult<()> {
        self.validate()?;
        if selection.is_empty() {
            return Err(EspejoError::config("test selection is empty"));
        }
        if matrix.is_empty() {
            return Err(EspejoError::config("device matrix is empty"));
        }
        if let Some(id) = selection.duplicate_id() {
            return Err(EspejoError::config(format!("duplicate test case id: {id}")));
        }
        registry.select(&self.checks).map(|_| ())
    }
}
