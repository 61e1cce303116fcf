//! Performance metric aggregation.
//!
//! Samples are grouped by metric name and reduced to a [`MetricsSummary`].
//! Percentiles use linear interpolation between closest ranks:
//! `rank = p / 100 * (n - 1)`, interpolating between `sorted[floor(rank)]`
//! and `sorted[ceil(rank)]`. Non-finite sample values are discarded.
//!
//! Every metric is treated as lower-is-better: a positive
//! `regression_delta_percent` means the current run is slower/larger.

use crate::device::DeviceProfile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

/// A single timed measurement emitted during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    /// Metric name (e.g. "launch_ms", "frame_time")
    pub metric_name: String,
    /// Value
    pub value: f64,
    /// Unit (ms, bytes, fps)
    pub unit: String,
    /// Emission time; files without one are stamped on load
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl PerformanceSample {
    /// Create a sample stamped now
    #[must_use]
    pub fn new(metric_name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            metric_name: metric_name.into(),
            value,
            unit: unit.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a timing sample in milliseconds
    #[must_use]
    pub fn timing(metric_name: impl Into<String>, ms: f64) -> Self {
        Self::new(metric_name, ms, "ms")
    }
}

/// Summary statistics for one metric over one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Metric name
    pub metric_name: String,
    /// Unit of the first sample
    pub unit: String,
    /// Number of finite samples
    pub sample_count: usize,
    /// Mean value
    pub mean: f64,
    /// Median
    pub p50: f64,
    /// 95th percentile
    pub p95: f64,
    /// Maximum value
    pub max: f64,
    /// `(mean - previous.mean) / previous.mean * 100`; `None` on first run
    pub regression_delta_percent: Option<f64>,
}

impl MetricsSummary {
    /// Whether the delta exceeds `threshold_percent` (equal passes)
    #[must_use]
    pub fn is_regression(&self, threshold_percent: f64) -> bool {
        self.regression_delta_percent
            .is_some_and(|delta| delta > threshold_percent)
    }
}

/// Stateless aggregator
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Summarize every metric present in `samples`, ordered by metric name.
    ///
    /// `previous` holds the prior run's summaries; a delta is computed for
    /// each metric that has a matching previous entry.
    #[must_use]
    pub fn summarize(
        samples: &[PerformanceSample],
        previous: &[MetricsSummary],
    ) -> Vec<MetricsSummary> {
        let mut grouped: BTreeMap<&str, Vec<&PerformanceSample>> = BTreeMap::new();
        for sample in samples {
            grouped
                .entry(sample.metric_name.as_str())
                .or_default()
                .push(sample);
        }

        grouped
            .into_iter()
            .filter_map(|(name, group)| {
                let prev = previous.iter().find(|p| p.metric_name == name);
                Self::summarize_group(name, &group, prev)
            })
            .collect()
    }

    /// Summarize the samples of one metric. Returns `None` when no finite sample exists.
    #[must_use]
    pub fn summarize_metric(
        metric_name: &str,
        samples: &[PerformanceSample],
        previous: Option<&MetricsSummary>,
    ) -> Option<MetricsSummary> {
        let group: Vec<&PerformanceSample> = samples
            .iter()
            .filter(|s| s.metric_name == metric_name)
            .collect();
        Self::summarize_group(metric_name, &group, previous)
    }

    fn summarize_group(
        name: &str,
        group: &[&PerformanceSample],
        previous: Option<&MetricsSummary>,
    ) -> Option<MetricsSummary> {
        let mut values: Vec<f64> = group
            .iter()
            .map(|s| s.value)
            .filter(|v| v.is_finite())
            .collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);

        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let unit = group.first().map(|s| s.unit.clone()).unwrap_or_default();

        Some(MetricsSummary {
            metric_name: name.to_string(),
            unit,
            sample_count: count,
            mean,
            p50: percentile(&values, 50.0),
            p95: percentile(&values, 95.0),
            max: values[count - 1],
            regression_delta_percent: previous.and_then(|p| regression_delta(mean, p.mean)),
        })
    }
}

/// Percent change of `current` relative to `previous`; undefined for a zero
/// or non-finite previous mean
#[must_use]
pub fn regression_delta(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 || !previous.is_finite() {
        return None;
    }
    Some((current - previous) / previous * 100.0)
}

/// Linear interpolation between closest ranks over ascending `sorted`
#[must_use]
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let weight = rank - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

type HistoryKey = (String, DeviceProfile);

/// Most recent summaries per `(test case, profile)`, feeding regression deltas
/// into later runs
#[derive(Debug, Default)]
pub struct MetricsHistory {
    entries: RwLock<HashMap<HistoryKey, Vec<MetricsSummary>>>,
}

impl MetricsHistory {
    /// Create an empty history
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Summaries from the previous run of this pair
    #[must_use]
    pub fn previous(&self, test_case_id: &str, profile: &DeviceProfile) -> Vec<MetricsSummary> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(test_case_id.to_string(), profile.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Record this run's summaries, replacing the previous ones
    pub fn record(&self, test_case_id: &str, profile: &DeviceProfile, summaries: Vec<MetricsSummary>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((test_case_id.to_string(), profile.clone()), summaries);
    }

    /// Seed a pair with known summaries (e.g. loaded from a previous report)
    pub fn seed(&self, test_case_id: &str, profile: &DeviceProfile, summaries: Vec<MetricsSummary>) {
        self.record(test_case_id, profile, summaries);
    }
}
