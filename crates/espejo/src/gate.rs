//! Quality gate: per-category threshold evaluation.
//!
//! Each category is configured `hard_fail` (a breach fails the run) or
//! `soft_fail` (a breach is recorded as a warning). `overall_pass` is true iff
//! no hard-fail category breached. Every breach, blocking or not, is listed
//! in `reasons` with its measured value and threshold. A dimension mismatch
//! blocks under either policy since no pixel comparison was possible.

use crate::checks::ExternalFinding;
use crate::diff::{DiffOutcome, DiffResult};
use crate::metrics::MetricsSummary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Gate category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Pixel diff against baseline
    Visual,
    /// Performance regression
    Performance,
    /// Accessibility checker
    Accessibility,
    /// Security checker
    Security,
    /// Network checker
    Network,
    /// Registered custom checks
    Custom,
}

impl Category {
    /// All categories in evaluation order
    pub const ALL: [Self; 6] = [
        Self::Visual,
        Self::Performance,
        Self::Accessibility,
        Self::Security,
        Self::Network,
        Self::Custom,
    ];

    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Visual => "visual",
            Self::Performance => "performance",
            Self::Accessibility => "accessibility",
            Self::Security => "security",
            Self::Network => "network",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a breach in a category does to the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryPolicy {
    /// Any breach fails the run
    HardFail,
    /// Breach recorded as a warning
    SoftFail,
}

/// Policy per category; categories absent from the map use `fallback`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatePolicy {
    /// Explicit per-category policies
    pub categories: BTreeMap<Category, CategoryPolicy>,
    /// Policy for unlisted categories
    pub fallback: CategoryPolicy,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            categories: BTreeMap::from([
                (Category::Visual, CategoryPolicy::HardFail),
                (Category::Performance, CategoryPolicy::HardFail),
                (Category::Security, CategoryPolicy::HardFail),
            ]),
            fallback: CategoryPolicy::SoftFail,
        }
    }
}

impl GatePolicy {
    /// Every category hard-fails
    #[must_use]
    pub fn strict() -> Self {
        Self {
            categories: BTreeMap::new(),
            fallback: CategoryPolicy::HardFail,
        }
    }

    /// Every category only warns
    #[must_use]
    pub fn advisory() -> Self {
        Self {
            categories: BTreeMap::new(),
            fallback: CategoryPolicy::SoftFail,
        }
    }

    /// Override one category
    #[must_use]
    pub fn with(mut self, category: Category, policy: CategoryPolicy) -> Self {
        self.categories.insert(category, policy);
        self
    }

    /// Effective policy for a category
    #[must_use]
    pub fn policy_for(&self, category: Category) -> CategoryPolicy {
        self.categories
            .get(&category)
            .copied()
            .unwrap_or(self.fallback)
    }
}

/// Thresholds and policy the gate evaluates against
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    /// Per-category policy
    pub policy: GatePolicy,
    /// Visual threshold, for reporting
    pub max_diff_ratio: f64,
    /// Allowed mean regression in percent (equal passes)
    pub perf_regression_percent: f64,
}

/// Status of one category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    /// Evaluated, no breach
    Pass,
    /// Breach under soft-fail
    Warn,
    /// Breach under hard-fail
    Fail,
    /// Nothing to evaluate
    Skipped,
}

/// Verdict for one category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryVerdict {
    /// Category
    pub category: Category,
    /// Policy applied
    pub policy: CategoryPolicy,
    /// Resulting status
    pub status: VerdictStatus,
}

/// One breach with measured value and threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReason {
    /// Category breached
    pub category: Category,
    /// What breached (metric name, check name, "diff")
    pub subject: String,
    /// Measured value
    pub measured: String,
    /// Threshold it was held to
    pub threshold: String,
    /// Whether this breach fails the run
    pub blocking: bool,
}

impl fmt::Display for GateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}/{}: measured {} vs threshold {}",
            if self.blocking { "FAIL" } else { "WARN" },
            self.category,
            self.subject,
            self.measured,
            self.threshold
        )
    }
}

/// Final decision for a test run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityGateDecision {
    /// Verdict per category, in [`Category::ALL`] order
    pub per_category: Vec<CategoryVerdict>,
    /// True iff no hard-fail category breached
    pub overall_pass: bool,
    /// Every breach
    pub reasons: Vec<GateReason>,
}

impl QualityGateDecision {
    /// Verdict for a category
    #[must_use]
    pub fn verdict(&self, category: Category) -> Option<&CategoryVerdict> {
        self.per_category.iter().find(|v| v.category == category)
    }

    /// Reasons that failed the run
    pub fn blocking_reasons(&self) -> impl Iterator<Item = &GateReason> {
        self.reasons.iter().filter(|r| r.blocking)
    }
}

/// Threshold evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityGate;

impl QualityGate {
    /// Evaluate all inputs of one run
    #[must_use]
    pub fn evaluate(
        diff_results: &[DiffResult],
        metrics: &[MetricsSummary],
        external: &[ExternalFinding],
        config: &GateConfig,
    ) -> QualityGateDecision {
        let mut breaches: BTreeMap<Category, Vec<Breach>> = BTreeMap::new();
        let mut evaluated: Vec<Category> = Vec::new();

        if !diff_results.is_empty() {
            evaluated.push(Category::Visual);
        }
        for diff in diff_results {
            if let Some(breach) = visual_breach(diff, config.max_diff_ratio) {
                breaches.entry(Category::Visual).or_default().push(breach);
            }
        }

        if !metrics.is_empty() {
            evaluated.push(Category::Performance);
        }
        for summary in metrics {
            if summary.is_regression(config.perf_regression_percent) {
                let delta = summary.regression_delta_percent.unwrap_or_default();
                breaches.entry(Category::Performance).or_default().push(Breach::new(
                    summary.metric_name.clone(),
                    format!("{delta:+.1}% (mean {:.2}{})", summary.mean, summary.unit),
                    format!("{:.1}%", config.perf_regression_percent),
                ));
            }
        }

        for finding in external {
            evaluated.push(finding.category);
            if !finding.result.pass {
                let measured = if finding.result.findings.is_empty() {
                    "failed".to_string()
                } else {
                    finding.result.findings.join("; ")
                };
                breaches.entry(finding.category).or_default().push(Breach::new(
                    finding.check.clone(),
                    measured,
                    "pass".to_string(),
                ));
            }
        }

        let mut per_category = Vec::with_capacity(Category::ALL.len());
        let mut reasons = Vec::new();
        let mut overall_pass = true;

        for category in Category::ALL {
            let policy = config.policy.policy_for(category);
            let status = match breaches.remove(&category) {
                Some(list) => {
                    let hard = policy == CategoryPolicy::HardFail;
                    let mut any_blocking = false;
                    reasons.extend(list.into_iter().map(|breach| {
                        let blocking = hard || breach.fatal;
                        any_blocking |= blocking;
                        GateReason {
                            category,
                            subject: breach.subject,
                            measured: breach.measured,
                            threshold: breach.threshold,
                            blocking,
                        }
                    }));
                    overall_pass &= !any_blocking;
                    if any_blocking {
                        VerdictStatus::Fail
                    } else {
                        VerdictStatus::Warn
                    }
                }
                None if evaluated.contains(&category) => VerdictStatus::Pass,
                None => VerdictStatus::Skipped,
            };
            per_category.push(CategoryVerdict {
                category,
                policy,
                status,
            });
        }

        QualityGateDecision {
            per_category,
            overall_pass,
            reasons,
        }
    }
}

/// One threshold breach before the category policy is applied
struct Breach {
    subject: String,
    measured: String,
    threshold: String,
    /// Blocks regardless of the category policy
    fatal: bool,
}

impl Breach {
    const fn new(subject: String, measured: String, threshold: String) -> Self {
        Self {
            subject,
            measured,
            threshold,
            fatal: false,
        }
    }
}

fn visual_breach(diff: &DiffResult, max_diff_ratio: f64) -> Option<Breach> {
    match diff.outcome {
        DiffOutcome::Match | DiffOutcome::MissingBaseline => None,
        DiffOutcome::DimensionMismatch => Some(Breach {
            subject: "dimensions".to_string(),
            measured: diff.error.clone().unwrap_or_else(|| "mismatch".to_string()),
            threshold: "equal dimensions".to_string(),
            fatal: true,
        }),
        DiffOutcome::Breach if diff.critical_pixel_count > 0 => Some(Breach::new(
            "critical-region".to_string(),
            format!("{} differing pixels", diff.critical_pixel_count),
            "0 differing pixels".to_string(),
        )),
        DiffOutcome::Breach => Some(Breach::new(
            "diff-ratio".to_string(),
            format!(
                "{:.4} ({} px, {} regions)",
                diff.diff_ratio.unwrap_or_default(),
                diff.pixel_diff_count,
                diff.bounding_boxes.len()
            ),
            format!("{max_diff_ratio:.4}"),
        )),
    }
}
