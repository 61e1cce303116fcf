//! Run reports and CI rendering.

use crate::checks::ExternalFinding;
use crate::config::millis;
use crate::device::DeviceProfile;
use crate::diff::DiffResult;
use crate::gate::QualityGateDecision;
use crate::metrics::MetricsSummary;
use crate::result::EspejoResult;
use crate::retry::RetryAttempt;
use crate::run::RunOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

/// Result of one (test case, device profile) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReportEntry {
    /// Test case id
    pub test_case_id: String,
    /// Screen captured
    pub screen_id: String,
    /// Target profile
    pub device_profile: DeviceProfile,
    /// Final outcome
    pub outcome: RunOutcome,
    /// Attempts made (1 = no retries)
    pub attempts: u32,
    /// Diff of the final attempt; absent if no capture succeeded
    pub diff: Option<DiffResult>,
    /// Metric summaries of the final attempt
    pub metrics: Vec<MetricsSummary>,
    /// External check results of the final attempt
    pub external_findings: Vec<ExternalFinding>,
    /// Gate decision of the final attempt
    pub decision: Option<QualityGateDecision>,
    /// Failed attempts, in order
    pub retry_history: Vec<RetryAttempt>,
    /// Infrastructure or internal error that ended the run
    pub error: Option<String>,
    /// Wall time including retries and backoff
    #[serde(rename = "duration_ms", with = "millis")]
    pub duration: Duration,
    /// Where this run's artifacts were written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<PathBuf>,
}

impl RunReportEntry {
    /// Human-readable failure description; `None` unless the run failed
    #[must_use]
    pub fn failure_message(&self) -> Option<String> {
        if !self.outcome.is_failure() {
            return None;
        }
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        let reasons: Vec<String> = self
            .decision
            .iter()
            .flat_map(|d| d.blocking_reasons())
            .map(ToString::to_string)
            .collect();
        if reasons.is_empty() {
            Some("failed".to_string())
        } else {
            Some(reasons.join("; "))
        }
    }
}

/// Counts per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Entries
    pub total: usize,
    /// Passed first time
    pub passed: usize,
    /// Failed
    pub failed: usize,
    /// Passed after retry
    pub flaky: usize,
    /// Baseline candidates
    pub new_baseline: usize,
}

/// Report of one submission, ordered by submission (test case × profile)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run id
    pub run_id: String,
    /// Submission time
    pub started_at: DateTime<Utc>,
    /// Finalization time
    pub finished_at: DateTime<Utc>,
    /// One entry per requested pair
    pub entries: Vec<RunReportEntry>,
}

impl RunReport {
    /// Counts per outcome
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let mut s = RunSummary {
            total: self.entries.len(),
            ..RunSummary::default()
        };
        for entry in &self.entries {
            match entry.outcome {
                RunOutcome::Passed => s.passed += 1,
                RunOutcome::Failed => s.failed += 1,
                RunOutcome::FlakyRetry => s.flaky += 1,
                RunOutcome::NewBaseline => s.new_baseline += 1,
            }
        }
        s
    }

    /// True iff no entry failed
    #[must_use]
    pub fn all_passed(&self) -> bool {
        !self.entries.iter().any(|e| e.outcome.is_failure())
    }

    /// Failed entries
    pub fn failures(&self) -> impl Iterator<Item = &RunReportEntry> {
        self.entries.iter().filter(|e| e.outcome.is_failure())
    }

    /// Entry for a pair
    #[must_use]
    pub fn entry(&self, test_case_id: &str, profile: &DeviceProfile) -> Option<&RunReportEntry> {
        self.entries
            .iter()
            .find(|e| e.test_case_id == test_case_id && &e.device_profile == profile)
    }

    /// Total wall time
    #[must_use]
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    /// Pretty JSON document
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> EspejoResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a report written by [`RunReport::to_json`]
    ///
    /// # Errors
    ///
    /// Returns error on malformed JSON
    pub fn from_json(json: &str) -> EspejoResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Render JUnit XML content
    ///
    /// New baselines are reported as skipped; flaky passes note their retries
    /// in `system-out`.
    #[must_use]
    pub fn render_junit(&self) -> String {
        let summary = self.summary();
        let mut xml = String::new();

        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        let _ = writeln!(
            xml,
            r#"<testsuite name="espejo" id="{}" tests="{}" failures="{}" skipped="{}" time="{:.3}">"#,
            escape_xml(&self.run_id),
            summary.total,
            summary.failed,
            summary.new_baseline,
            self.duration().as_secs_f64()
        );

        for entry in &self.entries {
            let _ = writeln!(
                xml,
                r#"  <testcase name="{}" classname="{}" time="{:.3}">"#,
                escape_xml(&entry.test_case_id),
                escape_xml(&entry.device_profile.key()),
                entry.duration.as_secs_f64()
            );

            match entry.outcome {
                RunOutcome::Failed => {
                    let message = entry.failure_message().unwrap_or_default();
                    let _ = writeln!(
                        xml,
                        r#"    <failure message="{}">{}</failure>"#,
                        escape_xml(&message),
                        escape_xml(&message)
                    );
                }
                RunOutcome::NewBaseline => {
                    let _ = writeln!(
                        xml,
                        r#"    <skipped message="new baseline candidate for {}"/>"#,
                        escape_xml(&entry.screen_id)
                    );
                }
                RunOutcome::FlakyRetry => {
                    let _ = writeln!(
                        xml,
                        "    <system-out>passed after {} retries</system-out>",
                        entry.attempts.saturating_sub(1)
                    );
                }
                RunOutcome::Passed => {}
            }

            xml.push_str("  </testcase>\n");
        }

        xml.push_str("</testsuite>\n");
        xml
    }
}

/// Escape XML special characters
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::device::FormFactor;
    use crate::gate::{Category, GateReason};
    use crate::retry::{Classification, FailureContext};

    fn entry(id: &str, outcome: RunOutcome) -> RunReportEntry {
        RunReportEntry {
            test_case_id: id.to_string(),
            screen_id: "home".to_string(),
            device_profile: DeviceProfile::new("pixel-8", "14", "en-US", FormFactor::Phone),
            outcome,
            attempts: 1,
            diff: None,
            metrics: Vec::new(),
            external_findings: Vec::new(),
            decision: None,
            retry_history: Vec::new(),
            error: None,
            duration: Duration::from_millis(1250),
            artifact_dir: None,
        }
    }

    fn report(entries: Vec<RunReportEntry>) -> RunReport {
        let now = Utc::now();
        RunReport {
            run_id: "run-1".to_string(),
            started_at: now,
            finished_at: now,
            entries,
        }
    }

    mod summary_tests {
        use super::*;

        #[test]
        fn test_counts_per_outcome() {
            let r = report(vec![
                entry("a", RunOutcome::Passed),
                entry("b", RunOutcome::Failed),
                entry("c", RunOutcome::FlakyRetry),
                entry("d", RunOutcome::NewBaseline),
                entry("e", RunOutcome::Passed),
            ]);
            let s = r.summary();
            assert_eq!((s.total, s.passed, s.failed, s.flaky, s.new_baseline), (5, 2, 1, 1, 1));
            assert!(!r.all_passed());
            assert_eq!(r.failures().count(), 1);
        }

        #[test]
        fn test_new_baseline_does_not_fail() {
            let r = report(vec![entry("a", RunOutcome::NewBaseline)]);
            assert!(r.all_passed());
        }
    }

    mod failure_message_tests {
        use super::*;

        #[test]
        fn test_error_preferred() {
            let mut e = entry("a", RunOutcome::Failed);
            e.error = Some("driver timed out after 30000ms".into());
            assert_eq!(e.failure_message().as_deref(), Some("driver timed out after 30000ms"));
            assert!(entry("b", RunOutcome::Passed).failure_message().is_none());
        }

        #[test]
        fn test_blocking_reasons_joined() {
            let mut e = entry("a", RunOutcome::Failed);
            e.decision = Some(QualityGateDecision {
                per_category: Vec::new(),
                overall_pass: false,
                reasons: vec![
                    GateReason {
                        category: Category::Visual,
                        subject: "diff-ratio".into(),
                        measured: "0.05".into(),
                        threshold: "0.01".into(),
                        blocking: true,
                    },
                    GateReason {
                        category: Category::Network,
                        subject: "offline".into(),
                        measured: "failed".into(),
                        threshold: "pass".into(),
                        blocking: false,
                    },
                ],
            });
            assert_eq!(
                e.failure_message().unwrap(),
                "[FAIL] visual/diff-ratio: measured 0.05 vs threshold 0.01"
            );
        }
    }

    mod render_tests {
        use super::*;

        #[test]
        fn test_junit_structure() {
            let mut failed = entry("login<&>", RunOutcome::Failed);
            failed.error = Some("bad \"thing\"".into());
            let mut flaky = entry("c", RunOutcome::FlakyRetry);
            flaky.attempts = 3;
            flaky.retry_history = vec![RetryAttempt {
                attempt: 1,
                failure: FailureContext::DriverTimeout { ms: 10 },
                classification: Classification::Indeterminate,
                backoff_ms: Some(100),
            }];
            let xml = report(vec![
                entry("a", RunOutcome::Passed),
                failed,
                flaky,
                entry("d", RunOutcome::NewBaseline),
            ])
            .render_junit();

            assert!(xml.starts_with("<?xml"));
            assert!(xml.contains(r#"tests="4" failures="1" skipped="1""#));
            assert!(xml.contains(r#"name="login&lt;&amp;&gt;""#));
            assert!(xml.contains("bad &quot;thing&quot;"));
            assert!(xml.contains("passed after 2 retries"));
            assert!(xml.contains("<skipped message=\"new baseline candidate for home\"/>"));
            assert!(xml.contains(r#"time="1.250""#));
            assert!(xml.ends_with("</testsuite>\n"));
        }

        #[test]
        fn test_json_round_trip() {
            let r = report(vec![entry("a", RunOutcome::Passed)]);
            let json = r.to_json().unwrap();
            assert!(json.contains("\"duration_ms\": 1250"));
            assert_eq!(RunReport::from_json(&json).unwrap(), r);
        }
    }
}
