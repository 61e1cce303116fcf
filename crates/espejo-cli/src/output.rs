//! Output formatting and progress reporting

use clap::ValueEnum;
use console::{style, Style, Term};
use espejo::{RunOutcome, RunReportEntry, RunSummary};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON output
    Json,
    /// JUnit XML (run reports only)
    Junit,
}

/// Status lines and spinner on stderr; results go to stdout
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    spinner: Option<ProgressBar>,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            spinner: None,
            use_color,
            quiet,
        }
    }

    /// Start a spinner while a submission is in flight
    pub fn start_spinner(&mut self, message: &str) {
        if self.quiet || !self.term.is_term() {
            return;
        }

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {elapsed_precise} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        self.spinner = Some(pb);
    }

    /// Stop and clear the spinner
    pub fn finish(&mut self) {
        if let Some(pb) = self.spinner.take() {
            pb.finish_and_clear();
        }
    }

    fn line(&self, glyph: &str, plain: &str, styled: impl FnOnce(&str) -> String, message: &str) {
        let prefix = if self.use_color {
            styled(glyph)
        } else {
            plain.to_string()
        };
        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.line("✓", "PASS", |g| style(g).green().bold().to_string(), message);
    }

    /// Print a failure message
    pub fn failure(&self, message: &str) {
        // Failures print even in quiet mode
        self.line("✗", "FAIL", |g| style(g).red().bold().to_string(), message);
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.line("⚠", "WARN", |g| style(g).yellow().bold().to_string(), message);
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.line("ℹ", "INFO", |g| style(g).blue().bold().to_string(), message);
    }

    /// Print one report entry
    pub fn entry(&self, entry: &RunReportEntry) {
        let label = format!("{} on {}", entry.test_case_id, entry.device_profile);
        match entry.outcome {
            RunOutcome::Passed => self.success(&label),
            RunOutcome::FlakyRetry => self.warning(&format!(
                "{label} (flaky, passed after {} attempts)",
                entry.attempts
            )),
            RunOutcome::NewBaseline => {
                self.info(&format!("{label} (new baseline candidate)"));
            }
            RunOutcome::Failed => self.failure(&format!(
                "{label}: {}",
                entry.failure_message().unwrap_or_default()
            )),
        }
    }

    /// Print the run summary
    pub fn summary(&self, summary: &RunSummary, duration: Duration) {
        if self.quiet && summary.failed == 0 {
            return;
        }

        let _ = self.term.write_line("");
        let secs = duration.as_secs_f64();
        let line = if self.use_color {
            let passed_style = Style::new().green().bold();
            let failed_style = Style::new().red().bold();
            let status = if summary.failed > 0 {
                failed_style.apply_to("FAILED")
            } else {
                passed_style.apply_to("PASSED")
            };
            format!(
                "{} {} runs in {:.2}s ({} passed, {} failed, {} flaky, {} new baselines)",
                status,
                summary.total,
                secs,
                passed_style.apply_to(summary.passed),
                if summary.failed > 0 {
                    failed_style.apply_to(summary.failed).to_string()
                } else {
                    summary.failed.to_string()
                },
                style(summary.flaky).yellow(),
                style(summary.new_baseline).cyan()
            )
        } else {
            let status = if summary.failed > 0 { "FAILED" } else { "PASSED" };
            format!(
                "{status} {} runs in {secs:.2}s ({} passed, {} failed, {} flaky, {} new baselines)",
                summary.total, summary.passed, summary.failed, summary.flaky, summary.new_baseline
            )
        };
        let _ = self.term.write_line(&line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_format() {
        assert_eq!(OutputFormat::default(), OutputFormat::Text);
    }

    #[test]
    fn test_value_enum_names() {
        assert_eq!(
            OutputFormat::from_str("junit", true),
            Ok(OutputFormat::Junit)
        );
        assert!(OutputFormat::from_str("tap", true).is_err());
    }

    #[test]
    fn test_quiet_reporter_prints_without_panicking() {
        let mut r = ProgressReporter::new(false, true);
        r.start_spinner("running");
        r.success("ok");
        r.finish();
        r.summary(&RunSummary::default(), Duration::from_millis(10));
    }
}
