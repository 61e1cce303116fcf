//! Summarize command handler

use crate::commands::SummarizeArgs;
use crate::error::{CliError, CliResult};
use crate::handlers::read_json;
use crate::output::{OutputFormat, ProgressReporter};
use espejo::{MetricsCollector, MetricsSummary, PerformanceSample};

/// Execute the summarize command; `Ok(true)` when no metric regressed
pub fn execute_summarize(reporter: &ProgressReporter, args: &SummarizeArgs) -> CliResult<bool> {
    if !args.threshold.is_finite() || args.threshold < 0.0 {
        return Err(CliError::invalid_argument(format!(
            "threshold must be a non-negative percentage, got {}",
            args.threshold
        )));
    }

    let samples: Vec<PerformanceSample> = read_json(&args.samples)?;
    let previous: Vec<MetricsSummary> = match &args.previous {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };
    let summaries = MetricsCollector::summarize(&samples, &previous);
    if summaries.is_empty() {
        reporter.warning("no finite samples to summarize");
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
        OutputFormat::Text | OutputFormat::Junit => {
            for s in &summaries {
                println!("{}", format_summary(s, args.threshold));
            }
        }
    }
    Ok(!summaries.iter().any(|s| s.is_regression(args.threshold)))
}

/// One text line per metric
#[must_use]
pub fn format_summary(s: &MetricsSummary, threshold: f64) -> String {
    let mut line = format!(
        "{}: n={} mean={:.2}{unit} p50={:.2}{unit} p95={:.2}{unit} max={:.2}{unit}",
        s.metric_name,
        s.sample_count,
        s.mean,
        s.p50,
        s.p95,
        s.max,
        unit = s.unit
    );
    if let Some(delta) = s.regression_delta_percent {
        line.push_str(&format!(" delta={delta:+.1}%"));
        if s.is_regression(threshold) {
            line.push_str(" REGRESSION");
        }
    }
    line
}
