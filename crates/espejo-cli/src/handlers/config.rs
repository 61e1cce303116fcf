//! Config command handler

use crate::commands::{ConfigAction, ConfigArgs};
use crate::error::CliResult;
use crate::output::ProgressReporter;
use espejo::{EspejoError, SubmissionConfig};

/// Execute the config command
pub fn execute_config(reporter: &ProgressReporter, args: &ConfigArgs) -> CliResult<()> {
    match &args.action {
        ConfigAction::Validate { path } => {
            let config = SubmissionConfig::load(path)?;
            config.validate()?;
            reporter.success(&format!("{} is valid", path.display()));
            for line in describe(&config) {
                reporter.info(&line);
            }
        }
        ConfigAction::Show { path } => {
            let config = match path {
                Some(p) => SubmissionConfig::load(p)?,
                None => SubmissionConfig::default(),
            };
            let yaml = serde_yaml_ng::to_string(&config).map_err(EspejoError::from)?;
            print!("{yaml}");
        }
    }
    Ok(())
}

/// Key settings of a config, one per line
#[must_use]
pub fn describe(config: &SubmissionConfig) -> Vec<String> {
    vec![
        format!(
            "max diff ratio {:.4}, channel delta {}",
            config.tolerance.max_diff_ratio, config.tolerance.per_pixel_channel_delta
        ),
        format!(
            "{} ignore / {} critical regions",
            config.tolerance.ignore_regions.len(),
            config.tolerance.critical_regions.len()
        ),
        format!("perf regression threshold {:.1}%", config.perf_regression_percent),
        format!(
            "retries {}, run timeout {}ms, {} slot(s) per profile",
            config.retry.max_retries,
            config.run_timeout.as_millis(),
            config.slots_per_profile
        ),
    ]
}
