//! Run command handler
//!
//! Drives a whole submission from files: a suite (tests and profiles), an
//! optional submission config, a baseline store directory and a directory of
//! pre-recorded captures standing in for the device farm.

use crate::commands::RunArgs;
use crate::error::{CliError, CliResult};
use crate::output::{OutputFormat, ProgressReporter};
use async_trait::async_trait;
use espejo::{
    sanitize_component, ArtifactStore, BaselineStore, DeviceMatrix, DeviceProfile, EspejoError,
    EspejoResult, Orchestrator, RunReport, Screenshot, SubmissionConfig, TestCase, TestSelection,
    UiDriver,
};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Tests and the device profiles to run them on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suite {
    /// Test cases in submission order
    pub tests: Vec<TestCase>,
    /// Device profiles in submission order
    pub profiles: Vec<DeviceProfile>,
}

impl Suite {
    /// Load from YAML, or JSON when the extension is `.json`
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = std::fs::read_to_string(path)?;
        if path.extension().is_some_and(|e| e == "json") {
            Ok(serde_json::from_str(&text)?)
        } else {
            serde_yaml_ng::from_str(&text)
                .map_err(|e| CliError::config(format!("{}: {e}", path.display())))
        }
    }
}

/// Serves captures from `{root}/{screen}/{profile_key}.png`, falling back to
/// `{root}/{screen}.png` for profile-independent screens. The screen id is
/// encoded with [`sanitize_component`] so it always names one entry under root.
#[derive(Debug, Clone)]
pub struct CaptureDirDriver {
    root: PathBuf,
}

impl CaptureDirDriver {
    /// Driver reading from `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Paths tried for a capture, in order
    #[must_use]
    pub fn candidates(&self, screen_id: &str, profile: &DeviceProfile) -> [PathBuf; 2] {
        let screen = sanitize_component(screen_id);
        [
            self.root
                .join(&screen)
                .join(format!("{}.png", profile.key())),
            self.root.join(format!("{screen}.png")),
        ]
    }
}

#[async_trait]
impl UiDriver for CaptureDirDriver {
    async fn capture(&self, screen_id: &str, profile: &DeviceProfile) -> EspejoResult<Screenshot> {
        for path in self.candidates(screen_id, profile) {
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    tracing::debug!(path = %path.display(), "capture loaded");
                    return Screenshot::from_png(&bytes);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(EspejoError::transient(format!(
                        "reading {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        Err(EspejoError::transient(format!(
            "no capture for screen {screen_id} on {}",
            profile.key()
        )))
    }
}

/// Execute the run command; `Ok(true)` when every pair passed the gate
pub fn execute_run(reporter: &mut ProgressReporter, args: &RunArgs) -> CliResult<bool> {
    let suite = Suite::load(&args.suite)?;
    let config = match &args.config {
        Some(path) => SubmissionConfig::load(path)?,
        None => SubmissionConfig::default(),
    };
    let selection = TestSelection::new(suite.tests);
    let matrix = DeviceMatrix::new(suite.profiles);

    let store = Arc::new(BaselineStore::open(&args.store)?);
    let driver = Arc::new(CaptureDirDriver::new(&args.captures));
    let mut orchestrator = Orchestrator::new(driver, store);
    if let Some(dir) = &args.artifacts {
        orchestrator = orchestrator.with_artifacts(ArtifactStore::new(dir));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    reporter.start_spinner(&format!(
        "running {} test(s) on {} profile(s)",
        selection.len(),
        matrix.len()
    ));
    let submitted = runtime.block_on(orchestrator.submit(&selection, &matrix, &config));
    reporter.finish();
    let report = submitted?;

    if let Some(path) = &args.junit {
        std::fs::write(path, report.render_junit())?;
    }
    emit(reporter, &report, args.format)?;
    Ok(report.all_passed())
}

fn emit(reporter: &ProgressReporter, report: &RunReport, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Text => {
            for entry in &report.entries {
                reporter.entry(entry);
            }
            reporter.summary(&report.summary(), report.duration());
        }
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Junit => print!("{}", report.render_junit()),
    }
    Ok(())
}
