//! On-disk run artifacts.
//!
//! Layout, stable across runs so CI can archive and diff it:
//!
//! ```text
//! {root}/{run_id}/report.json
//! {root}/{run_id}/{test_case_id}/{profile_key}/capture.png
//! {root}/{run_id}/{test_case_id}/{profile_key}/diff.png
//! {root}/{run_id}/{test_case_id}/{profile_key}/report.json
//! ```

use crate::device::{sanitize_component, DeviceProfile};
use crate::report::{RunReport, RunReportEntry};
use crate::result::EspejoResult;
use crate::screenshot::Screenshot;
use std::path::{Path, PathBuf};

/// Captured image file name
pub const CAPTURE_FILE: &str = "capture.png";
/// Diff visualization file name
pub const DIFF_FILE: &str = "diff.png";
/// Structured report file name
pub const REPORT_FILE: &str = "report.json";

/// Writes run artifacts under a root directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Store rooted at `root`; directories are created on write
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a whole run
    #[must_use]
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(sanitize_component(run_id))
    }

    /// Directory of one pair within a run
    #[must_use]
    pub fn entry_dir(&self, run_id: &str, test_case_id: &str, profile: &DeviceProfile) -> PathBuf {
        self.run_dir(run_id)
            .join(sanitize_component(test_case_id))
            .join(profile.key())
    }

    /// Write one pair's artifacts and record the directory on the entry
    ///
    /// # Errors
    ///
    /// Returns error if encoding or writing fails
    pub async fn write_entry(
        &self,
        run_id: &str,
        entry: &mut RunReportEntry,
        capture: Option<&Screenshot>,
        diff_png: Option<&[u8]>,
    ) -> EspejoResult<PathBuf> {
        let dir = self.entry_dir(run_id, &entry.test_case_id, &entry.device_profile);
        tokio::fs::create_dir_all(&dir).await?;
        if let Some(shot) = capture {
            tokio::fs::write(dir.join(CAPTURE_FILE), shot.to_png()?).await?;
        }
        if let Some(png) = diff_png {
            tokio::fs::write(dir.join(DIFF_FILE), png).await?;
        }
        entry.artifact_dir = Some(dir.clone());
        let json = serde_json::to_vec_pretty(&*entry)?;
        tokio::fs::write(dir.join(REPORT_FILE), json).await?;
        tracing::debug!(dir = %dir.display(), "artifacts written");
        Ok(dir)
    }

    /// Write the whole-run report
    ///
    /// # Errors
    ///
    /// Returns error if writing fails
    pub async fn write_report(&self, report: &RunReport) -> EspejoResult<PathBuf> {
        let dir = self.run_dir(&report.run_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(REPORT_FILE);
        tokio::fs::write(&path, report.to_json()?).await?;
        Ok(path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::device::FormFactor;
    use crate::run::RunOutcome;
    use chrono::Utc;
    use std::time::Duration;

    fn entry() -> RunReportEntry {
        RunReportEntry {
            test_case_id: "checkout/pay".to_string(),
            screen_id: "pay".to_string(),
            device_profile: DeviceProfile::new("Pixel 8", "14", "de-DE", FormFactor::Phone),
            outcome: RunOutcome::Passed,
            attempts: 1,
            diff: None,
            metrics: Vec::new(),
            external_findings: Vec::new(),
            decision: None,
            retry_history: Vec::new(),
            error: None,
            duration: Duration::from_millis(5),
            artifact_dir: None,
        }
    }

    #[test]
    fn test_paths_are_sanitized() {
        let store = ArtifactStore::new("/tmp/a");
        let profile = DeviceProfile::new("Pixel 8", "14", "de-DE", FormFactor::Phone);
        let dir = store.entry_dir("run-1", "checkout/pay", &profile);
        assert_eq!(
            dir,
            PathBuf::from("/tmp/a/run-1/checkout%2Fpay").join("Pixel%208_14_de-DE_phone")
        );
    }

    #[test]
    fn test_similar_test_ids_get_distinct_dirs() {
        let store = ArtifactStore::new("/tmp/a");
        let profile = DeviceProfile::new("pixel-8", "14", "de-DE", FormFactor::Phone);
        let slash = store.entry_dir("run-1", "checkout/pay", &profile);
        let dash = store.entry_dir("run-1", "checkout-pay", &profile);
        assert_ne!(slash, dash);
    }

    #[tokio::test]
    async fn test_write_entry_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let mut e = entry();
        let shot = Screenshot::solid(3, 2, [9, 9, 9, 255]);
        let dir = store
            .write_entry("run-1", &mut e, Some(&shot), Some(&shot.to_png().unwrap()))
            .await
            .unwrap();

        assert_eq!(e.artifact_dir.as_deref(), Some(dir.as_path()));
        let back = Screenshot::from_png(&std::fs::read(dir.join(CAPTURE_FILE)).unwrap()).unwrap();
        assert_eq!(back.pixels, shot.pixels);
        assert!(dir.join(DIFF_FILE).exists());
        let json = std::fs::read_to_string(dir.join(REPORT_FILE)).unwrap();
        let parsed: RunReportEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.test_case_id, "checkout/pay");
    }

    #[tokio::test]
    async fn test_write_report() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let now = Utc::now();
        let report = RunReport {
            run_id: "run-2".into(),
            started_at: now,
            finished_at: now,
            entries: vec![entry()],
        };
        let path = store.write_report(&report).await.unwrap();
        assert_eq!(path, tmp.path().join("run-2").join(REPORT_FILE));
        let back = RunReport::from_json(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back, report);
    }
}
