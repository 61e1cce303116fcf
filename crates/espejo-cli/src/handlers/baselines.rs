//! Baselines command handler

use crate::commands::BaselinesArgs;
use crate::error::CliResult;
use crate::output::{OutputFormat, ProgressReporter};
use espejo::{Baseline, BaselineStore};
use serde::Serialize;

/// Listing row for one baseline version
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaselineListing {
    /// Release label
    pub release_version: String,
    /// Per-key sequence number
    pub sequence: u64,
    /// RFC 3339 approval time
    pub approved_at: String,
    /// Approver
    pub approver: String,
    /// Image width
    pub width: u32,
    /// Image height
    pub height: u32,
    /// SHA-256 of the pixels
    pub content_hash: String,
}

impl From<&Baseline> for BaselineListing {
    fn from(b: &Baseline) -> Self {
        Self {
            release_version: b.release_version.clone(),
            sequence: b.sequence,
            approved_at: b.approved_at.to_rfc3339(),
            approver: b.approver.clone(),
            width: b.image.width,
            height: b.image.height,
            content_hash: b.content_hash.clone(),
        }
    }
}

/// Execute the baselines command
pub fn execute_baselines(reporter: &ProgressReporter, args: &BaselinesArgs) -> CliResult<()> {
    let store = BaselineStore::open(&args.store)?;
    let rows: Vec<BaselineListing> = store
        .list_versions(&args.screen, &args.profile)
        .iter()
        .map(|b| BaselineListing::from(b.as_ref()))
        .collect();

    if args.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        reporter.warning(&format!(
            "no baselines for {} on {}",
            args.screen,
            args.profile.key()
        ));
        return Ok(());
    }
    for row in &rows {
        println!("{}", format_row(row));
    }
    Ok(())
}

/// Text row, newest first in the listing
#[must_use]
pub fn format_row(row: &BaselineListing) -> String {
    let short_hash: String = row.content_hash.chars().take(12).collect();
    format!(
        "{:<12} #{:<4} {}x{:<6} {} {} {}",
        row.release_version,
        row.sequence,
        row.width,
        row.height,
        row.approved_at,
        row.approver,
        short_hash
    )
}
