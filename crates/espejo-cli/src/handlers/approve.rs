//! Approve command handler

use crate::commands::ApproveArgs;
use crate::error::CliResult;
use crate::handlers::read_png;
use crate::output::ProgressReporter;
use espejo::{Baseline, BaselineStore};

/// Execute the approve command
pub fn execute_approve(reporter: &ProgressReporter, args: &ApproveArgs) -> CliResult<()> {
    let store = BaselineStore::open(&args.store)?;
    let image = read_png(&args.image)?;
    let baseline = match &args.release {
        Some(version) => store.approve_as(&args.screen, &args.profile, image, &args.approver, version)?,
        None => store.approve(&args.screen, &args.profile, image, &args.approver)?,
    };
    reporter.success(&approval_message(&baseline));
    Ok(())
}

/// One-line description of a fresh approval
#[must_use]
pub fn approval_message(baseline: &Baseline) -> String {
    format!(
        "approved {} on {} as {} (sequence {}, {}x{})",
        baseline.screen_id,
        baseline.device_profile.key(),
        baseline.release_version,
        baseline.sequence,
        baseline.image.width,
        baseline.image.height
    )
}
