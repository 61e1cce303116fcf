//! Compare command handler

use crate::commands::{CompareArgs, ToleranceArgs};
use crate::error::{CliError, CliResult};
use crate::handlers::read_png;
use crate::output::{OutputFormat, ProgressReporter};
use espejo::{
    DiffEngine, DiffOutcome, DiffResult, Smoothing, SubmissionConfig, ToleranceConfig,
};

/// Execute the compare command; `Ok(true)` when the images match
pub fn execute_compare(reporter: &ProgressReporter, args: &CompareArgs) -> CliResult<bool> {
    if args.format == OutputFormat::Junit {
        return Err(CliError::invalid_argument(
            "junit output is only available for `espejo run`",
        ));
    }

    let base = match &args.config {
        Some(path) => SubmissionConfig::load(path)?.tolerance,
        None => ToleranceConfig::default(),
    };
    let tolerance = apply_overrides(base, &args.tolerance);
    SubmissionConfig::default()
        .with_tolerance(tolerance.clone())
        .validate()?;

    let current = read_png(&args.current)?;
    let reference = read_png(&args.baseline)?;
    let detailed = DiffEngine::compare_detailed(&current, &reference, &tolerance);

    if let Some(out) = &args.diff_out {
        match DiffEngine::render_diff(&current, &detailed)? {
            Some(png) => {
                std::fs::write(out, png)?;
                reporter.info(&format!("diff image written to {}", out.display()));
            }
            None => reporter.warning("no diff image: the images were not compared"),
        }
    }

    let result = detailed.result;
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text | OutputFormat::Junit => {
            println!("{}", describe(&result, &tolerance));
        }
    }
    Ok(result.matches())
}

/// Layer command-line overrides on a base tolerance
#[must_use]
pub fn apply_overrides(mut tolerance: ToleranceConfig, args: &ToleranceArgs) -> ToleranceConfig {
    if let Some(ratio) = args.max_diff_ratio {
        tolerance.max_diff_ratio = ratio;
    }
    if let Some(delta) = args.channel_delta {
        tolerance.per_pixel_channel_delta = delta;
    }
    tolerance
        .ignore_regions
        .extend(args.ignore_regions.iter().copied());
    tolerance
        .critical_regions
        .extend(args.critical_regions.iter().copied());
    if args.smooth {
        tolerance.smoothing = Smoothing::Box3x3;
    }
    tolerance
}

/// Human-readable comparison result
#[must_use]
pub fn describe(result: &DiffResult, tolerance: &ToleranceConfig) -> String {
    let ratio = result.diff_ratio.unwrap_or_default();
    let mut out = match result.outcome {
        DiffOutcome::Match => format!(
            "MATCH: diff ratio {ratio:.4} ({}/{} px) within {:.4}",
            result.pixel_diff_count, result.total_pixels, tolerance.max_diff_ratio
        ),
        DiffOutcome::Breach => format!(
            "BREACH: diff ratio {ratio:.4} ({}/{} px) vs max {:.4}, {} critical px",
            result.pixel_diff_count,
            result.total_pixels,
            tolerance.max_diff_ratio,
            result.critical_pixel_count
        ),
        DiffOutcome::DimensionMismatch => format!(
            "DIMENSION MISMATCH: {}",
            result.error.as_deref().unwrap_or("sizes differ")
        ),
        DiffOutcome::MissingBaseline => "MISSING BASELINE".to_string(),
    };
    for bbox in &result.bounding_boxes {
        out.push_str(&format!(
            "\n  region at ({}, {}) {}x{}: {} px",
            bbox.x, bbox.y, bbox.width, bbox.height, bbox.pixel_count
        ));
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use espejo::{Region, Screenshot};

    const WHITE: [u8; 4] = [255, 255, 255, 255];

    #[test]
    fn test_overrides_layer_on_base() {
        let base = ToleranceConfig::default().with_ignore_region(Region::new(0, 0, 1, 1));
        let args = ToleranceArgs {
            max_diff_ratio: Some(0.2),
            channel_delta: None,
            ignore_regions: vec![Region::new(5, 5, 2, 2)],
            critical_regions: Vec::new(),
            smooth: true,
        };
        let t = apply_overrides(base, &args);
        assert_eq!(t.max_diff_ratio, 0.2);
        assert_eq!(t.per_pixel_channel_delta, 10);
        assert_eq!(t.ignore_regions.len(), 2);
        assert_eq!(t.smoothing, Smoothing::Box3x3);
    }

    #[test]
    fn test_describe_breach_lists_regions() {
        let reference = Screenshot::solid(10, 10, WHITE);
        let current = reference
            .clone()
            .with_region(Region::new(2, 3, 4, 1), [0, 0, 0, 255]);
        let tol = ToleranceConfig::default();
        let r = DiffEngine::compare_images(&current, &reference, &tol);
        let text = describe(&r, &tol);
        assert!(text.starts_with("BREACH: diff ratio 0.0400 (4/100 px)"));
        assert!(text.contains("region at (2, 3) 4x1: 4 px"));
    }

    #[test]
    fn test_describe_mismatch() {
        let tol = ToleranceConfig::default();
        let r = DiffEngine::compare_images(
            &Screenshot::solid(4, 4, WHITE),
            &Screenshot::solid(4, 5, WHITE),
            &tol,
        );
        assert_eq!(describe(&r, &tol), "DIMENSION MISMATCH: expected 4x5, got 4x4");
    }
}
