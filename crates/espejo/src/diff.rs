//! Pixel-level visual regression diffing.
//!
//! [`DiffEngine`] is stateless and deterministic: the same inputs always yield
//! a bit-identical [`DiffResult`], so it can run on any number of worker
//! threads without coordination.
//!
//! # Algorithm
//!
//! 1. Dimension mismatch short-circuits to [`DiffOutcome::DimensionMismatch`].
//! 2. Optional 3×3 box smoothing is applied identically to both images,
//!    after ignored pixels of the current image are reset to the reference.
//! 3. A pixel differs when any RGBA channel delta exceeds
//!    [`ToleranceConfig::per_pixel_channel_delta`]. Pixels inside ignore
//!    regions are neither considered nor counted.
//! 4. `diff_ratio = differing / considered` (0 when nothing is considered).
//! 5. Differing pixels are clustered into 8-connected components; each becomes
//!    a [`BoundingBox`], sorted by `(y, x)`.
//! 6. [`DiffOutcome::Match`] iff `diff_ratio <= max_diff_ratio` and no
//!    differing pixel lies in a critical region.

use crate::baseline::Baseline;
use crate::result::EspejoResult;
use crate::screenshot::{encode_png, Region, Screenshot, BYTES_PER_PIXEL};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Pre-pass applied to both images before comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Smoothing {
    /// Compare raw pixels
    #[default]
    None,
    /// 3×3 box mean with edge clamping, rounded half-up
    Box3x3,
}

/// Visual comparison tolerances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceConfig {
    /// Per-channel absolute difference a pixel may show and still match (0-255)
    pub per_pixel_channel_delta: u8,
    /// Maximum ratio of differing pixels (0.0-1.0), inclusive
    pub max_diff_ratio: f64,
    /// Regions excluded from comparison (dynamic content)
    pub ignore_regions: Vec<Region>,
    /// Regions where any differing pixel is a breach
    pub critical_regions: Vec<Region>,
    /// Smoothing pre-pass
    pub smoothing: Smoothing,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            per_pixel_channel_delta: 10,
            max_diff_ratio: 0.01,
            ignore_regions: Vec::new(),
            critical_regions: Vec::new(),
            smoothing: Smoothing::None,
        }
    }
}

impl ToleranceConfig {
    /// Create the default tolerance
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-channel delta
    #[must_use]
    pub const fn with_channel_delta(mut self, delta: u8) -> Self {
        self.per_pixel_channel_delta = delta;
        self
    }

    /// Set the maximum diff ratio
    #[must_use]
    pub const fn with_max_diff_ratio(mut self, ratio: f64) -> Self {
        self.max_diff_ratio = ratio;
        self
    }

    /// Add an ignore region
    #[must_use]
    pub fn with_ignore_region(mut self, region: Region) -> Self {
        self.ignore_regions.push(region);
        self
    }

    /// Add a critical (must-match) region
    #[must_use]
    pub fn with_critical_region(mut self, region: Region) -> Self {
        self.critical_regions.push(region);
        self
    }

    /// Set the smoothing pre-pass
    #[must_use]
    pub const fn with_smoothing(mut self, smoothing: Smoothing) -> Self {
        self.smoothing = smoothing;
        self
    }
}

/// Outcome of a visual comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffOutcome {
    /// Within tolerance
    Match,
    /// Tolerance exceeded or a critical region changed
    Breach,
    /// Capture and baseline dimensions differ; no pixel work performed
    DimensionMismatch,
    /// No approved baseline exists yet
    MissingBaseline,
}

impl DiffOutcome {
    /// Whether this outcome counts as a visual failure
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Breach | Self::DimensionMismatch)
    }
}

/// Bounding box of one connected cluster of differing pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Differing pixels in the cluster
    pub pixel_count: u64,
}

impl BoundingBox {
    /// The box as a plain region
    #[must_use]
    pub const fn region(&self) -> Region {
        Region::new(self.x, self.y, self.width, self.height)
    }
}

/// Structured result of comparing a capture against a baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    /// Differing pixels outside ignore regions
    pub pixel_diff_count: u64,
    /// Pixels considered (total minus ignored)
    pub total_pixels: u64,
    /// `pixel_diff_count / total_pixels`; absent when no comparison ran
    pub diff_ratio: Option<f64>,
    /// Clusters of differing pixels
    pub bounding_boxes: Vec<BoundingBox>,
    /// Differing pixels inside critical regions
    pub critical_pixel_count: u64,
    /// Largest single channel delta seen on a considered pixel
    pub max_channel_delta: u8,
    /// Outcome
    pub outcome: DiffOutcome,
    /// Detail for non-comparison outcomes
    pub error: Option<String>,
}

impl DiffResult {
    /// Result for a dimension mismatch
    #[must_use]
    pub fn dimension_mismatch(expected: (u32, u32), actual: (u32, u32)) -> Self {
        Self::not_compared(
            DiffOutcome::DimensionMismatch,
            format!(
                "expected {}x{}, got {}x{}",
                expected.0, expected.1, actual.0, actual.1
            ),
        )
    }

    /// Result when no baseline exists
    #[must_use]
    pub fn missing_baseline(screen_id: &str) -> Self {
        Self::not_compared(
            DiffOutcome::MissingBaseline,
            format!("no approved baseline for {screen_id}"),
        )
    }

    fn not_compared(outcome: DiffOutcome, error: String) -> Self {
        Self {
            pixel_diff_count: 0,
            total_pixels: 0,
            diff_ratio: None,
            bounding_boxes: Vec::new(),
            critical_pixel_count: 0,
            max_channel_delta: 0,
            outcome,
            error: Some(error),
        }
    }

    /// Check if the outcome is a match
    #[must_use]
    pub fn matches(&self) -> bool {
        self.outcome == DiffOutcome::Match
    }

    /// Check if images are identical on every considered pixel
    #[must_use]
    pub fn is_identical(&self) -> bool {
        self.diff_ratio.is_some() && self.pixel_diff_count == 0
    }
}

/// Per-pixel map of which pixels differ, kept for visualization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffMask {
    width: u32,
    height: u32,
    differing: Vec<bool>,
}

impl DiffMask {
    /// Whether the pixel at `(x, y)` differs
    #[must_use]
    pub fn is_differing(&self, x: u32, y: u32) -> bool {
        x < self.width
            && y < self.height
            && self.differing[y as usize * self.width as usize + x as usize]
    }

    /// Render a diff visualization over `current`: differing pixels in red,
    /// everything else dimmed, bounding boxes outlined in magenta.
    ///
    /// # Errors
    ///
    /// Returns error if PNG encoding fails
    pub fn render(&self, current: &Screenshot, boxes: &[BoundingBox]) -> EspejoResult<Vec<u8>> {
        let mut out = Vec::with_capacity(current.pixels.len());
        for (i, px) in current.pixels.chunks_exact(BYTES_PER_PIXEL).enumerate() {
            if self.differing.get(i).copied().unwrap_or(false) {
                out.extend_from_slice(&[255, 0, 0, 255]);
            } else {
                out.extend_from_slice(&[px[0] / 2, px[1] / 2, px[2] / 2, 128]);
            }
        }
        for bbox in boxes {
            outline(&mut out, current.width, bbox.region(), [255, 0, 255, 255]);
        }
        encode_png(&out, current.width, current.height)
    }
}

fn outline(pixels: &mut [u8], width: u32, region: Region, rgba: [u8; 4]) {
    if region.is_empty() {
        return;
    }
    let right = region.x + region.width - 1;
    let bottom = region.y + region.height - 1;
    let mut put = |x: u32, y: u32| {
        let i = (y as usize * width as usize + x as usize) * BYTES_PER_PIXEL;
        if i + BYTES_PER_PIXEL <= pixels.len() && pixels[i..i + 3] != [255, 0, 0] {
            pixels[i..i + BYTES_PER_PIXEL].copy_from_slice(&rgba);
        }
    };
    for x in region.x..=right {
        put(x, region.y);
        put(x, bottom);
    }
    for y in region.y..=bottom {
        put(region.x, y);
        put(right, y);
    }
}

/// A diff result together with its pixel mask
#[derive(Debug, Clone, PartialEq)]
pub struct DetailedDiff {
    /// The structured result
    pub result: DiffResult,
    /// The per-pixel mask; absent when no comparison ran
    pub mask: Option<DiffMask>,
}

/// Stateless pixel comparator
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffEngine;

impl DiffEngine {
    /// Compare a capture against an approved baseline
    #[must_use]
    pub fn compare(current: &Screenshot, baseline: &Baseline, tolerance: &ToleranceConfig) -> DiffResult {
        Self::compare_images(current, &baseline.image, tolerance)
    }

    /// Compare two images directly
    #[must_use]
    pub fn compare_images(
        current: &Screenshot,
        reference: &Screenshot,
        tolerance: &ToleranceConfig,
    ) -> DiffResult {
        Self::compare_detailed(current, reference, tolerance).result
    }

    /// Compare and keep the per-pixel mask for visualization
    #[must_use]
    pub fn compare_detailed(
        current: &Screenshot,
        reference: &Screenshot,
        tolerance: &ToleranceConfig,
    ) -> DetailedDiff {
        if current.dimensions() != reference.dimensions() {
            return DetailedDiff {
                result: DiffResult::dimension_mismatch(reference.dimensions(), current.dimensions()),
                mask: None,
            };
        }

        let (width, height) = current.dimensions();
        let ignored = region_mask(&tolerance.ignore_regions, width, height);
        let (cur, reference) = match tolerance.smoothing {
            Smoothing::None => (
                Cow::Borrowed(current.pixels.as_slice()),
                Cow::Borrowed(reference.pixels.as_slice()),
            ),
            Smoothing::Box3x3 => {
                // Ignored pixels take the reference value so they cannot bleed
                let masked = mask_ignored(&current.pixels, &reference.pixels, &ignored);
                (
                    Cow::Owned(box_blur_3x3(&masked, width, height)),
                    Cow::Owned(box_blur_3x3(&reference.pixels, width, height)),
                )
            }
        };

        let pixel_total = width as usize * height as usize;
        let mut differing = vec![false; pixel_total];
        let mut considered = 0u64;
        let mut diff_count = 0u64;
        let mut max_channel_delta = 0u8;

        for (i, (a, b)) in cur
            .chunks_exact(BYTES_PER_PIXEL)
            .zip(reference.chunks_exact(BYTES_PER_PIXEL))
            .enumerate()
        {
            if ignored[i] {
                continue;
            }
            considered += 1;
            let delta = channel_delta(a, b);
            max_channel_delta = max_channel_delta.max(delta);
            if delta > tolerance.per_pixel_channel_delta {
                differing[i] = true;
                diff_count += 1;
            }
        }

        let critical = region_mask(&tolerance.critical_regions, width, height);
        let critical_pixel_count = differing
            .iter()
            .zip(&critical)
            .filter(|(d, c)| **d && **c)
            .count() as u64;

        let diff_ratio = if considered == 0 {
            0.0
        } else {
            diff_count as f64 / considered as f64
        };

        let bounding_boxes = cluster(&differing, width, height);

        let outcome = if diff_ratio <= tolerance.max_diff_ratio && critical_pixel_count == 0 {
            DiffOutcome::Match
        } else {
            DiffOutcome::Breach
        };

        DetailedDiff {
            result: DiffResult {
                pixel_diff_count: diff_count,
                total_pixels: considered,
                diff_ratio: Some(diff_ratio),
                bounding_boxes,
                critical_pixel_count,
                max_channel_delta,
                outcome,
                error: None,
            },
            mask: Some(DiffMask {
                width,
                height,
                differing,
            }),
        }
    }

    /// Render the visualization for a detailed diff; `None` when no pixel
    /// comparison ran
    ///
    /// # Errors
    ///
    /// Returns error if PNG encoding fails
    pub fn render_diff(current: &Screenshot, diff: &DetailedDiff) -> EspejoResult<Option<Vec<u8>>> {
        diff.mask
            .as_ref()
            .map(|mask| mask.render(current, &diff.result.bounding_boxes))
            .transpose()
    }
}

/// Largest absolute per-channel difference between two RGBA pixels
fn channel_delta(a: &[u8], b: &[u8]) -> u8 {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.abs_diff(*y))
        .max()
        .unwrap_or(0)
}

/// Rasterize regions into a row-major membership mask, clipped to bounds
fn region_mask(regions: &[Region], width: u32, height: u32) -> Vec<bool> {
    let mut mask = vec![false; width as usize * height as usize];
    for region in regions {
        let x_end = region.x.saturating_add(region.width).min(width);
        let y_end = region.y.saturating_add(region.height).min(height);
        for y in region.y.min(height)..y_end {
            let row = y as usize * width as usize;
            for x in region.x.min(width)..x_end {
                mask[row + x as usize] = true;
            }
        }
    }
    mask
}

/// 8-connected component labelling; seeds are visited in row-major order
fn cluster(differing: &[bool], width: u32, height: u32) -> Vec<BoundingBox> {
    let w = width as usize;
    let h = height as usize;
    let mut visited = vec![false; differing.len()];
    let mut boxes = Vec::new();
    let mut stack = Vec::new();

    for seed in 0..differing.len() {
        if !differing[seed] || visited[seed] {
            continue;
        }
        visited[seed] = true;
        stack.push(seed);
        let (mut min_x, mut min_y) = (seed % w, seed / w);
        let (mut max_x, mut max_y) = (min_x, min_y);
        let mut count = 0u64;

        while let Some(idx) = stack.pop() {
            count += 1;
            let (x, y) = (idx % w, idx / w);
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);

            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let n = ny * w + nx;
                    if differing[n] && !visited[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        boxes.push(BoundingBox {
            x: min_x as u32,
            y: min_y as u32,
            width: (max_x - min_x + 1) as u32,
            height: (max_y - min_y + 1) as u32,
            pixel_count: count,
        });
    }

    boxes.sort_by_key(|b| (b.y, b.x, b.width, b.height));
    boxes
}

/// Copy of `current` with every ignored pixel replaced by the reference pixel
fn mask_ignored(current: &[u8], reference: &[u8], ignored: &[bool]) -> Vec<u8> {
    let mut out = current.to_vec();
    for ((px, base), skip) in out
        .chunks_exact_mut(BYTES_PER_PIXEL)
        .zip(reference.chunks_exact(BYTES_PER_PIXEL))
        .zip(ignored)
    {
        if *skip {
            px.copy_from_slice(base);
        }
    }
    out
}

/// 3×3 box mean per channel with clamped edges, rounded half-up
fn box_blur_3x3(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as i64;
    let h = height as i64;
    let mut out = vec![0u8; pixels.len()];
    for y in 0..h {
        for x in 0..w {
            let mut sums = [0u32; BYTES_PER_PIXEL];
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let sx = (x + dx).clamp(0, w - 1);
                    let sy = (y + dy).clamp(0, h - 1);
                    let i = (sy * w + sx) as usize * BYTES_PER_PIXEL;
                    for (c, sum) in sums.iter_mut().enumerate() {
                        *sum += u32::from(pixels[i + c]);
                    }
                }
            }
            let o = (y * w + x) as usize * BYTES_PER_PIXEL;
            for (c, sum) in sums.iter().enumerate() {
                out[o + c] = ((sum + 4) / 9) as u8;
            }
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WHITE: [u8; 4] = [255, 255, 255, 255];
    const RED: [u8; 4] = [255, 0, 0, 255];

    fn white(w: u32, h: u32) -> Screenshot {
        Screenshot::solid(w, h, WHITE)
    }

    mod tolerance_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let t = ToleranceConfig::default();
            assert_eq!(t.per_pixel_channel_delta, 10);
            assert!((t.max_diff_ratio - 0.01).abs() < f64::EPSILON);
            assert!(t.ignore_regions.is_empty());
            assert_eq!(t.smoothing, Smoothing::None);
        }

        #[test]
        fn test_partial_yaml_uses_defaults() {
            let t: ToleranceConfig = serde_yaml_ng::from_str("max_diff_ratio: 0.2\n").unwrap();
            assert!((t.max_diff_ratio - 0.2).abs() < f64::EPSILON);
            assert_eq!(t.per_pixel_channel_delta, 10);
        }
    }

    mod compare_tests {
        use super::*;

        #[test]
        fn test_identical_images_match() {
            let r = DiffEngine::compare_images(&white(8, 8), &white(8, 8), &ToleranceConfig::default());
            assert_eq!(r.outcome, DiffOutcome::Match);
            assert_eq!(r.diff_ratio, Some(0.0));
            assert!(r.is_identical());
            assert!(r.bounding_boxes.is_empty());
        }

        #[test]
        fn test_dimension_mismatch_skips_ratio() {
            let r = DiffEngine::compare_images(&white(8, 8), &white(8, 9), &ToleranceConfig::default());
            assert_eq!(r.outcome, DiffOutcome::DimensionMismatch);
            assert_eq!(r.diff_ratio, None);
            assert_eq!(r.total_pixels, 0);
            assert_eq!(r.error.as_deref(), Some("expected 8x9, got 8x8"));
        }

        #[test]
        fn test_five_percent_red_within_ten_percent() {
            let current = white(100, 100).with_region(Region::new(0, 0, 50, 10), RED);
            let tol = ToleranceConfig::default().with_max_diff_ratio(0.10);
            let r = DiffEngine::compare_images(&current, &white(100, 100), &tol);
            assert_eq!(r.outcome, DiffOutcome::Match);
            assert_eq!(r.pixel_diff_count, 500);
            assert!((r.diff_ratio.unwrap() - 0.05).abs() < 1e-12);
        }

        #[test]
        fn test_five_percent_red_breaches_one_percent() {
            let current = white(100, 100).with_region(Region::new(20, 30, 25, 20), RED);
            let tol = ToleranceConfig::default().with_max_diff_ratio(0.01);
            let r = DiffEngine::compare_images(&current, &white(100, 100), &tol);
            assert_eq!(r.outcome, DiffOutcome::Breach);
            assert_eq!(r.bounding_boxes.len(), 1);
            let b = r.bounding_boxes[0];
            assert_eq!(b.region(), Region::new(20, 30, 25, 20));
            assert_eq!(b.pixel_count, 500);
        }

        #[test]
        fn test_ratio_equal_to_threshold_passes() {
            // 1 of 4 pixels differs: ratio exactly 0.25
            let current = white(2, 2).with_region(Region::new(0, 0, 1, 1), RED);
            let tol = ToleranceConfig::default().with_max_diff_ratio(0.25);
            let r = DiffEngine::compare_images(&current, &white(2, 2), &tol);
            assert_eq!(r.diff_ratio, Some(0.25));
            assert_eq!(r.outcome, DiffOutcome::Match);
        }

        #[test]
        fn test_channel_delta_threshold_is_exclusive() {
            let current = Screenshot::solid(1, 1, [100, 100, 100, 255]);
            let reference = Screenshot::solid(1, 1, [110, 100, 100, 255]);
            let at = ToleranceConfig::default().with_channel_delta(10);
            assert_eq!(DiffEngine::compare_images(&current, &reference, &at).pixel_diff_count, 0);
            let below = ToleranceConfig::default().with_channel_delta(9);
            assert_eq!(DiffEngine::compare_images(&current, &reference, &below).pixel_diff_count, 1);
        }

        #[test]
        fn test_alpha_channel_counts() {
            let current = Screenshot::solid(1, 1, [0, 0, 0, 0]);
            let reference = Screenshot::solid(1, 1, [0, 0, 0, 255]);
            let r = DiffEngine::compare_images(&current, &reference, &ToleranceConfig::default());
            assert_eq!(r.pixel_diff_count, 1);
            assert_eq!(r.max_channel_delta, 255);
        }

        #[test]
        fn test_ignore_region_masks_any_magnitude() {
            let region = Region::new(0, 0, 40, 40);
            let current = white(50, 50).with_region(region, [0, 0, 0, 255]);
            let tol = ToleranceConfig::default()
                .with_max_diff_ratio(0.0)
                .with_ignore_region(region);
            let r = DiffEngine::compare_images(&current, &white(50, 50), &tol);
            assert_eq!(r.outcome, DiffOutcome::Match);
            assert_eq!(r.total_pixels, 2500 - 1600);
            assert_eq!(r.pixel_diff_count, 0);
        }

        #[test]
        fn test_smoothing_does_not_spread_ignored_changes() {
            let region = Region::new(15, 15, 10, 10);
            let current = white(40, 40).with_region(region, [0, 0, 0, 255]);
            let tol = ToleranceConfig::default()
                .with_max_diff_ratio(0.0)
                .with_ignore_region(region)
                .with_smoothing(Smoothing::Box3x3);
            let r = DiffEngine::compare_images(&current, &white(40, 40), &tol);
            assert_eq!(r.outcome, DiffOutcome::Match);
            assert_eq!(r.pixel_diff_count, 0);
            assert!(r.bounding_boxes.is_empty());
        }

        #[test]
        fn test_fully_ignored_image_has_zero_ratio() {
            let tol = ToleranceConfig::default().with_ignore_region(Region::new(0, 0, 100, 100));
            let current = white(4, 4).with_region(Region::new(0, 0, 4, 4), RED);
            let r = DiffEngine::compare_images(&current, &white(4, 4), &tol);
            assert_eq!(r.total_pixels, 0);
            assert_eq!(r.diff_ratio, Some(0.0));
            assert_eq!(r.outcome, DiffOutcome::Match);
        }

        #[test]
        fn test_critical_region_forces_breach() {
            let current = white(100, 100).with_region(Region::new(5, 5, 1, 1), RED);
            let tol = ToleranceConfig::default()
                .with_max_diff_ratio(0.5)
                .with_critical_region(Region::new(0, 0, 10, 10));
            let r = DiffEngine::compare_images(&current, &white(100, 100), &tol);
            assert_eq!(r.critical_pixel_count, 1);
            assert_eq!(r.outcome, DiffOutcome::Breach);
        }

        #[test]
        fn test_ignore_wins_over_critical() {
            let region = Region::new(0, 0, 10, 10);
            let current = white(20, 20).with_region(region, RED);
            let tol = ToleranceConfig::default()
                .with_ignore_region(region)
                .with_critical_region(region);
            let r = DiffEngine::compare_images(&current, &white(20, 20), &tol);
            assert_eq!(r.critical_pixel_count, 0);
            assert_eq!(r.outcome, DiffOutcome::Match);
        }

        #[test]
        fn test_compare_against_baseline() {
            let baseline = Baseline::new(
                "home",
                crate::device::DeviceProfile::new("pixel-8", "14", "en-US", crate::device::FormFactor::Phone),
                "v1",
                white(4, 4),
                "qa",
            );
            let r = DiffEngine::compare(&white(4, 4), &baseline, &ToleranceConfig::default());
            assert!(r.matches());
        }
    }

    mod cluster_tests {
        use super::*;

        #[test]
        fn test_diagonal_pixels_join_one_cluster() {
            let current = white(5, 5)
                .with_region(Region::new(0, 0, 1, 1), RED)
                .with_region(Region::new(1, 1, 1, 1), RED)
                .with_region(Region::new(2, 2, 1, 1), RED);
            let r = DiffEngine::compare_images(&current, &white(5, 5), &ToleranceConfig::default());
            assert_eq!(r.bounding_boxes.len(), 1);
            assert_eq!(r.bounding_boxes[0].region(), Region::new(0, 0, 3, 3));
            assert_eq!(r.bounding_boxes[0].pixel_count, 3);
        }

        #[test]
        fn test_separate_clusters_sorted_by_position() {
            let current = white(20, 20)
                .with_region(Region::new(15, 10, 2, 2), RED)
                .with_region(Region::new(2, 10, 2, 2), RED)
                .with_region(Region::new(8, 1, 1, 1), RED);
            let r = DiffEngine::compare_images(&current, &white(20, 20), &ToleranceConfig::default());
            let origins: Vec<(u32, u32)> = r.bounding_boxes.iter().map(|b| (b.x, b.y)).collect();
            assert_eq!(origins, vec![(8, 1), (2, 10), (15, 10)]);
        }

        #[test]
        fn test_l_shape_box_covers_extent() {
            let current = white(10, 10)
                .with_region(Region::new(5, 0, 1, 5), RED)
                .with_region(Region::new(0, 4, 5, 1), RED);
            let r = DiffEngine::compare_images(&current, &white(10, 10), &ToleranceConfig::default());
            assert_eq!(r.bounding_boxes.len(), 1);
            assert_eq!(r.bounding_boxes[0].region(), Region::new(0, 0, 6, 5));
        }
    }

    mod smoothing_tests {
        use super::*;

        #[test]
        fn test_blur_of_uniform_image_is_identity() {
            let shot = Screenshot::solid(3, 3, [10, 20, 30, 255]);
            assert_eq!(box_blur_3x3(&shot.pixels, 3, 3), shot.pixels);
        }

        #[test]
        fn test_smoothing_suppresses_single_pixel_noise() {
            let current = Screenshot::solid(9, 9, [100, 100, 100, 255])
                .with_region(Region::new(4, 4, 1, 1), [140, 100, 100, 255]);
            let reference = Screenshot::solid(9, 9, [100, 100, 100, 255]);
            let raw = ToleranceConfig::default();
            assert_eq!(DiffEngine::compare_images(&current, &reference, &raw).pixel_diff_count, 1);
            let smoothed = raw.with_smoothing(Smoothing::Box3x3);
            assert_eq!(
                DiffEngine::compare_images(&current, &reference, &smoothed).pixel_diff_count,
                0
            );
        }
    }

    mod render_tests {
        use super::*;

        #[test]
        fn test_render_highlights_differences() {
            let current = white(6, 6).with_region(Region::new(2, 2, 2, 2), RED);
            let detailed =
                DiffEngine::compare_detailed(&current, &white(6, 6), &ToleranceConfig::default());
            let mask = detailed.mask.unwrap();
            assert!(mask.is_differing(2, 2));
            assert!(!mask.is_differing(0, 0));
            assert!(!mask.is_differing(99, 0));
            let png = mask.render(&current, &detailed.result.bounding_boxes).unwrap();
            let rendered = Screenshot::from_png(&png).unwrap();
            assert_eq!(rendered.pixel(2, 2), RED);
            assert_eq!(rendered.pixel(0, 0), [127, 127, 127, 128]);
        }

        #[test]
        fn test_mismatch_has_no_mask() {
            let d = DiffEngine::compare_detailed(&white(2, 2), &white(3, 3), &ToleranceConfig::default());
            assert!(d.mask.is_none());
            assert!(DiffEngine::render_diff(&white(2, 2), &d).unwrap().is_none());
        }
    }

    fn arb_image(w: u32, h: u32) -> impl Strategy<Value = Screenshot> {
        proptest::collection::vec(any::<u8>(), (w * h * 4) as usize)
            .prop_map(move |px| Screenshot::from_rgba(w, h, px).unwrap())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_compare_is_idempotent(a in arb_image(6, 5), b in arb_image(6, 5), delta in any::<u8>()) {
            let tol = ToleranceConfig::default()
                .with_channel_delta(delta)
                .with_critical_region(Region::new(1, 1, 2, 2));
            let first = DiffEngine::compare_images(&a, &b, &tol);
            let second = DiffEngine::compare_images(&a, &b, &tol);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_identical_images_always_match(a in arb_image(5, 5), smooth in any::<bool>()) {
            let smoothing = if smooth { Smoothing::Box3x3 } else { Smoothing::None };
            let tol = ToleranceConfig::default().with_max_diff_ratio(0.0).with_channel_delta(0).with_smoothing(smoothing);
            let r = DiffEngine::compare_images(&a, &a, &tol);
            prop_assert_eq!(r.outcome, DiffOutcome::Match);
            prop_assert_eq!(r.diff_ratio, Some(0.0));
        }

        #[test]
        fn prop_ratio_in_unit_interval(a in arb_image(4, 4), b in arb_image(4, 4)) {
            let r = DiffEngine::compare_images(&a, &b, &ToleranceConfig::default());
            let ratio = r.diff_ratio.unwrap();
            prop_assert!((0.0..=1.0).contains(&ratio));
            let clustered: u64 = r.bounding_boxes.iter().map(|b| b.pixel_count).sum();
            prop_assert_eq!(clustered, r.pixel_diff_count);
        }

        #[test]
        fn prop_changes_inside_ignore_region_never_breach(b in arb_image(6, 6), smooth in any::<bool>()) {
            let region = Region::new(1, 1, 3, 3);
            let mut current = b.clone();
            current.fill_region(region, [1, 2, 3, 4]);
            let smoothing = if smooth { Smoothing::Box3x3 } else { Smoothing::None };
            let tol = ToleranceConfig::default()
                .with_max_diff_ratio(0.0)
                .with_ignore_region(region)
                .with_smoothing(smoothing);
            let r = DiffEngine::compare_images(&current, &b, &tol);
            prop_assert_eq!(r.outcome, DiffOutcome::Match);
        }
    }
}
