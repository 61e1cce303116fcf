//! Captured screen images.
//!
//! Pixels are always held as tightly packed RGBA8, row-major. PNG decoding
//! and encoding go through the `image` crate.

use crate::result::{EspejoError, EspejoResult};
use chrono::{DateTime, Utc};
use image::{ImageEncoder, RgbaImage};
use serde::{Deserialize, Serialize};

/// Bytes per stored pixel
pub const BYTES_PER_PIXEL: usize = 4;

/// Axis-aligned rectangle in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    /// X coordinate of top-left corner
    pub x: u32,
    /// Y coordinate of top-left corner
    pub y: u32,
    /// Width of region
    pub width: u32,
    /// Height of region
    pub height: u32,
}

impl Region {
    /// Create a new region
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Check if a point is within this region
    #[must_use]
    pub const fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x
            && py >= self.y
            && (px - self.x) < self.width
            && (py - self.y) < self.height
    }

    /// Number of pixels covered
    #[must_use]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether the region covers no pixels
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Raw capture of one screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screenshot {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bits per pixel of the source capture before RGBA8 normalization
    pub color_depth: u16,
    /// RGBA8 pixel data
    #[serde(skip)]
    pub pixels: Vec<u8>,
    /// Capture timestamp
    pub captured_at: DateTime<Utc>,
}

impl Screenshot {
    /// Create a screenshot from raw RGBA8 pixels
    ///
    /// # Errors
    ///
    /// Returns error if the buffer length does not match `width * height * 4`
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> EspejoResult<Self> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(EspejoError::image(format!(
                "pixel buffer holds {} bytes, {width}x{height} RGBA needs {expected}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            color_depth: 32,
            pixels,
            captured_at: Utc::now(),
        })
    }

    /// Create a screenshot filled with one color
    #[must_use]
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * BYTES_PER_PIXEL);
        for _ in 0..count {
            pixels.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            color_depth: 32,
            pixels,
            captured_at: Utc::now(),
        }
    }

    /// Decode a PNG (or any format enabled in `image`)
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be decoded
    pub fn from_png(bytes: &[u8]) -> EspejoResult<Self> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| EspejoError::image(format!("Failed to decode image: {e}")))?;
        let color_depth = decoded.color().bits_per_pixel();
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            color_depth,
            pixels: rgba.into_raw(),
            captured_at: Utc::now(),
        })
    }

    /// Encode as PNG
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails
    pub fn to_png(&self) -> EspejoResult<Vec<u8>> {
        encode_png(&self.pixels, self.width, self.height)
    }

    /// Override the capture timestamp
    #[must_use]
    pub fn with_captured_at(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = at;
        self
    }

    /// Dimensions as `(width, height)`
    #[must_use]
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Total pixel count
    #[must_use]
    pub const fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// RGBA value at `(x, y)`; callers guarantee the point is in bounds
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.offset(x, y);
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    /// Paint a rectangle, clipped to the image bounds
    pub fn fill_region(&mut self, region: Region, rgba: [u8; 4]) {
        let x_end = region.x.saturating_add(region.width).min(self.width);
        let y_end = region.y.saturating_add(region.height).min(self.height);
        for y in region.y..y_end {
            for x in region.x..x_end {
                let i = self.offset(x, y);
                self.pixels[i..i + BYTES_PER_PIXEL].copy_from_slice(&rgba);
            }
        }
    }

    /// Builder form of [`Screenshot::fill_region`]
    #[must_use]
    pub fn with_region(mut self, region: Region, rgba: [u8; 4]) -> Self {
        self.fill_region(region, rgba);
        self
    }

    /// Copy into an `image` buffer
    ///
    /// # Errors
    ///
    /// Returns error if the pixel buffer is inconsistent with the dimensions
    pub fn to_rgba_image(&self) -> EspejoResult<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| EspejoError::image("pixel buffer does not match dimensions"))
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL
    }
}

/// Encode raw RGBA8 pixels as PNG
pub(crate) fn encode_png(pixels: &[u8], width: u32, height: u32) -> EspejoResult<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut buffer);
    encoder
        .write_image(pixels, width, height, image::ExtendedColorType::Rgba8)
        .map_err(|e| EspejoError::image(format!("Failed to encode PNG: {e}")))?;
    Ok(buffer)
}
