//! Captured frames.
//!
//! A `Frame` is owned by the pipeline stage currently processing it. Consumers
//! that outlive the processing cycle (the live preview slot, the active clip
//! writer) never alias the pixel buffer: they encode it into a buffer of
//! their own.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use std::time::Instant;

/// Bytes per pixel of the packed RGB8 layout every source produces.
pub const BYTES_PER_PIXEL: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Immutable RGB8 image plus its capture instant.
///
/// Deliberately not `Clone`: stages borrow the frame, and anything that must
/// keep the picture encodes its own copy.
#[derive(Debug)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic capture instant. All pipeline timing derives from this.
    pub captured_at: Instant,
    /// Source-assigned sequence number, starting at 1.
    pub sequence: u64,
}

impl Frame {
    /// Build a frame from packed RGB8 pixels.
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: Instant,
        sequence: u64,
    ) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * BYTES_PER_PIXEL;
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame buffer is {} bytes, expected {} for {}x{} rgb8",
                pixels.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at,
            sequence,
        })
    }

    /// Uniformly filled frame. Handy for synthetic sources and tests.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3], captured_at: Instant, sequence: u64) -> Self {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take((width as usize) * (height as usize) * BYTES_PER_PIXEL)
            .collect();
        Self {
            pixels,
            width,
            height,
            captured_at,
            sequence,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Encode to JPEG at the frame's own size.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        encode_rgb_jpeg(&self.pixels, self.width, self.height, quality)
    }

    /// Encode to JPEG, downscaling first when the frame is larger than
    /// `max_width` x `max_height`. Aspect ratio is not preserved, matching
    /// the fixed-size preview the dashboard expects.
    pub fn encode_preview_jpeg(&self, max_width: u32, max_height: u32, quality: u8) -> Result<Vec<u8>> {
        if self.width <= max_width && self.height <= max_height {
            return self.encode_jpeg(quality);
        }
        let image = RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let scaled = image::imageops::resize(&image, max_width, max_height, FilterType::Triangle);
        encode_rgb_jpeg(scaled.as_raw(), max_width, max_height, quality)
    }
}

pub(crate) fn encode_rgb_jpeg(pixels: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(pixels.len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .write_image(pixels, width, height, ExtendedColorType::Rgb8)
        .context("encode jpeg")?;
    Ok(out)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
