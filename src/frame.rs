//! Captured frames.
//!
//! - `Frame`: an RGB24 image plus capture metadata. Pixel bytes are private and only
//!   reachable through a borrowing accessor, so detectors and renderers can read a
//!   frame but never take ownership of its buffer.
//! - Frames are shared between the preview path and the detection path as
//!   `Arc<Frame>`; nothing mutates a frame after capture.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use crate::orientation::ImageOrientation;

/// Bytes per RGB24 pixel.
pub const RGB_CHANNELS: usize = 3;

/// One captured, orientation-corrected frame.
pub struct Frame {
    /// Private RGB24 pixel data, row-major, top-left origin.
    pixels: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Monotonic per-source sequence number, starting at 1.
    pub sequence: u64,

    /// Rotation that was applied at capture time to make the frame upright.
    pub orientation: ImageOrientation,

    captured_at: Instant,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("orientation", &self.orientation)
            .finish_non_exhaustive()
    }
}

impl Frame {
    /// Wrap an RGB24 buffer. Fails if the buffer length does not match the dimensions.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            sequence,
            orientation: ImageOrientation::Up,
            captured_at: Instant::now(),
        })
    }

    /// Read-only pixel access.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// RGB value at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        Some([
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
        ])
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Rotate the sensor buffer so the frame is upright for the given orientation.
    ///
    /// Called once by the frame source. The capture instant is preserved.
    pub fn oriented(self, orientation: ImageOrientation) -> Self {
        if orientation == ImageOrientation::Up {
            return Self {
                orientation,
                ..self
            };
        }

        let (src_w, src_h) = (self.width, self.height);
        let (dst_w, dst_h) = orientation.rotated_dimensions(src_w, src_h);
        let mut rotated = vec![0u8; self.pixels.len()];
        for y in 0..dst_h {
            for x in 0..dst_w {
                let (sx, sy) = orientation.source_pixel(x, y, src_w, src_h);
                let src = (sy as usize * src_w as usize + sx as usize) * RGB_CHANNELS;
                let dst = (y as usize * dst_w as usize + x as usize) * RGB_CHANNELS;
                rotated[dst..dst + RGB_CHANNELS]
                    .copy_from_slice(&self.pixels[src..src + RGB_CHANNELS]);
            }
        }

        Self {
            pixels: rotated,
            width: dst_w,
            height: dst_h,
            sequence: self.sequence,
            orientation,
            captured_at: self.captured_at,
        }
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}
