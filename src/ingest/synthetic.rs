//! Synthetic frame source.
//!
//! Produces a landscape "sensor" image with a dark textured background and a single
//! bright square marker that wanders a few pixels per frame. Frames are rotated
//! upright exactly like camera frames, so the synthetic detector sees the marker where
//! a viewer would.

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

use super::{FrameSource, SourceStats};
use crate::access::AccessDecision;
use crate::frame::{rgb_len, Frame};
use crate::orientation::{DeviceOrientation, ImageOrientation};

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Location used in logs and stats (e.g., "stub://front_camera").
    pub url: String,
    /// Target frame rate. `0` disables pacing.
    pub target_fps: u32,
    /// Sensor width before orientation correction.
    pub width: u32,
    /// Sensor height before orientation correction.
    pub height: u32,
    pub orientation: DeviceOrientation,
    /// Seed for the marker walk.
    pub seed: u64,
    /// Marker edge length in sensor pixels.
    pub marker_size: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
            orientation: DeviceOrientation::LandscapeLeft,
            seed: 0x5eed,
            marker_size: 48,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    running: bool,
    frame_count: u64,
    rng: StdRng,
    marker: (u32, u32),
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let marker_size = config.marker_size.min(config.width).min(config.height);
        let marker = (
            (config.width - marker_size) / 2,
            (config.height - marker_size) / 2,
        );
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config: SyntheticConfig {
                marker_size,
                ..config
            },
            running: false,
            frame_count: 0,
            marker,
            last_frame_at: None,
        }
    }

    /// Current marker position (top-left, sensor pixels).
    pub fn marker(&self) -> (u32, u32) {
        self.marker
    }

    fn pace(&mut self) {
        if self.config.target_fps == 0 {
            return;
        }
        let interval = Duration::from_secs_f64(1.0 / self.config.target_fps as f64);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    fn step_marker(&mut self) {
        let size = self.config.marker_size;
        let max_x = self.config.width - size;
        let max_y = self.config.height - size;
        let dx: i64 = self.rng.gen_range(-4..=4);
        let dy: i64 = self.rng.gen_range(-4..=4);
        let x = (self.marker.0 as i64 + dx).clamp(0, max_x as i64) as u32;
        let y = (self.marker.1 as i64 + dy).clamp(0, max_y as i64) as u32;
        self.marker = (x, y);
    }

    fn generate_sensor_pixels(&self) -> Result<Vec<u8>> {
        let (w, h) = (self.config.width, self.config.height);
        let mut pixels = vec![0u8; rgb_len(w, h)?];
        // Background stays well below the marker threshold.
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = (i as u64) % w as u64;
            let y = (i as u64) / w as u64;
            let shade = ((x + y + self.frame_count) % 160) as u8 + 16;
            px.copy_from_slice(&[shade, shade / 2, shade / 3]);
        }
        let (mx, my) = self.marker;
        let size = self.config.marker_size;
        for y in my..my + size {
            for x in mx..mx + size {
                let offset = (y as usize * w as usize + x as usize) * 3;
                pixels[offset..offset + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        Ok(pixels)
    }
}

impl FrameSource for SyntheticSource {
    fn start(&mut self, access: AccessDecision) -> Result<()> {
        if !access.is_granted() {
            bail!("camera access refused for {}", self.config.url);
        }
        if self.config.width == 0 || self.config.height == 0 {
            bail!("synthetic source {} has an empty frame size", self.config.url);
        }
        if !self.running {
            self.running = true;
            self.last_frame_at = None;
            log::info!("SyntheticSource: started {}", self.config.url);
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.running {
            bail!("synthetic source {} is not running", self.config.url);
        }
        self.pace();
        self.frame_count += 1;
        self.step_marker();

        let pixels = self.generate_sensor_pixels()?;
        let frame = Frame::from_rgb(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        )?;
        Ok(frame.oriented(ImageOrientation::for_device(self.config.orientation)))
    }

    fn stop(&mut self) {
        if self.running {
            self.running = false;
            log::info!(
                "SyntheticSource: stopped {} after {} frame(s)",
                self.config.url,
                self.frame_count
            );
        }
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            location: self.config.url.clone(),
            healthy: self.running,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
