use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{LabelCandidate, RawDetection};
use crate::frame::Frame;
use crate::geometry::NormalizedRect;

/// Channel value at or above which a pixel counts as part of the synthetic marker.
pub const MARKER_THRESHOLD: u8 = 250;

/// Configuration for the synthetic backend.
#[derive(Clone, Debug)]
pub struct SyntheticBackendConfig {
    /// Label reported for the marker.
    pub label: String,
    /// Confidence reported for the marker.
    pub confidence: f32,
    /// Fail every Nth call (1-based). `None` never fails.
    pub fail_every: Option<u64>,
    /// Simulated inference latency.
    pub latency: Duration,
}

impl Default for SyntheticBackendConfig {
    fn default() -> Self {
        Self {
            label: "marker".to_string(),
            confidence: 0.95,
            fail_every: None,
            latency: Duration::ZERO,
        }
    }
}

/// Deterministic backend for tests and the stub pipeline.
///
/// Finds the bright marker painted by the synthetic frame source and reports its
/// bounding box in bottom-left normalized space, exactly like a real runtime would.
pub struct SyntheticBackend {
    config: SyntheticBackendConfig,
    calls: u64,
}

impl SyntheticBackend {
    pub fn new(config: SyntheticBackendConfig) -> Self {
        Self { config, calls: 0 }
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new(SyntheticBackendConfig::default())
    }
}

impl DetectorBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        if !self.config.latency.is_zero() {
            std::thread::sleep(self.config.latency);
        }
        if let Some(every) = self.config.fail_every {
            if every > 0 && self.calls % every == 0 {
                return Err(anyhow!("synthetic failure on call {}", self.calls));
            }
        }

        let Some((x1, y1, x2, y2)) = marker_bounds(frame) else {
            return Ok(Vec::new());
        };
        let rect = NormalizedRect::from_top_left_pixels(
            x1 as f32,
            y1 as f32,
            (x2 + 1) as f32,
            (y2 + 1) as f32,
            frame.width,
            frame.height,
        );
        Ok(vec![RawDetection {
            labels: vec![LabelCandidate::new(
                self.config.label.clone(),
                self.config.confidence,
            )],
            rect,
        }])
    }
}

/// Inclusive pixel bounds `(min_x, min_y, max_x, max_y)` of all marker pixels.
fn marker_bounds(frame: &Frame) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    let width = frame.width.max(1) as usize;
    for (i, px) in frame.pixels().chunks_exact(3).enumerate() {
        if px.iter().all(|&c| c >= MARKER_THRESHOLD) {
            let x = (i % width) as u32;
            let y = (i / width) as u32;
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x1, y1, x2, y2)) => (x1.min(x), y1.min(y), x2.max(x), y2.max(y)),
            });
        }
    }
    bounds
}
