//! Result shaping between a detector backend and the overlay.
//!
//! The adapter looks only at each detection's best label candidate, keeps results
//! whose confidence is strictly above the threshold, and preserves input order. It
//! performs no sorting, deduplication or suppression.

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{DetectionBatch, DetectionResult, RawDetection};
use crate::frame::Frame;

/// Default minimum confidence. Results must be strictly above it.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.9;

/// Label reported for a detection that carries no label candidates.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Shape raw backend output into overlay results.
///
/// A detection with no candidates is kept and reported as [`UNKNOWN_LABEL`] with
/// confidence 0; the threshold only applies to detections that carry a ranked label.
/// Kept confidences are clamped into `[0, 1]`; NaN never passes the threshold.
pub fn shape_results(raw: Vec<RawDetection>, min_confidence: f32) -> Vec<DetectionResult> {
    raw.into_iter()
        .filter_map(|detection| {
            let rect = detection.rect.clamped();
            match detection.labels.into_iter().next() {
                Some(best) if best.confidence > min_confidence => Some(DetectionResult {
                    label: best.identifier,
                    confidence: best.confidence.clamp(0.0, 1.0),
                    rect,
                }),
                Some(_) => None,
                None => Some(DetectionResult {
                    label: UNKNOWN_LABEL.to_string(),
                    confidence: 0.0,
                    rect,
                }),
            }
        })
        .collect()
}

/// Outcome of one detection cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum DetectionOutcome {
    Batch(DetectionBatch),
    /// The backend call failed; no results for this frame.
    Failed(String),
}

/// Wraps a backend and the shaping threshold.
pub struct DetectorAdapter {
    backend: Box<dyn DetectorBackend>,
    min_confidence: f32,
    calls: u64,
    failures: u64,
}

impl DetectorAdapter {
    pub fn new<B: DetectorBackend + 'static>(backend: B) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    pub fn from_boxed(backend: Box<dyn DetectorBackend>) -> Self {
        Self {
            backend,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            calls: 0,
            failures: 0,
        }
    }

    /// Override the default confidence threshold.
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn warm_up(&mut self) -> anyhow::Result<()> {
        self.backend.warm_up()
    }

    /// Run one detection cycle. Backend errors are logged and reported, never raised.
    pub fn process(&mut self, frame: &Frame) -> DetectionOutcome {
        self.calls += 1;
        match self.backend.detect(frame) {
            Ok(raw) => {
                let results = shape_results(raw, self.min_confidence);
                log::debug!(
                    "detector {}: frame {} -> {} result(s)",
                    self.backend.name(),
                    frame.sequence,
                    results.len()
                );
                DetectionOutcome::Batch(DetectionBatch {
                    frame_sequence: frame.sequence,
                    results,
                })
            }
            Err(err) => {
                self.failures += 1;
                log::warn!(
                    "detector {} failed on frame {}: {:#}",
                    self.backend.name(),
                    frame.sequence,
                    err
                );
                DetectionOutcome::Failed(format!("{:#}", err))
            }
        }
    }

    /// `(calls, failures)` since construction.
    pub fn counters(&self) -> (u64, u64) {
        (self.calls, self.failures)
    }
}
