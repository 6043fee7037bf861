//! Frame/result pairing.
//!
//! `OverlayState` lives on the render context and is the only owner of the held
//! detection batch. The most recently completed batch is re-projected against the
//! current viewport on every redraw until a newer batch replaces it wholesale.
//! Nothing is interpolated and nothing is carried over between batches.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::detect::DetectionBatch;
use crate::geometry::{project, Point, ProjectedRect, Viewport};

/// What a failed detection cycle does to the overlay currently on screen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Keep showing the last successful batch.
    #[default]
    HoldLast,
    /// Drop the held batch; nothing is drawn until the next success.
    Clear,
}

impl FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "hold" | "hold-last" => Ok(FailurePolicy::HoldLast),
            "clear" => Ok(FailurePolicy::Clear),
            other => Err(anyhow!("unrecognized failure policy '{}'", other)),
        }
    }
}

/// One labeled box ready to draw.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayItem {
    pub label: String,
    pub confidence: f32,
    pub rect: ProjectedRect,
    pub label_anchor: Point,
}

#[derive(Debug)]
pub struct OverlayState {
    batch: Option<Arc<DetectionBatch>>,
    viewport: Viewport,
    failure_policy: FailurePolicy,
}

impl OverlayState {
    pub fn new(viewport: Viewport, failure_policy: FailurePolicy) -> Self {
        Self {
            batch: None,
            viewport,
            failure_policy,
        }
    }

    /// Replace the held batch. The previous batch is dropped, never merged.
    pub fn on_batch(&mut self, batch: Arc<DetectionBatch>) {
        self.batch = Some(batch);
    }

    /// Record the current surface size. Returns true when it changed, which means the
    /// held batch must be redrawn at the new scale.
    pub fn on_viewport(&mut self, viewport: Viewport) -> bool {
        if viewport == self.viewport {
            return false;
        }
        log::debug!(
            "viewport {}x{} -> {}x{}",
            self.viewport.width,
            self.viewport.height,
            viewport.width,
            viewport.height
        );
        self.viewport = viewport;
        true
    }

    /// Apply the failure policy for a failed detection cycle.
    pub fn on_detection_failed(&mut self) {
        if self.failure_policy == FailurePolicy::Clear {
            self.batch = None;
        }
    }

    pub fn clear(&mut self) {
        self.batch = None;
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn held_batch(&self) -> Option<&DetectionBatch> {
        self.batch.as_deref()
    }

    /// Project the held batch against the current viewport.
    pub fn overlay(&self) -> Vec<OverlayItem> {
        let Some(batch) = &self.batch else {
            return Vec::new();
        };
        if self.viewport.is_empty() {
            return Vec::new();
        }
        batch
            .results
            .iter()
            .map(|result| {
                let rect = project(result.rect, self.viewport);
                OverlayItem {
                    label: result.label.clone(),
                    confidence: result.confidence,
                    rect,
                    label_anchor: rect.label_anchor(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DetectionResult;
    use crate::geometry::NormalizedRect;

    fn batch(sequence: u64, labels: &[&str]) -> Arc<DetectionBatch> {
        Arc::new(DetectionBatch {
            frame_sequence: sequence,
            results: labels
                .iter()
                .map(|label| DetectionResult {
                    label: label.to_string(),
                    confidence: 0.95,
                    rect: NormalizedRect::new(0.2, 0.3, 0.1, 0.2),
                })
                .collect(),
        })
    }

    #[test]
    fn new_batch_replaces_previous_wholesale() {
        let mut state = OverlayState::new(Viewport::new(1000.0, 500.0), FailurePolicy::HoldLast);
        state.on_batch(batch(1, &["cat", "dog"]));
        assert_eq!(state.overlay().len(), 2);

        state.on_batch(batch(2, &["cat"]));
        let overlay = state.overlay();
        assert_eq!(overlay.len(), 1);
        assert_eq!(state.held_batch().map(|b| b.frame_sequence), Some(2));
    }

    #[test]
    fn identical_batch_does_not_accumulate() {
        let mut state = OverlayState::new(Viewport::new(100.0, 100.0), FailurePolicy::HoldLast);
        let first = batch(1, &["cup"]);
        state.on_batch(first.clone());
        state.on_batch(batch(2, &["cup"]));
        assert_eq!(state.overlay().len(), 1);
        assert_eq!(Arc::strong_count(&first), 1);
    }

    #[test]
    fn held_batch_is_reprojected_on_resize() {
        let mut state = OverlayState::new(Viewport::new(1000.0, 500.0), FailurePolicy::HoldLast);
        state.on_batch(batch(1, &["cat"]));
        let before = state.overlay()[0].rect;

        assert!(state.on_viewport(Viewport::new(2000.0, 500.0)));
        assert!(!state.on_viewport(Viewport::new(2000.0, 500.0)));
        let after = state.overlay()[0].rect;
        assert!((after.x - before.x * 2.0).abs() < 1e-3);
        assert_eq!(after.y.to_bits(), before.y.to_bits());
    }

    #[test]
    fn hold_last_policy_keeps_overlay_on_failure() {
        let mut state = OverlayState::new(Viewport::new(100.0, 100.0), FailurePolicy::HoldLast);
        state.on_batch(batch(1, &["cat"]));
        state.on_detection_failed();
        assert_eq!(state.overlay().len(), 1);
    }

    #[test]
    fn clear_policy_drops_overlay_on_failure() {
        let mut state = OverlayState::new(Viewport::new(100.0, 100.0), FailurePolicy::Clear);
        state.on_batch(batch(1, &["cat"]));
        state.on_detection_failed();
        assert!(state.overlay().is_empty());
    }

    #[test]
    fn items_carry_label_anchor_at_top_left() {
        let mut state = OverlayState::new(Viewport::new(1000.0, 500.0), FailurePolicy::HoldLast);
        state.on_batch(batch(1, &["cat"]));
        let item = &state.overlay()[0];
        assert_eq!(item.label_anchor.x, item.rect.x);
        assert_eq!(item.label_anchor.y, item.rect.y);
    }

    #[test]
    fn parses_failure_policy() -> Result<()> {
        assert_eq!("hold_last".parse::<FailurePolicy>()?, FailurePolicy::HoldLast);
        assert_eq!("CLEAR".parse::<FailurePolicy>()?, FailurePolicy::Clear);
        assert!("drop".parse::<FailurePolicy>().is_err());
        Ok(())
    }
}
