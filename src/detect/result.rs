use crate::geometry::NormalizedRect;

/// One ranked label hypothesis for a detected object.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelCandidate {
    pub identifier: String,
    pub confidence: f32,
}

impl LabelCandidate {
    pub fn new(identifier: impl Into<String>, confidence: f32) -> Self {
        Self {
            identifier: identifier.into(),
            confidence,
        }
    }
}

/// Detection as returned by a backend, before shaping.
///
/// `labels` is ordered best-first. `rect` is normalized with a bottom-left origin.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub labels: Vec<LabelCandidate>,
    pub rect: NormalizedRect,
}

/// A detection that passed shaping. Immutable once created.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    pub label: String,
    pub confidence: f32,
    /// Normalized, bottom-left origin, y up.
    pub rect: NormalizedRect,
}

/// All results produced by one detection call on one frame.
///
/// A batch replaces the previous one wholesale; entries carry no identity across
/// batches.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionBatch {
    /// Sequence number of the frame the batch was computed from.
    pub frame_sequence: u64,
    pub results: Vec<DetectionResult>,
}

impl DetectionBatch {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
