#![cfg(feature = "backend-tract")]

use std::cmp::Ordering;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{LabelCandidate, RawDetection};
use crate::frame::Frame;
use crate::geometry::NormalizedRect;

/// Default YOLOv8 input edge length.
pub const YOLOV8_INPUT_SIZE: u32 = 640;

/// Label candidates kept per detection, best first.
const MAX_LABEL_CANDIDATES: usize = 3;

/// COCO class names in YOLOv8 output order.
pub const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Tract-based YOLOv8 backend.
///
/// Loads a local ONNX export of YOLOv8, resizes each frame to the model input,
/// decodes the `[1, 4 + classes, anchors]` output and applies IoU suppression before
/// handing boxes to the adapter. No network I/O; the model file is read once.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    labels: Vec<String>,
    score_floor: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            labels: COCO_LABELS.iter().map(|l| l.to_string()).collect(),
            score_floor: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Replace the class names (one per line in model output order).
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    /// Minimum best-class score for a box to survive decoding.
    pub fn with_score_floor(mut self, score_floor: f32) -> Self {
        self.score_floor = score_floor;
        self
    }

    pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Self {
        self.iou_threshold = iou_threshold;
        self
    }

    /// Nearest-neighbour resize to the square model input, scaled to `[0, 1]`.
    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width == 0 || frame.height == 0 {
            return Err(anyhow!("cannot run inference on an empty frame"));
        }
        let side = self.input_size as usize;
        let (src_w, src_h) = (frame.width as usize, frame.height as usize);
        let pixels = frame.pixels();
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            let sx = (x * src_w / side).min(src_w - 1);
            let sy = (y * src_h / side).min(src_h - 1);
            pixels[(sy * src_w + sx) * 3 + c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Candidate>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
            return Err(anyhow!("unexpected YOLOv8 output shape {:?}", shape));
        }
        let classes = shape[1] - 4;
        let anchors = shape[2];
        let side = self.input_size as f32;

        let mut candidates = Vec::new();
        for a in 0..anchors {
            let mut scores: Vec<(usize, f32)> =
                (0..classes).map(|c| (c, view[[0, 4 + c, a]])).collect();
            scores.sort_by(|l, r| r.1.partial_cmp(&l.1).unwrap_or(Ordering::Equal));
            let best = scores[0].1;
            if best.is_nan() || best <= self.score_floor {
                continue;
            }
            let (cx, cy, w, h) = (
                view[[0, 0, a]],
                view[[0, 1, a]],
                view[[0, 2, a]],
                view[[0, 3, a]],
            );
            scores.truncate(MAX_LABEL_CANDIDATES);
            candidates.push(Candidate {
                x1: (cx - w / 2.0) / side,
                y1: (cy - h / 2.0) / side,
                x2: (cx + w / 2.0) / side,
                y2: (cy + h / 2.0) / side,
                class: scores[0].0,
                score: best,
                ranked: scores,
            });
        }
        Ok(suppress(candidates, self.iou_threshold))
    }

    fn label_for(&self, class: usize) -> String {
        self.labels
            .get(class)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let candidates = self.decode(outputs)?;

        Ok(candidates
            .into_iter()
            .map(|cand| RawDetection {
                labels: cand
                    .ranked
                    .iter()
                    .map(|&(class, score)| LabelCandidate::new(self.label_for(class), score))
                    .collect(),
                // Boxes are normalized top-left; 1x1 maps them into bottom-left space.
                rect: NormalizedRect::from_top_left_pixels(cand.x1, cand.y1, cand.x2, cand.y2, 1, 1),
            })
            .collect())
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size as usize;
        let blank = tract_ndarray::Array4::<f32>::zeros((1, 3, side, side)).into_tensor();
        self.model
            .run(tvec!(blank.into()))
            .context("ONNX warm-up failed")?;
        Ok(())
    }
}

/// Decoded box in top-left normalized space.
#[derive(Clone, Debug)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    class: usize,
    score: f32,
    ranked: Vec<(usize, f32)>,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = w * h;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// Greedy per-class IoU suppression, highest score first.
fn suppress(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    let mut kept: Vec<Candidate> = Vec::new();
    for cand in candidates {
        let overlaps = kept
            .iter()
            .any(|k| k.class == cand.class && k.iou(&cand) > iou_threshold);
        if !overlaps {
            kept.push(cand);
        }
    }
    kept
}
