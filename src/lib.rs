//! Detection Overlay
//!
//! Live camera preview with object-detection boxes drawn on top.
//!
//! # Architecture
//!
//! Frames flow one way: source → detector → presenter. The crate keeps three
//! guarantees by construction:
//!
//! 1. **One detection in flight**: frames that arrive while the detector is busy are
//!    shown but never queued for detection.
//! 2. **Latest batch wins**: the overlay always shows exactly one completed batch,
//!    replaced wholesale, re-projected for the current surface size on every redraw.
//! 3. **Quiet stop**: stopping never waits on the detector, and results that finish
//!    after stop are dropped.
//!
//! # Module Structure
//!
//! - `ingest`: Frame sources (synthetic `stub://`, V4L2 cameras)
//! - `frame` / `orientation`: Upright RGB frames
//! - `detect`: Backends and the result-shaping adapter
//! - `geometry`: Normalized → screen projection
//! - `overlay` / `render`: Held batch and drawing surfaces
//! - `pipeline`: Threads and hand-offs that tie it together
//! - `access` / `config`: Camera authorization and daemon configuration

pub mod access;
pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod orientation;
pub mod overlay;
pub mod pipeline;
pub mod render;

pub use access::{resolve_access, AccessDecision, AccessStatus};
pub use detect::{
    build_adapter, DetectionBatch, DetectionOutcome, DetectionResult, DetectorAdapter,
    DetectorBackend, LabelCandidate, RawDetection, SyntheticBackend, SyntheticBackendConfig,
    UnavailableBackend,
};
pub use frame::Frame;
pub use geometry::{project, NormalizedRect, Point, ProjectedRect, Viewport};
pub use ingest::{open_source, FrameSource, SourceSettings, SourceStats, SyntheticSource};
pub use orientation::{DeviceOrientation, ImageOrientation};
pub use overlay::{FailurePolicy, OverlayItem, OverlayState};
pub use pipeline::{Pipeline, PipelineEvent, Presenter, PumpStatus};
pub use render::{CanvasRenderer, LogRenderer, Renderer};
