use anyhow::Result;

use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend wraps an opaque inference call. It receives one upright frame at a time
/// and returns raw detections in bottom-left normalized space, label candidates
/// ranked best-first. Any suppression of overlapping boxes is the backend's job.
///
/// Backends run on the detection worker thread, hence `Send`.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Implementations must treat the frame as read-only and must not retain it past
    /// the call.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
