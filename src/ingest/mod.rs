//! Frame sources.
//!
//! This module provides sources for upright RGB frames:
//! - Synthetic scenes (`stub://` locations, tests and demos)
//! - USB/V4L2 cameras (feature: camera-v4l2)
//!
//! Every source is lazy and potentially infinite while running, and restartable
//! after `stop`. A source is responsible for:
//! - Refusing to start without an access grant
//! - Converting sensor pixels to RGB24
//! - Rotating frames upright for the configured device orientation
//! - Pacing to its target frame rate
//!
//! A source MUST NOT know about detectors or overlays.

#[cfg(feature = "camera-v4l2")]
pub mod camera;
#[cfg(feature = "camera-v4l2")]
mod normalize;
pub mod synthetic;

use anyhow::Result;

use crate::access::AccessDecision;
use crate::frame::Frame;
use crate::orientation::DeviceOrientation;

#[cfg(feature = "camera-v4l2")]
pub use camera::{CameraConfig, CameraSource};
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// Location prefix that selects the synthetic source.
pub const STUB_SCHEME: &str = "stub://";

/// A restartable, lazy sequence of frames.
pub trait FrameSource: Send {
    /// Begin capturing. Fails when `access` is refused or the device cannot open.
    ///
    /// Starting an already running source is a no-op.
    fn start(&mut self, access: AccessDecision) -> Result<()>;

    /// Capture the next upright frame. Blocks until one is available.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Stop capturing. Idempotent.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

impl FrameSource for Box<dyn FrameSource> {
    fn start(&mut self, access: AccessDecision) -> Result<()> {
        (**self).start(access)
    }

    fn next_frame(&mut self) -> Result<Frame> {
        (**self).next_frame()
    }

    fn stop(&mut self) {
        (**self).stop()
    }

    fn is_running(&self) -> bool {
        (**self).is_running()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub location: String,
    pub healthy: bool,
}

/// Settings shared by every source kind.
#[derive(Clone, Debug)]
pub struct SourceSettings {
    /// `stub://<name>` or a device path such as `/dev/video0`.
    pub location: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    pub orientation: DeviceOrientation,
}

/// Build a source for `settings.location`.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    if settings.location.starts_with(STUB_SCHEME) {
        return Ok(Box::new(SyntheticSource::new(SyntheticConfig {
            url: settings.location.clone(),
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
            orientation: settings.orientation,
            ..SyntheticConfig::default()
        })));
    }

    #[cfg(feature = "camera-v4l2")]
    {
        Ok(Box::new(CameraSource::new(CameraConfig {
            device: settings.location.clone(),
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
            orientation: settings.orientation,
        })))
    }
    #[cfg(not(feature = "camera-v4l2"))]
    {
        anyhow::bail!(
            "source '{}' requires the camera-v4l2 feature",
            settings.location
        )
    }
}
