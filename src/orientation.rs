//! Device orientation compensation.
//!
//! Sensors deliver frames in their native (landscape) layout. Before a frame reaches
//! the detector or the renderer it is rotated so that "up" in the image matches the
//! direction the user currently sees as up. This happens once, at capture time; the
//! overlay projector only ever sees canonical frames.

use std::str::FromStr;

use anyhow::{anyhow, Result};

/// Physical orientation of the device, as reported by the platform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeviceOrientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
    FaceUp,
    FaceDown,
    Unknown,
}

/// Rotation that must be applied to a sensor frame to display it upright.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImageOrientation {
    /// Already upright.
    #[default]
    Up,
    /// Rotate 180 degrees.
    Down,
    /// Rotate 90 degrees clockwise.
    Right,
}

impl ImageOrientation {
    /// Fixed lookup from device orientation to frame rotation.
    ///
    /// Orientations that do not describe a screen direction (face up/down, upside
    /// down, unknown) fall back to the portrait mapping.
    pub fn for_device(device: DeviceOrientation) -> Self {
        match device {
            DeviceOrientation::Portrait => ImageOrientation::Right,
            DeviceOrientation::LandscapeLeft => ImageOrientation::Up,
            DeviceOrientation::LandscapeRight => ImageOrientation::Down,
            DeviceOrientation::PortraitUpsideDown
            | DeviceOrientation::FaceUp
            | DeviceOrientation::FaceDown
            | DeviceOrientation::Unknown => ImageOrientation::Right,
        }
    }

    /// Output dimensions after rotating a `width` x `height` image.
    pub fn rotated_dimensions(self, width: u32, height: u32) -> (u32, u32) {
        match self {
            ImageOrientation::Up | ImageOrientation::Down => (width, height),
            ImageOrientation::Right => (height, width),
        }
    }

    /// Source pixel for destination pixel `(x, y)` of the rotated image.
    ///
    /// `width` and `height` are the *source* dimensions.
    pub(crate) fn source_pixel(self, x: u32, y: u32, width: u32, height: u32) -> (u32, u32) {
        match self {
            ImageOrientation::Up => (x, y),
            ImageOrientation::Down => (width - 1 - x, height - 1 - y),
            ImageOrientation::Right => (y, height - 1 - x),
        }
    }
}

impl FromStr for DeviceOrientation {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "portrait" => Ok(DeviceOrientation::Portrait),
            "portrait-upside-down" => Ok(DeviceOrientation::PortraitUpsideDown),
            "landscape-left" => Ok(DeviceOrientation::LandscapeLeft),
            "landscape-right" => Ok(DeviceOrientation::LandscapeRight),
            "face-up" => Ok(DeviceOrientation::FaceUp),
            "face-down" => Ok(DeviceOrientation::FaceDown),
            "unknown" => Ok(DeviceOrientation::Unknown),
            other => Err(anyhow!("unrecognized device orientation '{}'", other)),
        }
    }
}
