use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::DEFAULT_MIN_CONFIDENCE;
use crate::geometry::Viewport;
use crate::ingest::SourceSettings;
use crate::orientation::DeviceOrientation;
use crate::overlay::FailurePolicy;

const DEFAULT_SOURCE: &str = "stub://camera";
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
const DEFAULT_VIEWPORT_HEIGHT: u32 = 720;
const DEFAULT_MODEL_INPUT_SIZE: u32 = 640;
const DEFAULT_HEALTH_LOG_SECS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
struct OverlaydConfigFile {
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    viewport: Option<ViewportConfigFile>,
    health_log_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    location: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    orientation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    min_confidence: Option<f32>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    failure_policy: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ViewportConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct OverlaydConfig {
    pub source: SourceSettings,
    pub detector: DetectorSettings,
    pub viewport: (u32, u32),
    pub health_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub min_confidence: f32,
    /// ONNX model; without one the synthetic backend is used.
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub failure_policy: FailurePolicy,
}

impl OverlaydConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OVERLAY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Surface size as the projector sees it.
    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.viewport.0 as f32, self.viewport.1 as f32)
    }

    fn from_file(file: OverlaydConfigFile) -> Result<Self> {
        let source_file = file.source.unwrap_or_default();
        let orientation = match source_file.orientation.as_deref() {
            Some(value) => value.parse()?,
            None => DeviceOrientation::LandscapeLeft,
        };
        let source = SourceSettings {
            location: source_file
                .location
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            width: source_file.width.unwrap_or(DEFAULT_FRAME_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            orientation,
        };

        let detector_file = file.detector.unwrap_or_default();
        let failure_policy = match detector_file.failure_policy.as_deref() {
            Some(value) => value.parse()?,
            None => FailurePolicy::default(),
        };
        let detector = DetectorSettings {
            min_confidence: detector_file
                .min_confidence
                .unwrap_or(DEFAULT_MIN_CONFIDENCE),
            model_path: detector_file.model_path,
            input_size: detector_file
                .input_size
                .unwrap_or(DEFAULT_MODEL_INPUT_SIZE),
            failure_policy,
        };

        let viewport_file = file.viewport.unwrap_or_default();
        let viewport = (
            viewport_file.width.unwrap_or(DEFAULT_VIEWPORT_WIDTH),
            viewport_file.height.unwrap_or(DEFAULT_VIEWPORT_HEIGHT),
        );

        Ok(Self {
            source,
            detector,
            viewport,
            health_interval: Duration::from_secs(
                file.health_log_secs.unwrap_or(DEFAULT_HEALTH_LOG_SECS),
            ),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(location) = std::env::var("OVERLAY_SOURCE") {
            if !location.trim().is_empty() {
                self.source.location = location;
            }
        }
        if let Ok(threshold) = std::env::var("OVERLAY_MIN_CONFIDENCE") {
            self.detector.min_confidence = threshold.trim().parse().map_err(|_| {
                anyhow!("OVERLAY_MIN_CONFIDENCE must be a number between 0 and 1")
            })?;
        }
        if let Ok(policy) = std::env::var("OVERLAY_FAILURE_POLICY") {
            self.detector.failure_policy = policy.parse()?;
        }
        if let Ok(viewport) = std::env::var("OVERLAY_VIEWPORT") {
            self.viewport = parse_dimensions(&viewport)
                .ok_or_else(|| anyhow!("OVERLAY_VIEWPORT must look like 1280x720"))?;
        }
        if let Ok(orientation) = std::env::var("OVERLAY_ORIENTATION") {
            self.source.orientation = orientation.parse()?;
        }
        if let Ok(path) = std::env::var("OVERLAY_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let threshold = self.detector.min_confidence;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "min_confidence must be within [0, 1], got {}",
                threshold
            ));
        }
        if self.source.location.trim().is_empty() {
            return Err(anyhow!("source location must not be empty"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("target_fps must be at least 1"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("frame size must be non-zero"));
        }
        if self.viewport.0 == 0 || self.viewport.1 == 0 {
            return Err(anyhow!("viewport size must be non-zero"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be non-zero"));
        }
        if self.health_interval.is_zero() {
            return Err(anyhow!("health_log_secs must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<OverlaydConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// Parse `WIDTHxHEIGHT`.
pub fn parse_dimensions(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.trim().split_once(['x', 'X'])?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() -> Result<()> {
        let cfg = OverlaydConfig::from_file(OverlaydConfigFile::default())?;
        assert_eq!(cfg.source.location, DEFAULT_SOURCE);
        assert_eq!(cfg.detector.min_confidence, DEFAULT_MIN_CONFIDENCE);
        assert_eq!(cfg.detector.failure_policy, FailurePolicy::HoldLast);
        assert_eq!(cfg.viewport, (1280, 720));
        cfg.validate()
    }

    #[test]
    fn parses_dimensions() {
        assert_eq!(parse_dimensions("800x600"), Some((800, 600)));
        assert_eq!(parse_dimensions(" 10 X 20 "), Some((10, 20)));
        assert_eq!(parse_dimensions("800"), None);
        assert_eq!(parse_dimensions("axb"), None);
    }

    #[test]
    fn rejects_out_of_range_threshold() -> Result<()> {
        let mut cfg = OverlaydConfig::from_file(OverlaydConfigFile::default())?;
        cfg.detector.min_confidence = 1.5;
        assert!(cfg.validate().is_err());
        cfg.detector.min_confidence = f32::NAN;
        assert!(cfg.validate().is_err());
        Ok(())
    }

    #[test]
    fn rejects_unknown_orientation() {
        let file = OverlaydConfigFile {
            source: Some(SourceConfigFile {
                orientation: Some("sideways".to_string()),
                ..SourceConfigFile::default()
            }),
            ..OverlaydConfigFile::default()
        };
        assert!(OverlaydConfig::from_file(file).is_err());
    }
}
