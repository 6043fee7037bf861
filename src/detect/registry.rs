//! Backend selection for the configured detector.
//!
//! A model that fails to load or warm up does not stop the pipeline. The adapter
//! falls back to [`UnavailableBackend`]: every cycle fails, so the preview keeps
//! running with no boxes.

use anyhow::{anyhow, Result};
use std::path::Path;

use crate::config::DetectorSettings;
use crate::detect::adapter::DetectorAdapter;
use crate::detect::backend::DetectorBackend;
use crate::detect::backends::SyntheticBackend;
use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Preview-only stand-in for a model that could not be loaded.
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl DetectorBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
        Err(anyhow!("model unavailable: {}", self.reason))
    }
}

/// Build the adapter for `settings`. Never fails; see the module docs.
pub fn build_adapter(settings: &DetectorSettings) -> DetectorAdapter {
    let backend: Box<dyn DetectorBackend> = match &settings.model_path {
        Some(path) => match load_model(path, settings.input_size) {
            Ok(backend) => backend,
            Err(err) => {
                log::error!(
                    "model {} failed to load, running preview only: {:#}",
                    path.display(),
                    err
                );
                Box::new(UnavailableBackend::new(format!("{:#}", err)))
            }
        },
        None => {
            log::warn!("no model configured, using the synthetic marker detector");
            Box::new(SyntheticBackend::default())
        }
    };
    warm_up_or_fall_back(
        DetectorAdapter::from_boxed(backend).with_min_confidence(settings.min_confidence),
    )
}

fn warm_up_or_fall_back(mut adapter: DetectorAdapter) -> DetectorAdapter {
    match adapter.warm_up() {
        Ok(()) => adapter,
        Err(err) => {
            log::error!(
                "detector {} failed to warm up, running preview only: {:#}",
                adapter.backend_name(),
                err
            );
            DetectorAdapter::new(UnavailableBackend::new(format!("{:#}", err)))
                .with_min_confidence(adapter.min_confidence())
        }
    }
}

#[cfg(feature = "backend-tract")]
fn load_model(path: &Path, input_size: u32) -> Result<Box<dyn DetectorBackend>> {
    let backend = crate::detect::backends::TractBackend::new(path, input_size)?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model(path: &Path, _input_size: u32) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "model {} requires the backend-tract feature",
        path.display()
    ))
}
