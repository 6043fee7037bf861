mod adapter;
mod backend;
mod backends;
mod registry;
mod result;

pub use adapter::{
    shape_results, DetectionOutcome, DetectorAdapter, DEFAULT_MIN_CONFIDENCE, UNKNOWN_LABEL,
};
pub use backend::DetectorBackend;
pub use backends::{SyntheticBackend, SyntheticBackendConfig};
pub use registry::{build_adapter, UnavailableBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{DetectionBatch, DetectionResult, LabelCandidate, RawDetection};
