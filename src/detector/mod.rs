mod interface;
pub mod mock;
mod process;
#[cfg(test)]
mod tests;

pub use interface::{Detector, DetectorSettings, NullDetector};
pub use process::ProcessDetector;

use crate::config::{DetectorBackend, DetectorConfig};
use crate::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// Detector handle shared by consecutive sessions; only one worker uses it at a time
pub type SharedDetector = Arc<Mutex<Box<dyn Detector>>>;

pub fn shared<D: Detector + 'static>(detector: D) -> SharedDetector {
    Arc::new(Mutex::new(Box::new(detector)))
}

/// Build the detector selected by configuration
pub fn from_config(config: &DetectorConfig) -> Result<SharedDetector> {
    match config.backend {
        DetectorBackend::Process => {
            let detector = ProcessDetector::spawn(&config.command, config.labels.clone())?;
            Ok(shared(detector))
        }
        DetectorBackend::None => {
            info!("No detector configured; sessions will record without detections");
            Ok(shared(NullDetector))
        }
    }
}

/// Settings taken from configuration, range-checked
pub fn settings_from_config(config: &DetectorConfig) -> Result<DetectorSettings> {
    DetectorSettings::new(config.confidence_threshold, config.iou_threshold)
}
