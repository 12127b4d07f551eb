use crate::config::check_threshold;
use crate::error::Result;
use crate::frame::{Detection, Frame};
use serde::{Deserialize, Serialize};

/// Thresholds passed through to the model; recorded with each session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorSettings {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl DetectorSettings {
    /// Range-checked constructor; fails with `InvalidConfig`
    pub fn new(confidence_threshold: f32, iou_threshold: f32) -> Result<Self> {
        let settings = Self {
            confidence_threshold,
            iou_threshold,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        check_threshold("confidence_threshold", self.confidence_threshold)?;
        check_threshold("iou_threshold", self.iou_threshold)
    }

    /// Whether a detection's confidence lies in `[confidence_threshold, 1.0]`
    pub fn admits(&self, detection: &Detection) -> bool {
        detection.confidence >= self.confidence_threshold && detection.confidence <= 1.0
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        }
    }
}

/// Black-box object detector
///
/// Implementations own any filtering and duplicate suppression; the
/// pipeline only passes the thresholds through.
pub trait Detector: Send {
    fn infer(&mut self, frame: &Frame, settings: &DetectorSettings) -> Result<Vec<Detection>>;

    /// Short name for logs
    fn name(&self) -> &str;
}

/// Records without detecting anything
#[derive(Debug, Default)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn infer(&mut self, _frame: &Frame, _settings: &DetectorSettings) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "none"
    }
}
