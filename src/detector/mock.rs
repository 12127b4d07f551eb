use super::interface::{Detector, DetectorSettings};
use crate::error::{LiveDetectError, Result};
use crate::frame::{Detection, Frame};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Returns the same detections for every frame, with optional failures
pub struct ScriptedDetector {
    detections: Vec<Detection>,
    fail_at: HashMap<u64, String>,
    panic_at: Option<u64>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            fail_at: HashMap::new(),
            panic_at: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail inference on the frame with this index
    pub fn fail_on(mut self, frame_index: u64, reason: &str) -> Self {
        self.fail_at.insert(frame_index, reason.to_string());
        self
    }

    /// Panic during inference on the frame with this index
    pub fn panic_on(mut self, frame_index: u64) -> Self {
        self.panic_at = Some(frame_index);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Detector for ScriptedDetector {
    fn infer(&mut self, frame: &Frame, _settings: &DetectorSettings) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_at == Some(frame.index) {
            panic!("scripted detector panic on frame {}", frame.index);
        }
        if let Some(reason) = self.fail_at.get(&frame.index) {
            return Err(LiveDetectError::detector(reason.clone()));
        }
        Ok(self.detections.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
