use super::types::{SessionId, SessionPaths, SessionSnapshot, SessionStatus, SessionSummary};
use crate::detector::DetectorSettings;
use chrono::{DateTime, Utc};
use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// State shared between the control side and the worker of the in-flight session
pub(crate) struct SessionControl {
    pub(crate) id: SessionId,
    pub(crate) paths: SessionPaths,
    pub(crate) started_at: DateTime<Utc>,
    /// Thresholds fixed for the whole session
    pub(crate) settings: DetectorSettings,
    stop_requested: AtomicBool,
    cancelled: AtomicBool,
    status: AtomicCell<SessionStatus>,
    frames_recorded: AtomicU64,
    detections_logged: AtomicU64,
    summary: Mutex<Option<SessionSummary>>,
}

impl SessionControl {
    pub(crate) fn new(
        id: SessionId,
        paths: SessionPaths,
        started_at: DateTime<Utc>,
        settings: DetectorSettings,
    ) -> Self {
        Self {
            id,
            paths,
            started_at,
            settings,
            stop_requested: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            status: AtomicCell::new(SessionStatus::Starting),
            frames_recorded: AtomicU64::new(0),
            detections_logged: AtomicU64::new(0),
            summary: Mutex::new(None),
        }
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.status.load()
    }

    pub(crate) fn set_status(&self, status: SessionStatus) {
        self.status.store(status);
    }

    pub(crate) fn request_stop(&self, cancel: bool) {
        if cancel {
            self.cancelled.store(true, Ordering::SeqCst);
        }
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn record_frame(&self) {
        self.frames_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_detection(&self) {
        self.detections_logged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frames_recorded(&self) -> u64 {
        self.frames_recorded.load(Ordering::Relaxed)
    }

    pub(crate) fn detections_logged(&self) -> u64 {
        self.detections_logged.load(Ordering::Relaxed)
    }

    /// Store the outcome and the matching terminal status
    pub(crate) fn finish(&self, summary: SessionSummary) {
        self.status.store(summary.status);
        *self.summary.lock() = Some(summary);
    }

    pub(crate) fn summary(&self) -> Option<SessionSummary> {
        self.summary.lock().clone()
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            started_at: self.started_at,
            status: self.status(),
            frames_recorded: self.frames_recorded(),
            detections_logged: self.detections_logged(),
            video_path: self.paths.video.clone(),
            log_path: self.paths.log.clone(),
        }
    }
}
