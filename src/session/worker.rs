use super::live::SessionControl;
use super::manager::SessionContext;
use super::types::{SessionStatus, SessionSummary};
use crate::error::Result;
use crate::events::{RegistryChange, SessionEvent};
use crate::frame::Detection;
use crate::recorder::{EventLogger, SessionMetadata, VideoRecorder};
use crate::source::{FrameRead, FrameSource};
use chrono::Utc;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Resources owned by one session from `Starting` until teardown
pub(crate) struct SessionResources {
    source: Box<dyn FrameSource>,
    recorder: VideoRecorder,
    logger: EventLogger,
}

impl SessionResources {
    /// Open the frame source and the event log; nothing stays open on failure
    pub(crate) fn open(ctx: &SessionContext, control: &SessionControl) -> Result<Self> {
        let mut source = ctx.sources.open()?;
        debug!("Session {} reading from {}", control.id, source.describe());

        let logger = match EventLogger::open(&control.paths.log, ctx.timezone) {
            Ok(logger) => logger,
            Err(e) => {
                if let Err(close_err) = source.close() {
                    warn!("Failed to close frame source after startup error: {}", close_err);
                }
                return Err(e);
            }
        };

        let recorder = VideoRecorder::new(
            control.paths.video.clone(),
            ctx.recording_fps,
            Arc::clone(&ctx.sinks),
        );

        Ok(Self {
            source,
            recorder,
            logger,
        })
    }

    /// Close source, recorder and logger in that order; every close runs
    fn close_all(&mut self, control: &SessionControl) {
        if let Err(e) = self.source.close() {
            warn!("Session {}: failed to close frame source: {}", control.id, e);
        }
        if let Err(e) = self.recorder.close() {
            warn!("Session {}: failed to close video: {}", control.id, e);
        }
        if let Err(e) = self.logger.close() {
            warn!("Session {}: failed to close event log: {}", control.id, e);
        }
    }
}

enum Step {
    Recorded,
    Timeout,
    EndOfStream,
}

enum LoopExit {
    Requested,
    EndOfStream,
    Failed(String),
}

/// Clears the live slot when the worker returns or unwinds
struct LiveSlotGuard<'a> {
    ctx: &'a SessionContext,
    control: &'a Arc<SessionControl>,
}

impl Drop for LiveSlotGuard<'_> {
    fn drop(&mut self) {
        if !self.control.status().is_terminal() {
            self.control.set_status(SessionStatus::Failed);
        }
        let mut live = self.ctx.live.lock();
        if live
            .as_ref()
            .map_or(false, |active| Arc::ptr_eq(active, self.control))
        {
            *live = None;
        }
    }
}

/// Session worker body; runs on a dedicated blocking thread
pub(crate) fn run(ctx: Arc<SessionContext>, control: Arc<SessionControl>, mut resources: SessionResources) {
    let _slot = LiveSlotGuard {
        ctx: &ctx,
        control: &control,
    };

    let exit = drive(&ctx, &control, &mut resources);

    control.set_status(SessionStatus::Stopping);
    ctx.events.publish(SessionEvent::StatusChanged {
        session_id: control.id.clone(),
        status: SessionStatus::Stopping,
    });

    resources.close_all(&control);
    ctx.frames.send_replace(None);

    let failure = match exit {
        LoopExit::Failed(reason) => Some(reason),
        LoopExit::Requested | LoopExit::EndOfStream => None,
    };
    let status = if failure.is_some() {
        SessionStatus::Failed
    } else {
        SessionStatus::Stopped
    };

    let summary = SessionSummary {
        id: control.id.clone(),
        status,
        cancelled: control.cancelled(),
        started_at: control.started_at,
        ended_at: Utc::now(),
        frames_recorded: control.frames_recorded(),
        detections_logged: control.detections_logged(),
        failure: failure.clone(),
    };

    let metadata = SessionMetadata {
        id: summary.id.clone(),
        started_at: summary.started_at,
        ended_at: summary.ended_at,
        status,
        cancelled: summary.cancelled,
        failure: failure.clone(),
        frames_recorded: summary.frames_recorded,
        detections_logged: summary.detections_logged,
        frame_size: resources.recorder.dimensions(),
        detector: control.settings,
        video_format: ctx.sinks.extension().to_string(),
    };

    match ctx.registry.publish(&metadata) {
        Ok(()) => {
            ctx.events.publish(SessionEvent::RegistryChanged {
                reason: RegistryChange::Published(control.id.clone()),
            });
        }
        Err(e) => error!("Failed to publish session {}: {}", control.id, e),
    }

    control.finish(summary.clone());

    if let Some(reason) = failure {
        ctx.events.publish(SessionEvent::SessionFailed {
            session_id: control.id.clone(),
            error: reason,
        });
    }
    ctx.events.publish(SessionEvent::SessionCompleted {
        session_id: summary.id,
        status,
        frames_recorded: summary.frames_recorded,
        detections_logged: summary.detections_logged,
    });
}

fn drive(ctx: &SessionContext, control: &SessionControl, resources: &mut SessionResources) -> LoopExit {
    loop {
        if control.stop_requested() {
            info!(
                "Session {} {} after {} frames",
                control.id,
                if control.cancelled() { "cancelled" } else { "stopping" },
                control.frames_recorded()
            );
            return LoopExit::Requested;
        }

        let step = panic::catch_unwind(AssertUnwindSafe(|| process_next(ctx, control, resources)));
        match step {
            Ok(Ok(Step::Recorded)) | Ok(Ok(Step::Timeout)) => {}
            Ok(Ok(Step::EndOfStream)) => {
                info!("Session {} reached end of stream", control.id);
                return LoopExit::EndOfStream;
            }
            Ok(Err(e)) => {
                error!("Session {} failed: {}", control.id, e);
                return LoopExit::Failed(e.to_string());
            }
            Err(payload) => {
                let reason = format!("unexpected panic: {}", panic_message(payload.as_ref()));
                error!("Session {} failed: {}", control.id, reason);
                return LoopExit::Failed(reason);
            }
        }
    }
}

/// One capture, detect, annotate, record and log pass
fn process_next(ctx: &SessionContext, control: &SessionControl, resources: &mut SessionResources) -> Result<Step> {
    let frame = match resources.source.next_frame()? {
        FrameRead::Frame(frame) => frame,
        FrameRead::Timeout => {
            trace!("Session {}: no frame before read timeout", control.id);
            return Ok(Step::Timeout);
        }
        FrameRead::EndOfStream => return Ok(Step::EndOfStream),
    };

    resources.recorder.check_dimensions(frame.dimensions())?;

    let raw = ctx.detector.lock().infer(&frame, &control.settings)?;
    let reported = raw.len();
    let detections: Vec<Detection> = raw
        .into_iter()
        .filter(|d| control.settings.admits(d))
        .collect();
    if detections.len() < reported {
        trace!(
            "Frame {}: dropped {} detections outside the confidence range",
            frame.index,
            reported - detections.len()
        );
    }

    let annotated = ctx.annotator.annotate(&frame, detections);
    resources.recorder.write(&annotated)?;
    control.record_frame();

    for detection in &annotated.detections {
        resources
            .logger
            .append(frame.captured_at, &detection.label, detection.confidence)?;
        control.record_detection();
    }

    trace!(
        "Frame {} recorded with {} detections",
        frame.index,
        annotated.detections.len()
    );
    ctx.frames.send_replace(Some(Arc::new(annotated)));
    Ok(Step::Recorded)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
