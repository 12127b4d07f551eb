use super::live::SessionControl;
use super::types::{ManagerStatus, SessionId, SessionSnapshot, SessionStatus, SessionSummary};
use super::worker::{self, SessionResources};
use crate::annotate::Annotator;
use crate::detector::{self, DetectorSettings, NullDetector, SharedDetector};
use crate::error::{LiveDetectError, Result};
use crate::events::{EventBus, RegistryChange, SessionEvent};
use crate::frame::AnnotatedFrame;
use crate::recorder::{FrameSinkFactory, MjpegSinkFactory};
use crate::registry::{RegistryEntry, SessionRegistry};
use crate::source::FrameSourceFactory;
use chrono::Utc;
use chrono_tz::Tz;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Collaborators shared by the manager and the session worker
pub(crate) struct SessionContext {
    pub(crate) detector: SharedDetector,
    pub(crate) sources: Arc<dyn FrameSourceFactory>,
    pub(crate) sinks: Arc<dyn FrameSinkFactory>,
    pub(crate) annotator: Annotator,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) frames: watch::Sender<Option<Arc<AnnotatedFrame>>>,
    pub(crate) recording_fps: u32,
    pub(crate) timezone: Tz,
    /// The in-flight session, from `Starting` until its worker has torn down
    pub(crate) live: Mutex<Option<Arc<SessionControl>>>,
}

struct WorkerHandle {
    id: SessionId,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndRequest {
    Stop,
    Cancel,
    Shutdown,
}

/// Owns at most one recording session at a time.
///
/// `start` opens the frame source and event log, then hands the session to a
/// dedicated blocking worker. `stop` and `cancel` raise a flag the worker
/// checks once per frame and wait for it to finish tearing down.
pub struct SessionManager {
    ctx: Arc<SessionContext>,
    settings: RwLock<DetectorSettings>,
    worker: WorkerSlot,
}

impl SessionManager {
    pub fn builder() -> SessionManagerBuilder {
        SessionManagerBuilder::new()
    }

    /// Begin a new session and return its id.
    ///
    /// Startup runs on its own task and completes even if the caller stops waiting.
    pub async fn start(&self) -> Result<SessionId> {
        let settings = self.detector_settings();
        settings.validate()?;
        self.reject_if_active()?;

        let ctx = Arc::clone(&self.ctx);
        let worker = Arc::clone(&self.worker);
        tokio::spawn(launch(ctx, worker, settings))
            .await
            .map_err(|e| LiveDetectError::system(format!("session startup task failed: {}", e)))?
    }

    /// Graceful stop of a running session; waits for teardown
    pub async fn stop(&self) -> Result<SessionSummary> {
        self.end_session(EndRequest::Stop).await
    }

    /// Like `stop`, also accepted while starting; the session is flagged as cancelled
    pub async fn cancel(&self) -> Result<SessionSummary> {
        self.end_session(EndRequest::Cancel).await
    }

    /// Stop whatever is active and wait for every worker to finish
    pub async fn shutdown(&self) -> Option<SessionSummary> {
        let summary = match self.end_session(EndRequest::Shutdown).await {
            Ok(summary) => Some(summary),
            Err(LiveDetectError::NotRunning) => None,
            Err(e) => {
                warn!("Failed to stop session during shutdown: {}", e);
                None
            }
        };

        if let Some(finished) = self.worker.lock().await.take() {
            if let Err(e) = finished.handle.await {
                warn!("Worker of session {} ended abnormally: {}", finished.id, e);
            }
        }
        summary
    }

    pub fn status(&self) -> ManagerStatus {
        self.ctx
            .live
            .lock()
            .as_ref()
            .map(|control| control.status().into())
            .unwrap_or(ManagerStatus::Idle)
    }

    pub fn current_session(&self) -> Option<SessionSnapshot> {
        self.ctx.live.lock().as_ref().map(|control| control.snapshot())
    }

    /// Finished sessions, most recent first; the in-flight session is never listed
    pub fn list(&self) -> Result<Vec<RegistryEntry>> {
        self.ctx.registry.list()
    }

    pub fn entry(&self, id: &SessionId) -> Result<RegistryEntry> {
        self.reject_if_live(id)?;
        self.ctx.registry.get(id)
    }

    /// Remove a finished session's artifacts
    pub fn delete(&self, id: &SessionId) -> Result<RegistryEntry> {
        self.reject_if_live(id)?;
        let entry = self.ctx.registry.delete(id)?;
        self.ctx.events.publish(SessionEvent::RegistryChanged {
            reason: RegistryChange::Deleted(id.clone()),
        });
        Ok(entry)
    }

    /// Latest annotated frame of the running session; `None` while idle
    pub fn subscribe_frames(&self) -> watch::Receiver<Option<Arc<AnnotatedFrame>>> {
        self.ctx.frames.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.ctx.events.subscribe()
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.ctx.events)
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.ctx.registry)
    }

    pub fn detector_settings(&self) -> DetectorSettings {
        *self.settings.read()
    }

    /// Thresholds for sessions started from now on
    pub fn set_detector_settings(&self, settings: DetectorSettings) -> Result<()> {
        settings.validate()?;
        *self.settings.write() = settings;
        debug!(
            "Detector settings updated: confidence {:.2}, iou {:.2}",
            settings.confidence_threshold, settings.iou_threshold
        );
        Ok(())
    }

    fn reject_if_active(&self) -> Result<()> {
        match self.ctx.live.lock().as_ref() {
            Some(active) => Err(LiveDetectError::AlreadyRunning {
                session_id: active.id.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn reject_if_live(&self, id: &SessionId) -> Result<()> {
        match self.ctx.live.lock().as_ref() {
            Some(active) if &active.id == id => Err(LiveDetectError::InUse {
                session_id: id.to_string(),
            }),
            _ => Ok(()),
        }
    }

    async fn end_session(&self, request: EndRequest) -> Result<SessionSummary> {
        let ctx = Arc::clone(&self.ctx);
        let worker = Arc::clone(&self.worker);
        tokio::spawn(finish(ctx, worker, request))
            .await
            .map_err(|e| LiveDetectError::system(format!("session teardown task failed: {}", e)))?
    }
}

type WorkerSlot = Arc<tokio::sync::Mutex<Option<WorkerHandle>>>;

async fn launch(
    ctx: Arc<SessionContext>,
    slot: WorkerSlot,
    settings: DetectorSettings,
) -> Result<SessionId> {
    let mut slot = slot.lock().await;
    let control = ctx.claim(settings)?;

    // The slot was free, so any previous worker has already finished
    if let Some(previous) = slot.take() {
        if let Err(e) = previous.handle.await {
            warn!("Worker of session {} ended abnormally: {}", previous.id, e);
        }
    }

    info!("Starting session {}", control.id);
    ctx.events.publish(SessionEvent::StatusChanged {
        session_id: control.id.clone(),
        status: SessionStatus::Starting,
    });

    let opener = Arc::clone(&ctx);
    let opening = Arc::clone(&control);
    let opened = tokio::task::spawn_blocking(move || SessionResources::open(&opener, &opening))
        .await
        .map_err(|e| LiveDetectError::system(format!("session startup task failed: {}", e)))
        .and_then(|opened| opened);

    let resources = match opened {
        Ok(resources) => resources,
        Err(e) => {
            error!("Session {} could not start: {}", control.id, e);
            ctx.abandon(&control);
            return Err(e);
        }
    };

    control.set_status(SessionStatus::Running);
    ctx.events.publish(SessionEvent::SessionStarted {
        session_id: control.id.clone(),
        started_at: control.started_at,
    });

    let id = control.id.clone();
    let handle = tokio::task::spawn_blocking(move || worker::run(ctx, control, resources));
    *slot = Some(WorkerHandle {
        id: id.clone(),
        handle,
    });

    Ok(id)
}

async fn finish(
    ctx: Arc<SessionContext>,
    slot: WorkerSlot,
    request: EndRequest,
) -> Result<SessionSummary> {
    let control = ctx.live.lock().clone().ok_or(LiveDetectError::NotRunning)?;

    let accepted = match control.status() {
        SessionStatus::Running => true,
        SessionStatus::Starting => request != EndRequest::Stop,
        _ => false,
    };
    if !accepted {
        return Err(LiveDetectError::NotRunning);
    }

    info!("{:?} requested for session {}", request, control.id);
    control.request_stop(request == EndRequest::Cancel);

    // Waits behind a start that is still opening resources
    let mut slot = slot.lock().await;
    let owns_worker = slot
        .as_ref()
        .map_or(false, |running| running.id == control.id);
    let handle = if owns_worker {
        slot.take().map(|w| w.handle)
    } else {
        None
    };
    if let Some(handle) = handle {
        handle.await.map_err(|e| {
            LiveDetectError::system(format!("worker of session {} failed: {}", control.id, e))
        })?;
    }
    drop(slot);

    control.summary().ok_or(LiveDetectError::NotRunning)
}

impl SessionContext {
    /// Take the live slot and reserve the session's paths in one step
    fn claim(&self, settings: DetectorSettings) -> Result<Arc<SessionControl>> {
        let mut live = self.live.lock();
        if let Some(active) = live.as_ref() {
            return Err(LiveDetectError::AlreadyRunning {
                session_id: active.id.to_string(),
            });
        }

        let started_at = Utc::now();
        let requested = SessionId::from_timestamp(&started_at.with_timezone(&self.timezone));
        let (id, paths) = self.registry.reserve(requested)?;
        debug!(
            "Session {} reserved {} and {}",
            id,
            paths.video.display(),
            paths.log.display()
        );

        let control = Arc::new(SessionControl::new(id, paths, started_at, settings));
        *live = Some(Arc::clone(&control));
        Ok(control)
    }

    /// Return to idle after a start that never reached the worker
    fn abandon(&self, control: &Arc<SessionControl>) {
        self.registry.release(&control.id);
        control.set_status(SessionStatus::Failed);
        let mut live = self.live.lock();
        if live
            .as_ref()
            .map_or(false, |active| Arc::ptr_eq(active, control))
        {
            *live = None;
        }
    }
}

/// Builder for wiring a `SessionManager` from its collaborators
pub struct SessionManagerBuilder {
    sources: Option<Arc<dyn FrameSourceFactory>>,
    registry: Option<Arc<SessionRegistry>>,
    detector: Option<SharedDetector>,
    sinks: Option<Arc<dyn FrameSinkFactory>>,
    annotator: Option<Annotator>,
    events: Option<Arc<EventBus>>,
    settings: DetectorSettings,
    recording_fps: u32,
    timezone: Tz,
}

impl SessionManagerBuilder {
    pub fn new() -> Self {
        Self {
            sources: None,
            registry: None,
            detector: None,
            sinks: None,
            annotator: None,
            events: None,
            settings: DetectorSettings::default(),
            recording_fps: 20,
            timezone: chrono_tz::UTC,
        }
    }

    pub fn sources(mut self, sources: Arc<dyn FrameSourceFactory>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn detector(mut self, detector: SharedDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn sinks(mut self, sinks: Arc<dyn FrameSinkFactory>) -> Self {
        self.sinks = Some(sinks);
        self
    }

    pub fn annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn detector_settings(mut self, settings: DetectorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn recording_fps(mut self, fps: u32) -> Self {
        self.recording_fps = fps;
        self
    }

    pub fn timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn build(self) -> Result<SessionManager> {
        let sources = self
            .sources
            .ok_or_else(|| LiveDetectError::invalid_config("Session manager needs a frame source"))?;
        let registry = self
            .registry
            .ok_or_else(|| LiveDetectError::invalid_config("Session manager needs a registry"))?;
        let sinks = self
            .sinks
            .unwrap_or_else(|| Arc::new(MjpegSinkFactory::new(85)));
        if sinks.extension() != registry.video_extension() {
            return Err(LiveDetectError::invalid_config(format!(
                "Video sink writes .{} files but the registry expects .{}",
                sinks.extension(),
                registry.video_extension()
            )));
        }
        if self.recording_fps == 0 {
            return Err(LiveDetectError::invalid_config("Recording fps must be greater than 0"));
        }
        self.settings.validate()?;

        let (frames, _) = watch::channel(None);
        let ctx = SessionContext {
            detector: self.detector.unwrap_or_else(|| detector::shared(NullDetector)),
            sources,
            sinks,
            annotator: self
                .annotator
                .unwrap_or_else(|| Annotator::new(2, None, 16.0)),
            registry,
            events: self.events.unwrap_or_else(|| Arc::new(EventBus::new(64))),
            frames,
            recording_fps: self.recording_fps,
            timezone: self.timezone,
            live: Mutex::new(None),
        };

        Ok(SessionManager {
            ctx: Arc::new(ctx),
            settings: RwLock::new(self.settings),
            worker: Arc::new(tokio::sync::Mutex::new(None)),
        })
    }
}

impl Default for SessionManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
