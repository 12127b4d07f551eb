use super::types::{ComponentState, ShutdownReason};
use crate::annotate::Annotator;
use crate::config::{LiveDetectConfig, RecordingConfig};
use crate::control::{ControlHandle, ControlService, Launcher, SystemLauncher};
use crate::detector;
use crate::error::Result;
use crate::events::EventBus;
use crate::keyboard_input::KeyboardInputHandler;
use crate::recorder::{self, resolve_timezone};
use crate::registry::{RecordingLayout, SessionRegistry};
use crate::session::SessionManager;
use crate::source;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Wires the session manager and its control surfaces together
pub struct LiveDetectOrchestrator {
    pub(super) config: LiveDetectConfig,
    pub(super) manager: Arc<SessionManager>,
    pub(super) launcher: Arc<dyn Launcher>,
    pub(super) control: ControlHandle,

    // Components
    pub(super) control_service: Option<ControlService>,
    pub(super) keyboard_handler: Option<KeyboardInputHandler>,
    pub(super) tasks: Vec<(&'static str, JoinHandle<()>)>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
    pub(super) quit: CancellationToken,
}

impl LiveDetectOrchestrator {
    /// Build every component from configuration
    pub fn new(config: LiveDetectConfig) -> Result<Self> {
        config.validate()?;
        let manager = Arc::new(build_manager(&config)?);
        let launcher: Arc<dyn Launcher> = Arc::new(SystemLauncher::from_config(&config.control));
        Ok(Self::with_parts(config, manager, launcher))
    }

    /// Assemble around an already built manager and launcher
    pub fn with_parts(
        config: LiveDetectConfig,
        manager: Arc<SessionManager>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        let (control_service, control) = ControlService::new(
            Arc::clone(&manager),
            Arc::clone(&launcher),
            config.control.command_queue,
        );
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let quit = CancellationToken::new();

        let keyboard_handler = config
            .control
            .keyboard
            .then(|| KeyboardInputHandler::new(control.clone(), quit.clone()));

        Self {
            config,
            manager,
            launcher,
            control,
            control_service: Some(control_service),
            keyboard_handler,
            tasks: Vec::new(),
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
            quit,
        }
    }

    pub fn manager(&self) -> Arc<SessionManager> {
        Arc::clone(&self.manager)
    }

    /// Sender side of the command channel served by the control service
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Cancelling this token asks the orchestrator to shut down
    pub fn quit_token(&self) -> CancellationToken {
        self.quit.clone()
    }
}

/// Registry over the configured recordings root
pub fn open_registry(config: &RecordingConfig) -> Result<SessionRegistry> {
    let sinks = recorder::sink_factory_from_config(config)?;
    SessionRegistry::new(RecordingLayout::from_config(config), sinks.extension())
}

/// Build a session manager with the collaborators selected by configuration
pub fn build_manager(config: &LiveDetectConfig) -> Result<SessionManager> {
    let sinks = recorder::sink_factory_from_config(&config.recording)?;
    let registry = Arc::new(SessionRegistry::new(
        RecordingLayout::from_config(&config.recording),
        sinks.extension(),
    )?);
    let sources = source::from_config(&config.source)?;
    let detector = detector::from_config(&config.detector)?;
    let settings = detector::settings_from_config(&config.detector)?;

    info!(
        "Recording {:?} video at {}fps into {}",
        config.recording.video_format,
        config.recording.fps,
        config.recording.root.display()
    );

    SessionManager::builder()
        .sources(sources)
        .registry(registry)
        .detector(detector)
        .sinks(sinks)
        .annotator(Annotator::from_config(&config.annotation))
        .events(Arc::new(EventBus::new(config.control.event_bus_capacity)))
        .detector_settings(settings)
        .recording_fps(config.recording.fps)
        .timezone(resolve_timezone(&config.recording.timestamp_timezone))
        .build()
}
