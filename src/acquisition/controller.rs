use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::state::{AcquisitionState, AcquisitionStateMachine, Effect, SearchCycle, SessionFailure, TransitionError};
use crate::capture::FrameSource;
use crate::config::Config;
use crate::detection::{AcceptanceFilters, DetectedRegion, DetectionGate, RectangleDetector};
use crate::error::UploadError;
use crate::messaging::{Command, Notification, NotificationBus};
use crate::payload::Payload;
use crate::polling::{PollingSession, UpdateHandler};
use crate::surfaces::Surfaces;
use crate::throttle::{CandidateHandler, FrameThrottler};
use crate::tracking::TrackingWatchdog;
use crate::upload::ScoreService;

/// Timing and filter settings of a controller
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub frame_interval: Duration,
    pub poll_interval: Duration,
    /// Grace period of the tracking watchdog. `None` when nothing reports
    /// anchor updates; the watchdog is then never armed.
    pub tracking_grace: Option<Duration>,
    pub filters: AcceptanceFilters,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            frame_interval: config.frame_interval(),
            poll_interval: config.poll_interval(),
            tracking_grace: Some(config.tracking_grace()),
            filters: config.filters.clone(),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// External collaborators of the pipeline
pub struct PipelineParts {
    pub frames: Arc<dyn FrameSource>,
    pub detector: Arc<dyn RectangleDetector>,
    pub service: Arc<dyn ScoreService>,
    pub surfaces: Surfaces,
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    state: AcquisitionState,
    cycle: SearchCycle,
}

/// Handle to the acquisition controller thread
///
/// Cheap to clone. All transitions happen on the controller thread, in the
/// order their commands arrive.
#[derive(Clone)]
pub struct AcquisitionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    command_tx: Sender<Command>,
    snapshot: Arc<RwLock<Snapshot>>,
    notifications: NotificationBus,
    throttler: FrameThrottler,
    watchdog: Option<Arc<TrackingWatchdog>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }
}

impl AcquisitionController {
    /// Spawn the controller thread. The controller stays `Idle` until
    /// [`start`](Self::start) is called.
    pub fn spawn(parts: PipelineParts, settings: ControllerSettings) -> io::Result<Self> {
        let (command_tx, command_rx) = unbounded();

        let on_candidate: CandidateHandler = {
            let tx = command_tx.clone();
            Arc::new(move |cycle, region| {
                let _ = tx.send(Command::CandidateFound { cycle, region });
            })
        };
        let gate = DetectionGate::new(parts.detector, settings.filters.clone());
        let throttler = FrameThrottler::new(gate, on_candidate)?;

        let snapshot = Arc::new(RwLock::new(Snapshot::default()));
        let notifications = NotificationBus::new();
        let watchdog = settings.tracking_grace.map(|grace| Arc::new(TrackingWatchdog::new(grace)));

        let runtime = Runtime {
            machine: AcquisitionStateMachine::new(),
            throttler: throttler.clone(),
            frames: parts.frames,
            service: parts.service,
            surfaces: parts.surfaces,
            settings,
            polling: None,
            watchdog: watchdog.clone(),
            command_tx: command_tx.clone(),
            notifications: notifications.clone(),
            snapshot: Arc::clone(&snapshot),
        };

        let handle = match thread::Builder::new()
            .name("acquisition-controller".into())
            .spawn(move || runtime.run(command_rx))
        {
            Ok(handle) => handle,
            Err(err) => {
                throttler.shutdown();
                return Err(err);
            }
        };

        Ok(Self {
            inner: Arc::new(ControllerInner {
                command_tx,
                snapshot,
                notifications,
                throttler,
                watchdog,
                thread: Mutex::new(Some(handle)),
            }),
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        let description = command.description();
        self.inner
            .command_tx
            .send(command)
            .map_err(|_| anyhow!("Failed to send '{}': controller has shut down", description))
    }

    /// Begin searching (launch or explicit restart)
    pub fn start(&self) -> Result<()> {
        self.send(Command::StartSearch)
    }

    /// User retry after a failure
    pub fn retry(&self) -> Result<()> {
        self.send(Command::Retry)
    }

    /// The tracked anchor is gone
    pub fn tracking_lost(&self) -> Result<()> {
        self.send(Command::TrackingLost)
    }

    /// Anchor update from the AR session
    pub fn anchor_updated(&self, tracked: bool) {
        if let Some(watchdog) = &self.inner.watchdog {
            watchdog.anchor_updated(tracked);
        }
    }

    pub fn session_failed(&self, failure: SessionFailure) -> Result<()> {
        self.send(Command::SessionFailed(failure))
    }

    /// Current state as of the last processed command
    pub fn state(&self) -> AcquisitionState {
        self.inner.snapshot.read().state.clone()
    }

    pub fn cycle(&self) -> SearchCycle {
        self.inner.snapshot.read().cycle
    }

    pub fn notifications(&self) -> &NotificationBus {
        &self.inner.notifications
    }

    pub fn throttler(&self) -> &FrameThrottler {
        &self.inner.throttler
    }

    /// Stop every worker and wait for the controller thread
    pub fn shutdown(&self) {
        let _ = self.inner.command_tx.send(Command::Shutdown);
        if let Some(handle) = self.inner.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Everything owned by the controller thread
struct Runtime {
    machine: AcquisitionStateMachine,
    throttler: FrameThrottler,
    frames: Arc<dyn FrameSource>,
    service: Arc<dyn ScoreService>,
    surfaces: Surfaces,
    settings: ControllerSettings,
    polling: Option<PollingSession>,
    watchdog: Option<Arc<TrackingWatchdog>>,
    command_tx: Sender<Command>,
    notifications: NotificationBus,
    snapshot: Arc<RwLock<Snapshot>>,
}

impl Runtime {
    fn run(mut self, commands: Receiver<Command>) {
        info!("Acquisition controller started");

        while let Ok(command) = commands.recv() {
            if let Command::Shutdown = command {
                break;
            }
            self.handle(command);
        }

        self.stop_workers();
        self.notifications.publish(Notification::Shutdown);
        info!("Acquisition controller stopped");
    }

    fn handle(&mut self, command: Command) {
        let description = command.description();
        let from = self.machine.state().description();
        let from_cycle = self.machine.cycle();
        // Published once the new state is visible through the snapshot
        let mut pending = Vec::new();

        let outcome = match command {
            Command::StartSearch => Ok(self.machine.start_search()),
            Command::Retry => self.machine.retry(),
            Command::CandidateFound { cycle, region } => {
                let confidence = region.confidence;
                let outcome = self.machine.candidate_found(cycle, region);
                match &outcome {
                    Ok(_) => pending.push(Notification::CandidateDispatched { cycle, confidence }),
                    // The claim raced a new cycle; let the current one dispatch
                    Err(TransitionError::StaleCycle { .. }) if self.machine.state().is_searching() => {
                        self.throttler.gate().reset_dispatch()
                    }
                    Err(_) => {}
                }
                outcome
            }
            Command::UploadFinished { cycle, result: Ok(payload) } => {
                let outcome = self.machine.upload_succeeded(cycle, payload.clone());
                if outcome.is_ok() {
                    match payload.game_key() {
                        Some(game_id) => info!("Recognised game {} ({})", game_id, payload.score_line()),
                        None => warn!("Recognised {} without a game id, not polling", payload.score_line()),
                    }
                    pending.push(Notification::GameRecognised { payload });
                }
                outcome
            }
            Command::UploadFinished { cycle, result: Err(err) } => {
                let reason = err.to_string();
                let outcome = self.machine.upload_failed(cycle, reason.clone());
                if outcome.is_ok() {
                    error!("Upload failed: {:#}", anyhow::Error::new(err));
                    pending.push(Notification::UploadFailed { cycle, reason });
                }
                outcome
            }
            Command::PollUpdated { cycle, payload } => {
                let outcome = self.machine.poll_updated(cycle, payload.clone());
                if outcome.is_ok() {
                    debug!("Game updated: {}", payload.score_line());
                    pending.push(Notification::PayloadUpdated { payload });
                }
                outcome
            }
            Command::TrackingLost => self.machine.tracking_lost(),
            Command::WatchdogExpired { cycle } => self.machine.watchdog_expired(cycle),
            Command::SessionFailed(failure) => {
                match &failure {
                    SessionFailure::InvalidReferenceImage => {
                        warn!("The detected rectangle cannot be tracked, searching again")
                    }
                    SessionFailure::Other(reason) => {
                        error!("AR session failed: {}", reason);
                        pending.push(Notification::SessionFailed {
                            reason: reason.clone(),
                        });
                    }
                }
                Ok(self.machine.session_failed(failure))
            }
            Command::Shutdown => Ok(Vec::new()),
        };

        let effects = match outcome {
            Ok(effects) => effects,
            Err(err) => {
                debug!("{}: {}", description, err);
                return;
            }
        };

        for effect in effects {
            self.apply(effect);
        }

        let to = self.machine.state().description();
        let cycle = self.machine.cycle();
        *self.snapshot.write() = Snapshot {
            state: self.machine.state().clone(),
            cycle,
        };

        if from != to || from_cycle != cycle {
            info!("{} -> {} (cycle {})", from, to, cycle);
            self.notifications.publish(Notification::StateChanged { from, to, cycle });
        }
        for notification in pending {
            self.notifications.publish(notification);
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::StopPolling => {
                if let Some(mut session) = self.polling.take() {
                    session.stop();
                }
            }
            Effect::ClearOverlay => self.surfaces.overlay.clear(),
            Effect::HideRetry => self.surfaces.retry.hide(),
            Effect::ShowRetry => self.surfaces.retry.show(),
            Effect::BeginCycle(cycle) => self.throttler.begin_cycle(cycle),
            Effect::ResetDispatch => self.throttler.gate().reset_dispatch(),
            Effect::ShowMessage { text, auto_hide } => self.surfaces.messages.show_message(&text, auto_hide),
            Effect::StartSampling => {
                if let Err(err) = self
                    .throttler
                    .start_sampling(Arc::clone(&self.frames), self.settings.frame_interval)
                {
                    error!("Failed to start frame sampling: {}", err);
                }
            }
            Effect::StopSampling => self.throttler.stop_sampling(),
            Effect::StartLoading => self.surfaces.loading.start(),
            Effect::StopLoading => self.surfaces.loading.stop(),
            Effect::PlaceRegion(corners) => self.surfaces.overlay.place_region(&corners),
            Effect::ArmWatchdog(cycle) => {
                let Some(watchdog) = &self.watchdog else {
                    return;
                };
                let tx = self.command_tx.clone();
                if let Err(err) = watchdog.arm(move || {
                    let _ = tx.send(Command::WatchdogExpired { cycle });
                }) {
                    warn!("Failed to arm tracking watchdog: {}", err);
                }
            }
            Effect::DisarmWatchdog => {
                if let Some(watchdog) = &self.watchdog {
                    watchdog.disarm();
                }
            }
            Effect::Upload { cycle, region } => self.spawn_upload(cycle, region),
            Effect::RenderPayload(payload) => self.surfaces.overlay.show_payload(&payload),
            Effect::StartPolling { cycle, game_id } => self.start_polling(cycle, game_id),
        }
    }

    fn spawn_upload(&self, cycle: SearchCycle, region: DetectedRegion) {
        let service = Arc::clone(&self.service);
        let tx = self.command_tx.clone();

        let spawned = thread::Builder::new().name("upload".into()).spawn(move || {
            let result = service.upload(&region);
            let _ = tx.send(Command::UploadFinished { cycle, result });
        });

        if let Err(err) = spawned {
            let _ = self.command_tx.send(Command::UploadFinished {
                cycle,
                result: Err(UploadError::NetworkError(format!("failed to start upload: {}", err))),
            });
        }
    }

    fn start_polling(&mut self, cycle: SearchCycle, game_id: String) {
        if let Some(mut previous) = self.polling.take() {
            previous.stop();
        }

        let tx = self.command_tx.clone();
        let on_update: UpdateHandler = Arc::new(move |payload: Payload| {
            let _ = tx.send(Command::PollUpdated { cycle, payload });
        });

        match PollingSession::start(Arc::clone(&self.service), game_id, self.settings.poll_interval, on_update) {
            Ok(session) => self.polling = Some(session),
            Err(err) => error!("Failed to start polling: {}", err),
        }
    }

    fn stop_workers(&mut self) {
        if let Some(mut session) = self.polling.take() {
            session.stop();
        }
        if let Some(watchdog) = &self.watchdog {
            watchdog.disarm();
        }
        self.throttler.shutdown();
    }
}
