//! Actor-based orchestration of camera, analyser and acquisition.
//!
//! All committed state (samples, zero reference, the running session, the
//! active camera) lives in one `LevelActor` task and is only mutated while it
//! handles a command or a frame event. Consumers talk to it through a cloneable
//! [`LevelHandle`] and read published [`Snapshot`]s, so no locks guard the
//! sample sequence.
//!
//! Each active camera gets a long-lived frame task that pulls frames, runs the
//! [`FrameAnalyser`] and forwards readings over a bounded channel. Frame events
//! are tagged with a camera epoch; events from a replaced camera are ignored.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::acquisition::{AcquisitionSession, FeedOutcome, SessionMode, SessionParams};
use crate::analyser::{FrameAnalyser, IntensityProfile};
use crate::camera::{CameraRegistry, FrameSource};
use crate::config::{AnalyserConfig, SamplerConfig, Settings};
use crate::error::{AppResult, LevelError};
use crate::messages::{Completion, FrameEvent, FrameEventKind, LevelCommand, LevelEvent, Snapshot};
use crate::samples::{SampleSet, ZeroReference};
use crate::units::DisplayUnit;

const FRAME_TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

type ProfileSender = Arc<watch::Sender<Option<IntensityProfile>>>;

struct FrameTask {
    id: String,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<AppResult<()>>,
}

/// Actor that owns the measurement state
pub struct LevelActor {
    registry: Arc<CameraRegistry>,
    sampler: SamplerConfig,
    samples: SampleSet,
    zero: ZeroReference,
    session: AcquisitionSession,
    waiter: Option<oneshot::Sender<AppResult<Completion>>>,
    camera: Option<FrameTask>,
    epoch: u64,
    frame_tx: mpsc::Sender<FrameEvent>,
    analyser_tx: watch::Sender<AnalyserConfig>,
    profile_tx: ProfileSender,
    events: broadcast::Sender<LevelEvent>,
    snapshot_tx: watch::Sender<Snapshot>,
    shutdown_flag: bool,
}

impl LevelActor {
    /// Runs the actor event loop until shutdown or until every handle is dropped
    pub async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<LevelCommand>,
        mut frame_rx: mpsc::Receiver<FrameEvent>,
    ) {
        info!("LevelActor started");

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        info!("All handles dropped");
                        self.shutdown().await;
                        break;
                    };
                    if self.handle_command(command).await {
                        break;
                    }
                }
                Some(event) = frame_rx.recv() => {
                    self.handle_frame_event(event).await;
                }
            }
        }

        info!("LevelActor shutting down");
    }

    /// Returns true when the loop should exit.
    async fn handle_command(&mut self, command: LevelCommand) -> bool {
        match command {
            LevelCommand::Start { mode, response } => {
                let result = self.start_session(mode);
                let _ = response.send(result);
            }

            LevelCommand::Acquire { mode, response } => match self.start_session(mode) {
                Ok(()) => self.waiter = Some(response),
                Err(e) => {
                    let _ = response.send(Err(e));
                }
            },

            LevelCommand::Delete { index, response } => {
                let result = self.delete(index);
                let _ = response.send(result);
            }

            LevelCommand::SetCamera { id, response } => {
                let result = self.set_camera(&id).await;
                let _ = response.send(result);
            }

            LevelCommand::SetCameraIndex { index, response } => {
                let result = match self.registry.id_at(index).map(str::to_string) {
                    Some(id) => self.set_camera(&id).await,
                    None => Err(LevelError::CameraNotFound(format!("index {}", index))),
                };
                let _ = response.send(result);
            }

            LevelCommand::GetCameras { response } => {
                let _ = response.send(self.registry.list());
            }

            LevelCommand::Configure { sampler, response } => {
                let result = self.configure(sampler);
                let _ = response.send(result);
            }

            LevelCommand::SetAnalyser { analyser, response } => {
                let result = analyser.validate().map(|()| {
                    info!(?analyser, "Analyser reconfigured");
                    self.analyser_tx.send_replace(analyser);
                });
                if let Err(e) = &result {
                    warn!("Rejected analyser settings: {}", e);
                }
                let _ = response.send(result);
            }

            LevelCommand::SetDisplayUnit { unit, response } => {
                self.set_display_unit(unit);
                let _ = response.send(());
            }

            LevelCommand::CycleTrigger { response } => {
                // Sampling is only offered when idle with a zero reference.
                let mode = if !self.session.is_active() && self.zero.is_set() {
                    SessionMode::SAMPLE
                } else {
                    SessionMode::Zeroing
                };
                let result = self.start_session(mode).map(|()| mode);
                let _ = response.send(result);
            }

            LevelCommand::Shutdown { response } => {
                info!("Shutdown command received");
                self.shutdown().await;
                let _ = response.send(());
                return true;
            }
        }
        false
    }

    fn start_session(&mut self, mode: SessionMode) -> AppResult<()> {
        if self.session.is_active() {
            warn!(?mode, "Start rejected, a session is already running");
            return Err(LevelError::AcquisitionConflict);
        }
        if self.camera.is_none() {
            return Err(LevelError::Acquisition("no active camera".to_string()));
        }
        if let SessionMode::Sampling {
            replace_index: Some(index),
        } = mode
        {
            if index >= self.samples.len() {
                return Err(LevelError::SampleIndexOutOfRange {
                    index,
                    len: self.samples.len(),
                });
            }
        }

        let params = SessionParams {
            target_count: self.sampler.subsamples as usize,
            outlier_pct: self.sampler.outlier_pct,
            sensor_width_mm: self.sampler.sensor_width_mm,
            zero_offset: if mode.is_zeroing() {
                0.0
            } else {
                self.zero.offset()
            },
        };
        self.session.start(mode, params)?;
        info!(?mode, target = params.target_count, "Acquisition session started");
        self.publish_snapshot();
        Ok(())
    }

    async fn handle_frame_event(&mut self, event: FrameEvent) {
        if event.epoch != self.epoch {
            debug!(epoch = event.epoch, "Ignoring event from a replaced camera");
            return;
        }
        match event.kind {
            FrameEventKind::Reading {
                reading,
                frame_width,
            } => match self.session.feed(reading, frame_width) {
                FeedOutcome::Dropped => {}
                FeedOutcome::Progress(progress) => {
                    debug!(
                        collected = progress.collected,
                        target = progress.target,
                        "Reading accepted"
                    );
                    if let Some(mode) = self.session.mode() {
                        let _ = self.events.send(LevelEvent::Progress { mode, progress });
                    }
                    self.publish_snapshot();
                }
                FeedOutcome::Ready(progress) => {
                    if let Some(mode) = self.session.mode() {
                        let _ = self.events.send(LevelEvent::Progress { mode, progress });
                    }
                    self.commit();
                }
            },
            FrameEventKind::SourceLost(reason) => {
                let Some(frame_task) = self.camera.take() else {
                    return;
                };
                warn!("Camera '{}' lost: {}", frame_task.id, reason);
                // The task has already returned; join it to collect its result.
                join_frame_task(frame_task.id.clone(), frame_task.task).await;
                let _ = self.events.send(LevelEvent::CameraLost {
                    id: frame_task.id,
                    reason: reason.clone(),
                });
                self.abort_session(&format!("camera lost: {}", reason));
                self.publish_snapshot();
            }
        }
    }

    /// Single write path for session results.
    fn commit(&mut self) {
        let Some(output) = self.session.finalize() else {
            error!("Session reached its target but produced no value");
            return;
        };

        let latest_sample = match output.mode {
            SessionMode::Zeroing => {
                self.zero = ZeroReference::at(output.value);
                self.samples.clear();
                info!(zero = output.value, "Zero reference set, samples cleared");
                None
            }
            SessionMode::Sampling { replace_index } => {
                let replaced =
                    replace_index.and_then(|i| self.samples.replace(i, output.value).ok());
                let sample = match replaced {
                    Some(sample) => sample,
                    // The target index was deleted while accumulating.
                    None => self.samples.push(output.value),
                };
                info!(
                    y = sample.y,
                    count = self.samples.len(),
                    "Sample committed"
                );
                Some(sample)
            }
        };

        let completion = Completion {
            mode: output.mode,
            value: output.value,
            latest_sample,
            was_zeroing: output.mode.is_zeroing(),
            at: Utc::now(),
        };
        let snapshot = self.publish_snapshot();
        let _ = self.events.send(LevelEvent::Completed(completion.clone()));
        let _ = self.events.send(LevelEvent::SamplesChanged(snapshot));
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(Ok(completion));
        }
    }

    fn abort_session(&mut self, reason: &str) {
        let Some(mode) = self.session.abort() else {
            return;
        };
        warn!(?mode, "Acquisition aborted: {}", reason);
        self.publish_snapshot();
        let _ = self.events.send(LevelEvent::Aborted {
            mode,
            reason: reason.to_string(),
        });
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(Err(LevelError::Acquisition(reason.to_string())));
        }
    }

    fn delete(&mut self, index: Option<usize>) -> AppResult<()> {
        match index {
            Some(index) => {
                self.samples.remove(index)?;
                info!(index, "Sample deleted");
            }
            None => {
                self.samples.clear();
                info!("All samples deleted");
            }
        }
        let snapshot = self.publish_snapshot();
        let _ = self.events.send(LevelEvent::SamplesChanged(snapshot));
        Ok(())
    }

    fn configure(&mut self, sampler: SamplerConfig) -> AppResult<()> {
        if let Err(e) = sampler.validate() {
            warn!("Rejected sampler settings: {}", e);
            return Err(e);
        }
        let unit_changed = sampler.display_unit != self.sampler.display_unit;
        self.sampler = sampler;
        info!(?sampler, "Sampler reconfigured");
        if unit_changed {
            let _ = self.events.send(LevelEvent::UnitsChanged(sampler.display_unit));
        }
        self.publish_snapshot();
        Ok(())
    }

    fn set_display_unit(&mut self, unit: DisplayUnit) {
        if unit == self.sampler.display_unit {
            return;
        }
        self.sampler.display_unit = unit;
        info!(%unit, "Display unit changed");
        let _ = self.events.send(LevelEvent::UnitsChanged(unit));
        self.publish_snapshot();
    }

    async fn set_camera(&mut self, id: &str) -> AppResult<()> {
        let mut source = self.registry.create(id)?;
        source.connect().await?;

        self.abort_session("camera switched");
        self.stop_frame_task().await;

        self.epoch += 1;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(frame_loop(
            self.epoch,
            source,
            self.analyser_tx.subscribe(),
            Arc::clone(&self.profile_tx),
            self.frame_tx.clone(),
            shutdown_rx,
        ));
        self.camera = Some(FrameTask {
            id: id.to_string(),
            shutdown_tx,
            task,
        });

        info!("Camera '{}' active", id);
        let _ = self.events.send(LevelEvent::CameraChanged(id.to_string()));
        self.publish_snapshot();
        Ok(())
    }

    async fn stop_frame_task(&mut self) {
        let Some(FrameTask {
            id,
            shutdown_tx,
            task,
        }) = self.camera.take()
        else {
            return;
        };
        info!("Stopping frame task for camera '{}'", id);
        if shutdown_tx.send(()).is_err() {
            debug!("Frame task for '{}' already finished", id);
        }
        join_frame_task(id, task).await;
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: self.samples.version(),
            samples: self.samples.shared(),
            zero: self.zero,
            display_unit: self.sampler.display_unit,
            stats: self.samples.stats(),
            session: self.session.state(),
            progress: self.session.progress(),
            camera: self.camera.as_ref().map(|c| c.id.clone()),
        }
    }

    fn publish_snapshot(&self) -> Snapshot {
        let snapshot = self.snapshot();
        self.snapshot_tx.send_replace(snapshot.clone());
        snapshot
    }

    /// Shuts down the engine, stopping the frame task
    async fn shutdown(&mut self) {
        if self.shutdown_flag {
            return;
        }
        info!("Shutting down measurement engine...");
        self.shutdown_flag = true;
        self.abort_session("shutting down");
        self.stop_frame_task().await;
        self.publish_snapshot();
        info!("Measurement engine shutdown complete");
    }
}

async fn join_frame_task(id: String, task: JoinHandle<AppResult<()>>) {
    match tokio::time::timeout(FRAME_TASK_STOP_TIMEOUT, task).await {
        Ok(Ok(Ok(()))) => info!("Frame task for '{}' stopped gracefully", id),
        Ok(Ok(Err(e))) => warn!("Frame task for '{}' failed during shutdown: {}", id, e),
        Ok(Err(e)) => warn!("Frame task for '{}' panicked during shutdown: {}", id, e),
        Err(_) => warn!(
            "Frame task for '{}' did not stop within {:?}, abandoning it",
            id, FRAME_TASK_STOP_TIMEOUT
        ),
    }
}

/// Pull frames, analyse them and forward readings until told to stop or the
/// camera fails.
async fn frame_loop(
    epoch: u64,
    mut source: Box<dyn FrameSource>,
    mut analyser_rx: watch::Receiver<AnalyserConfig>,
    profile_tx: ProfileSender,
    frame_tx: mpsc::Sender<FrameEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> AppResult<()> {
    let name = source.name();
    let mut analyser = FrameAnalyser::new(*analyser_rx.borrow_and_update());

    loop {
        // Settings change between frames, never while one is being read.
        match analyser_rx.has_changed() {
            Ok(true) => analyser.reconfigure(*analyser_rx.borrow_and_update()),
            Ok(false) => {}
            Err(_) => break,
        }

        let frame = tokio::select! {
            _ = &mut shutdown_rx => {
                info!("Frame task for {} received shutdown", name);
                break;
            }
            frame = source.next_frame() => frame,
        };

        let event = match frame {
            Ok(frame) => {
                let (reading, profile) = analyser.analyse(&frame);
                profile_tx.send_replace(Some(profile));
                FrameEventKind::Reading {
                    reading,
                    frame_width: frame.width(),
                }
            }
            Err(e) => {
                error!("{} stopped delivering frames: {}", name, e);
                let lost = FrameEvent {
                    epoch,
                    kind: FrameEventKind::SourceLost(e.to_string()),
                };
                tokio::select! {
                    _ = &mut shutdown_rx => {}
                    _ = frame_tx.send(lost) => {}
                }
                return Ok(());
            }
        };

        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("Frame task for {} received shutdown", name);
                break;
            }
            sent = frame_tx.send(FrameEvent { epoch, kind: event }) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    info!("{} disconnecting...", name);
    source.disconnect().await?;
    profile_tx.send_replace(None);
    Ok(())
}

/// Cloneable front door to a running [`LevelActor`].
#[derive(Clone)]
pub struct LevelHandle {
    commands: mpsc::Sender<LevelCommand>,
    events: broadcast::Sender<LevelEvent>,
    snapshot: watch::Receiver<Snapshot>,
    profile: watch::Receiver<Option<IntensityProfile>>,
}

impl LevelHandle {
    async fn request<T>(
        &self,
        (command, response): (LevelCommand, oneshot::Receiver<T>),
    ) -> AppResult<T> {
        self.commands
            .send(command)
            .await
            .map_err(|_| LevelError::ActorUnavailable)?;
        response.await.map_err(|_| LevelError::ActorUnavailable)
    }

    /// Start a session without waiting for it to finish.
    pub async fn start(&self, mode: SessionMode) -> AppResult<()> {
        self.request(LevelCommand::start(mode)).await?
    }

    /// Start a zeroing session.
    pub async fn zero(&self) -> AppResult<()> {
        self.start(SessionMode::Zeroing).await
    }

    /// Start a session that appends a sample.
    pub async fn start_sample(&self) -> AppResult<()> {
        self.start(SessionMode::SAMPLE).await
    }

    /// Start a session that overwrites the sample at `index`.
    pub async fn replace_sample(&self, index: usize) -> AppResult<()> {
        self.start(SessionMode::Sampling {
            replace_index: Some(index),
        })
        .await
    }

    /// Run a session to completion.
    ///
    /// # Errors
    ///
    /// `AcquisitionConflict` if one is already running, `Acquisition` if it
    /// is aborted.
    pub async fn acquire(&self, mode: SessionMode) -> AppResult<Completion> {
        self.request(LevelCommand::acquire(mode)).await?
    }

    /// Delete the sample at `index`, or every sample for `None`.
    pub async fn delete(&self, index: Option<usize>) -> AppResult<()> {
        self.request(LevelCommand::delete(index)).await?
    }

    /// Switch to camera `id`.
    pub async fn set_camera(&self, id: &str) -> AppResult<()> {
        self.request(LevelCommand::set_camera(id.to_string())).await?
    }

    /// Switch to the camera at `index` in [`get_cameras`](Self::get_cameras).
    pub async fn set_camera_index(&self, index: usize) -> AppResult<()> {
        self.request(LevelCommand::set_camera_index(index)).await?
    }

    /// Registered camera ids.
    pub async fn get_cameras(&self) -> AppResult<Vec<String>> {
        self.request(LevelCommand::get_cameras()).await
    }

    /// Replace the sampler settings. Applies from the next session.
    pub async fn configure(&self, sampler: SamplerConfig) -> AppResult<()> {
        self.request(LevelCommand::configure(sampler)).await?
    }

    /// Replace the analyser settings of the running frame task.
    pub async fn set_analyser(&self, analyser: AnalyserConfig) -> AppResult<()> {
        self.request(LevelCommand::set_analyser(analyser)).await?
    }

    /// Change the presentation unit.
    pub async fn set_display_unit(&self, unit: DisplayUnit) -> AppResult<()> {
        self.request(LevelCommand::set_display_unit(unit)).await
    }

    /// Start whichever session a scheduler cycle calls for.
    pub async fn cycle_trigger(&self) -> AppResult<SessionMode> {
        self.request(LevelCommand::cycle_trigger()).await?
    }

    /// Latest published state.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch published state.
    pub fn watch_snapshot(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    /// Latest intensity profile from the frame task.
    pub fn profile(&self) -> Option<IntensityProfile> {
        self.profile.borrow().clone()
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<LevelEvent> {
        self.events.subscribe()
    }

    /// Ask the actor to stop. Join the task returned by [`spawn`] to wait for exit.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.request(LevelCommand::shutdown()).await
    }
}

/// Spawn the actor on the current runtime.
pub fn spawn(settings: &Settings, registry: CameraRegistry) -> (LevelHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(settings.channels.command_capacity);
    let (frame_tx, frame_rx) = mpsc::channel(settings.channels.reading_capacity);
    let (events, _) = broadcast::channel(settings.channels.event_capacity);
    let (analyser_tx, _) = watch::channel(settings.analyser);
    let (profile_tx, profile_rx) = watch::channel(None);
    let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot {
        display_unit: settings.sampler.display_unit,
        ..Snapshot::default()
    });

    let actor = LevelActor {
        registry: Arc::new(registry),
        sampler: settings.sampler,
        samples: SampleSet::new(),
        zero: ZeroReference::default(),
        session: AcquisitionSession::new(),
        waiter: None,
        camera: None,
        epoch: 0,
        frame_tx,
        analyser_tx,
        profile_tx: Arc::new(profile_tx),
        events: events.clone(),
        snapshot_tx,
        shutdown_flag: false,
    };
    let task = tokio::spawn(actor.run(command_rx, frame_rx));

    let handle = LevelHandle {
        commands: command_tx,
        events,
        snapshot: snapshot_rx,
        profile: profile_rx,
    };
    (handle, task)
}
