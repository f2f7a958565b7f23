//! Message types for actor-based communication
//!
//! Commands flow from [`LevelHandle`](crate::actor::LevelHandle) clones to the
//! `LevelActor` over a bounded mpsc channel, each carrying a oneshot sender for
//! its reply. Events flow back out on a broadcast channel. The frame task talks
//! to the actor with [`FrameEvent`]s on a separate bounded channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::acquisition::{Progress, SessionMode, SessionState};
use crate::analyser::Reading;
use crate::config::{AnalyserConfig, SamplerConfig};
use crate::error::AppResult;
use crate::samples::{Sample, SampleStats, ZeroReference};
use crate::units::DisplayUnit;

/// Commands that can be sent to the LevelActor
#[derive(Debug)]
pub enum LevelCommand {
    /// Start an acquisition session and reply once it is running
    Start {
        mode: SessionMode,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Start an acquisition session and reply when it completes or aborts
    Acquire {
        mode: SessionMode,
        response: oneshot::Sender<AppResult<Completion>>,
    },

    /// Delete one sample, or all of them
    Delete {
        index: Option<usize>,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Switch to the camera with this id
    SetCamera {
        id: String,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Switch to the camera at this position in the registry
    SetCameraIndex {
        index: usize,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Get the registered camera ids
    GetCameras {
        response: oneshot::Sender<Vec<String>>,
    },

    /// Replace the sampler settings
    Configure {
        sampler: SamplerConfig,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Replace the frame analyser settings
    SetAnalyser {
        analyser: AnalyserConfig,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Change the presentation unit
    SetDisplayUnit {
        unit: DisplayUnit,
        response: oneshot::Sender<()>,
    },

    /// Fire one scheduler cycle: sample if possible, otherwise zero
    CycleTrigger {
        response: oneshot::Sender<AppResult<SessionMode>>,
    },

    /// Stop the frame task and exit
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

impl LevelCommand {
    /// Helper to create a Start command
    pub fn start(mode: SessionMode) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Start { mode, response: tx }, rx)
    }

    /// Helper to create an Acquire command
    pub fn acquire(mode: SessionMode) -> (Self, oneshot::Receiver<AppResult<Completion>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Acquire { mode, response: tx }, rx)
    }

    /// Helper to create a Delete command
    pub fn delete(index: Option<usize>) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Delete { index, response: tx }, rx)
    }

    /// Helper to create a SetCamera command
    pub fn set_camera(id: String) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetCamera { id, response: tx }, rx)
    }

    /// Helper to create a SetCameraIndex command
    pub fn set_camera_index(index: usize) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetCameraIndex { index, response: tx }, rx)
    }

    /// Helper to create a GetCameras command
    pub fn get_cameras() -> (Self, oneshot::Receiver<Vec<String>>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetCameras { response: tx }, rx)
    }

    /// Helper to create a Configure command
    pub fn configure(sampler: SamplerConfig) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Configure { sampler, response: tx }, rx)
    }

    /// Helper to create a SetAnalyser command
    pub fn set_analyser(analyser: AnalyserConfig) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetAnalyser { analyser, response: tx }, rx)
    }

    /// Helper to create a SetDisplayUnit command
    pub fn set_display_unit(unit: DisplayUnit) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetDisplayUnit { unit, response: tx }, rx)
    }

    /// Helper to create a CycleTrigger command
    pub fn cycle_trigger() -> (Self, oneshot::Receiver<AppResult<SessionMode>>) {
        let (tx, rx) = oneshot::channel();
        (Self::CycleTrigger { response: tx }, rx)
    }

    /// Helper to create a Shutdown command
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}

/// A finished acquisition session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Mode the session ran in.
    pub mode: SessionMode,
    /// Trimmed mean in millimetres. For zeroing this is the new zero reference.
    pub value: f64,
    /// The sample just committed, after flatness recomputation.
    pub latest_sample: Option<Sample>,
    /// Whether the session established a zero reference.
    pub was_zeroing: bool,
    /// When the session was committed.
    pub at: DateTime<Utc>,
}

/// Read-only view of the committed state, published after every change.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    /// Sample set version this view was taken at.
    pub version: u64,
    /// Committed samples in path order.
    pub samples: Arc<Vec<Sample>>,
    /// Current zero reference.
    pub zero: ZeroReference,
    /// Unit consumers should render in.
    pub display_unit: DisplayUnit,
    /// Summary statistics, if any samples exist.
    pub stats: Option<SampleStats>,
    /// Acquisition state.
    pub session: SessionState,
    /// Progress of the running session.
    pub progress: Option<Progress>,
    /// Active camera id.
    pub camera: Option<String>,
}

/// Notifications broadcast by the actor.
#[derive(Clone, Debug)]
pub enum LevelEvent {
    /// One more reading was accepted by the running session.
    Progress {
        mode: SessionMode,
        progress: Progress,
    },
    /// A session finished and its result was committed.
    Completed(Completion),
    /// A session was discarded without committing anything.
    Aborted { mode: SessionMode, reason: String },
    /// The sample sequence changed.
    SamplesChanged(Snapshot),
    /// The display unit changed; values need re-rendering.
    UnitsChanged(DisplayUnit),
    /// A camera became active.
    CameraChanged(String),
    /// The active camera stopped delivering frames.
    CameraLost { id: String, reason: String },
}

/// Output of the frame task.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameEvent {
    /// Camera generation that produced the event; stale generations are ignored.
    pub epoch: u64,
    /// Payload.
    pub kind: FrameEventKind,
}

/// Payload of a [`FrameEvent`].
#[derive(Clone, Debug, PartialEq)]
pub enum FrameEventKind {
    /// Analysed frame.
    Reading {
        reading: Reading,
        frame_width: u32,
    },
    /// The camera failed and the frame task has stopped.
    SourceLost(String),
}
