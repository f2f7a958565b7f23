//! Acquisition session state machine.
//!
//! A session collects `target_count` readings, trims outliers from both ends,
//! and averages the rest into one value. Its mode travels with it, so the
//! commit step knows whether the value is a new zero reference or a sample
//! (and which sample it replaces) without consulting any outside flags.
//!
//! ```text
//! Idle --start--> Accumulating --target reached--> Finalizing --finalize--> Idle
//!                      |
//!                      +--abort (camera lost)--> Idle
//! ```
//!
//! The session is plain data driven by the actor; it never blocks and holds
//! no locks.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analyser::Reading;
use crate::calibration::pixel_to_physical;
use crate::error::{AppResult, LevelError};

/// What a completed session produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMode {
    /// Establish a new zero reference (and clear all samples).
    Zeroing,
    /// Record a sample, appending unless `replace_index` names one to overwrite.
    Sampling {
        /// Index of the sample to overwrite.
        replace_index: Option<usize>,
    },
}

impl SessionMode {
    /// Append a new sample.
    pub const SAMPLE: SessionMode = SessionMode::Sampling {
        replace_index: None,
    };

    /// Whether this is a zeroing session.
    pub fn is_zeroing(&self) -> bool {
        matches!(self, SessionMode::Zeroing)
    }
}

/// Lifecycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No session.
    #[default]
    Idle,
    /// Collecting readings.
    Accumulating,
    /// Target reached, waiting to be finalised.
    Finalizing,
}

/// Readings collected so far.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Accepted readings.
    pub collected: usize,
    /// Readings needed.
    pub target: usize,
}

/// Values captured when a session starts.
///
/// Configuration changes made while a session runs apply to the next one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionParams {
    /// Readings to collect.
    pub target_count: usize,
    /// Percentage trimmed from each end.
    pub outlier_pct: u32,
    /// Sensor width used to scale centroids.
    pub sensor_width_mm: f64,
    /// Offset subtracted from every reading.
    pub zero_offset: f64,
}

/// What happened to a fed reading.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FeedOutcome {
    /// Not counted: no session, already finalizing, or no signal.
    Dropped,
    /// Counted; more are needed.
    Progress(Progress),
    /// Counted and the target is reached; call [`AcquisitionSession::finalize`].
    Ready(Progress),
}

/// Result of a finalized session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionOutput {
    /// Mode the session was started with.
    pub mode: SessionMode,
    /// Trimmed mean of the collected readings, in millimetres.
    pub value: f64,
}

/// Number of readings trimmed from each end of `n` at `outlier_pct`.
///
/// Clamped so at least one reading always survives.
pub fn trim_count(n: usize, outlier_pct: u32) -> usize {
    if n == 0 {
        return 0;
    }
    let k = n * outlier_pct.min(100) as usize / 100;
    k.min((n - 1) / 2)
}

/// Mean after dropping `trim_count` smallest and largest values.
pub fn trimmed_mean(values: &[f64], outlier_pct: u32) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let k = trim_count(sorted.len(), outlier_pct);
    let kept = &sorted[k..sorted.len() - k];
    Some(kept.iter().sum::<f64>() / kept.len() as f64)
}

/// One acquisition at a time.
#[derive(Debug, Default)]
pub struct AcquisitionSession {
    state: SessionState,
    mode: Option<SessionMode>,
    params: Option<SessionParams>,
    buffer: Vec<f64>,
}

impl AcquisitionSession {
    /// An idle session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Mode of the running session, if any.
    pub fn mode(&self) -> Option<SessionMode> {
        self.mode
    }

    /// Whether a session is accumulating or finalizing.
    pub fn is_active(&self) -> bool {
        self.state != SessionState::Idle
    }

    /// Current progress, if a session is running.
    pub fn progress(&self) -> Option<Progress> {
        self.params.map(|p| Progress {
            collected: self.buffer.len(),
            target: p.target_count,
        })
    }

    /// Begin a new session.
    ///
    /// # Errors
    ///
    /// `AcquisitionConflict` if a session is already running; nothing changes.
    pub fn start(&mut self, mode: SessionMode, params: SessionParams) -> AppResult<()> {
        if self.is_active() {
            return Err(LevelError::AcquisitionConflict);
        }
        if params.target_count == 0 {
            return Err(LevelError::InvalidConfiguration(
                "A session needs at least one reading".to_string(),
            ));
        }
        self.buffer.clear();
        self.buffer.reserve(params.target_count);
        self.mode = Some(mode);
        self.params = Some(params);
        self.state = SessionState::Accumulating;
        Ok(())
    }

    /// Feed one analyser reading from a frame `frame_width_px` wide.
    pub fn feed(&mut self, reading: Reading, frame_width_px: u32) -> FeedOutcome {
        let (Some(params), SessionState::Accumulating) = (self.params, self.state) else {
            return FeedOutcome::Dropped;
        };
        let Reading::Centre(raw) = reading else {
            debug!("no-signal reading dropped");
            return FeedOutcome::Dropped;
        };

        let value =
            pixel_to_physical(raw, params.sensor_width_mm, frame_width_px) - params.zero_offset;
        self.buffer.push(value);

        let progress = Progress {
            collected: self.buffer.len(),
            target: params.target_count,
        };
        if progress.collected >= progress.target {
            self.state = SessionState::Finalizing;
            FeedOutcome::Ready(progress)
        } else {
            FeedOutcome::Progress(progress)
        }
    }

    /// Reduce the buffer to one value and return to idle.
    ///
    /// Returns `None` unless the session is finalizing.
    pub fn finalize(&mut self) -> Option<SessionOutput> {
        if self.state != SessionState::Finalizing {
            return None;
        }
        let params = self.params.take()?;
        let mode = self.mode.take()?;
        let value = trimmed_mean(&self.buffer, params.outlier_pct);
        self.buffer.clear();
        self.state = SessionState::Idle;
        value.map(|value| SessionOutput { mode, value })
    }

    /// Discard the buffer and return to idle. Returns the aborted mode.
    pub fn abort(&mut self) -> Option<SessionMode> {
        let mode = self.mode.take();
        self.params = None;
        self.buffer.clear();
        self.state = SessionState::Idle;
        mode
    }
}
