//! Custom error types for the laser level engine.
//!
//! This module defines the primary error type, `LevelError`, used across the crate.
//! Using the `thiserror` crate, it gives a single place to describe everything that
//! can go wrong between a camera frame arriving and a sample being committed.
//!
//! ## Error Hierarchy
//!
//! - **`AcquisitionConflict`**: a start command arrived while a session was
//!   accumulating. Nothing changes.
//! - **`Acquisition`**: the session was aborted (camera lost, camera switched,
//!   shutdown). The buffer is discarded and no sample is committed.
//! - **`InvalidConfiguration`**: a setting is out of range. The previously valid
//!   configuration stays in effect.
//! - **`Config`** / **`Io`** / **`Csv`**: wrapped errors from figment, the standard
//!   library and the CSV writer.
//!
//! By using `#[from]`, `LevelError` can be created from the underlying error types,
//! so the `?` operator works throughout.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, LevelError>;

/// Every failure the measurement engine can report.
#[derive(Error, Debug)]
pub enum LevelError {
    /// Figment could not load or extract the settings.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// A setting was parsed but is out of its allowed range.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// File or network I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing CSV export rows failed.
    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A session is already accumulating readings.
    #[error("An acquisition session is already in progress")]
    AcquisitionConflict,

    /// The session was aborted before it could complete.
    #[error("Acquisition aborted: {0}")]
    Acquisition(String),

    /// The requested camera id or index is not registered.
    #[error("Camera not found: {0}")]
    CameraNotFound(String),

    /// A sample index does not exist in the current sequence.
    #[error("Sample index {index} out of range ({len} samples)")]
    SampleIndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Length of the sequence at the time of the request.
        len: usize,
    },

    /// The orchestrating actor has stopped and no longer accepts commands.
    #[error("Level actor is not running")]
    ActorUnavailable,

    /// The operation needs a cargo feature this build was compiled without.
    #[error("Feature not enabled: {0}")]
    FeatureNotEnabled(String),

    /// A remote client sent a line that is not part of the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<figment::Error> for LevelError {
    fn from(err: figment::Error) -> Self {
        LevelError::Config(Box::new(err))
    }
}
