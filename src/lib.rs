//! # laser_level
//!
//! Measures the height of a projected laser line with a camera and turns a
//! sequence of such measurements into a surface flatness report.
//!
//! Frames from a [`camera::FrameSource`] are reduced to a sub-pixel line
//! centre by the [`analyser`]. On command, an [`acquisition`] session averages
//! a configured number of centres (after trimming outliers) into either a new
//! zero reference or a new sample. Every change to the sample sequence
//! recomputes the least-squares trend in [`flatness`], giving each sample its
//! shim or scrape correction.
//!
//! ## Architecture
//!
//! - [`actor`]: the single task that owns all committed state, plus the frame task
//! - [`messages`]: commands, events and snapshots exchanged with the actor
//! - [`scheduler`]: periodic sample/zero triggers
//! - [`remote`]: line-based TCP control
//! - [`export`]: tabular export in the display unit
//! - [`config`]: figment-backed settings
//!
//! ## Example
//!
//! ```no_run
//! use laser_level::actor;
//! use laser_level::camera::{CameraRegistry, MockCamera};
//! use laser_level::config::Settings;
//!
//! # async fn demo() -> laser_level::error::AppResult<()> {
//! let settings = Settings::load(None)?;
//! let mut registry = CameraRegistry::new();
//! registry.register("mock", || Box::new(MockCamera::new(640, 480)));
//!
//! let (level, task) = actor::spawn(&settings, registry);
//! level.set_camera("mock").await?;
//! level.acquire(laser_level::acquisition::SessionMode::Zeroing).await?;
//! level.shutdown().await?;
//! let _ = task.await;
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod actor;
pub mod analyser;
pub mod calibration;
pub mod camera;
pub mod config;
pub mod error;
pub mod export;
pub mod flatness;
pub mod frame;
pub mod logging;
pub mod messages;
pub mod remote;
pub mod samples;
pub mod scheduler;
pub mod units;
