//! Configuration using Figment
//!
//! Settings are layered, lowest precedence first:
//! 1. Built-in defaults ([`Settings::default`])
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `LASERLEVEL_`, using `__` between
//!    nested keys
//!
//! ```text
//! LASERLEVEL_APPLICATION__LOG_LEVEL=debug
//! LASERLEVEL_SAMPLER__SUBSAMPLES=25
//! LASERLEVEL_SAMPLER__DISPLAY_UNIT=um
//! ```
//!
//! Every section has a `validate` method. Runtime updates (through the actor
//! handle) validate the same way and keep the previous values on failure.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AppResult, LevelError};
use crate::frame::LineOrientation;
use crate::units::DisplayUnit;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "LASERLEVEL_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Frame analyser settings
    #[serde(default)]
    pub analyser: AnalyserConfig,
    /// Acquisition session settings
    #[serde(default)]
    pub sampler: SamplerConfig,
    /// Cyclic scheduler settings
    #[serde(default)]
    pub cycle: CycleConfig,
    /// Remote command front end
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Channel capacities between tasks
    #[serde(default)]
    pub channels: ChannelConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Laser Level".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Frame analyser configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalyserConfig {
    /// Temporal smoothing, 0 (none) to 200 (heaviest)
    pub smoothing: u32,
    /// Fraction of the peak-to-background range used as the noise floor
    pub noise_floor: f64,
    /// Minimum peak-to-background contrast (normalised) for a line to count
    pub min_contrast: f64,
    /// Direction the projected line runs across the frame
    pub orientation: LineOrientation,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            smoothing: 50,
            noise_floor: 0.25,
            min_contrast: 0.05,
            orientation: LineOrientation::Horizontal,
        }
    }
}

impl AnalyserConfig {
    /// Highest accepted smoothing value.
    pub const MAX_SMOOTHING: u32 = 200;

    /// Check ranges.
    pub fn validate(&self) -> AppResult<()> {
        if self.smoothing > Self::MAX_SMOOTHING {
            return Err(LevelError::InvalidConfiguration(format!(
                "Invalid smoothing {}. Must be 0-{}",
                self.smoothing,
                Self::MAX_SMOOTHING
            )));
        }
        if !(0.0..1.0).contains(&self.noise_floor) {
            return Err(LevelError::InvalidConfiguration(format!(
                "Invalid noise_floor {}. Must be in [0, 1)",
                self.noise_floor
            )));
        }
        if !(0.0..=1.0).contains(&self.min_contrast) {
            return Err(LevelError::InvalidConfiguration(format!(
                "Invalid min_contrast {}. Must be in [0, 1]",
                self.min_contrast
            )));
        }
        Ok(())
    }
}

/// Acquisition session configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Readings averaged into one sample
    pub subsamples: u32,
    /// Percentage of readings trimmed from each end before averaging
    pub outlier_pct: u32,
    /// Physical width of the camera sensor
    pub sensor_width_mm: f64,
    /// Unit used for presentation and export
    pub display_unit: DisplayUnit,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            subsamples: 10,
            outlier_pct: 30,
            sensor_width_mm: 5.9,
            display_unit: DisplayUnit::Millimetre,
        }
    }
}

impl SamplerConfig {
    /// Largest accepted subsample count.
    pub const MAX_SUBSAMPLES: u32 = 9999;
    /// Largest accepted outlier percentage.
    pub const MAX_OUTLIER_PCT: u32 = 99;

    /// Check ranges.
    pub fn validate(&self) -> AppResult<()> {
        if self.subsamples < 1 || self.subsamples > Self::MAX_SUBSAMPLES {
            return Err(LevelError::InvalidConfiguration(format!(
                "Invalid subsamples {}. Must be 1-{}",
                self.subsamples,
                Self::MAX_SUBSAMPLES
            )));
        }
        if self.outlier_pct > Self::MAX_OUTLIER_PCT {
            return Err(LevelError::InvalidConfiguration(format!(
                "Invalid outlier_pct {}. Must be 0-{}",
                self.outlier_pct,
                Self::MAX_OUTLIER_PCT
            )));
        }
        if !self.sensor_width_mm.is_finite() || self.sensor_width_mm <= 0.0 {
            return Err(LevelError::InvalidConfiguration(format!(
                "Invalid sensor_width_mm {}. Must be > 0",
                self.sensor_width_mm
            )));
        }
        Ok(())
    }
}

/// Cyclic scheduler configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Seconds between triggers
    pub interval_s: u64,
    /// Total run time in seconds
    pub duration_s: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval_s: 10,
            duration_s: 60,
        }
    }
}

impl CycleConfig {
    /// Accepted range for both fields, in seconds.
    pub const RANGE_S: std::ops::RangeInclusive<u64> = 5..=3600;

    /// Check ranges.
    pub fn validate(&self) -> AppResult<()> {
        for (name, value) in [("interval_s", self.interval_s), ("duration_s", self.duration_s)] {
            if !Self::RANGE_S.contains(&value) {
                return Err(LevelError::InvalidConfiguration(format!(
                    "Invalid {} {}. Must be {}-{}",
                    name,
                    value,
                    Self::RANGE_S.start(),
                    Self::RANGE_S.end()
                )));
            }
        }
        Ok(())
    }
}

/// Remote command server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Address the line protocol listens on
    pub bind: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5005".to_string(),
        }
    }
}

/// Bounded channel sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Frame task to actor readings
    pub reading_capacity: usize,
    /// Handle to actor commands
    pub command_capacity: usize,
    /// Broadcast event buffer per subscriber
    pub event_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reading_capacity: 64,
            command_capacity: 32,
            event_capacity: 256,
        }
    }
}

impl Settings {
    /// Load defaults, an optional TOML file, then environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `Io` if an explicit path does not exist, `Config` if the layers
    /// cannot be extracted, and `InvalidConfiguration` if validation fails.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(LevelError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("config file {} not found", path.display()),
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    fn extract(figment: Figment) -> AppResult<Self> {
        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate every section.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(LevelError::InvalidConfiguration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }
        self.analyser.validate()?;
        self.sampler.validate()?;
        self.cycle.validate()?;

        let ch = &self.channels;
        if ch.reading_capacity == 0 || ch.command_capacity == 0 || ch.event_capacity == 0 {
            return Err(LevelError::InvalidConfiguration(
                "Channel capacities must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the settings as TOML, e.g. to seed a config file.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| {
            LevelError::InvalidConfiguration(format!("Cannot serialise settings: {}", e))
        })
    }
}
