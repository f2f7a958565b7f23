//! Laser line extraction from a single frame.
//!
//! A frame is collapsed into a one-dimensional intensity profile across the
//! line (one value per row for a horizontal line, per column for a vertical
//! one). The line position is the intensity-weighted centroid of the part of
//! the profile that rises above a noise floor, then smoothed over time.
//!
//! ```text
//! Frame --[profile]--> Vec<f64> --[centroid above floor]--> Option<f64> --[EMA]--> Reading
//! ```

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::AnalyserConfig;
use crate::frame::{Frame, LineOrientation};

/// Result of analysing one frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Reading {
    /// Smoothed sub-pixel line position.
    Centre(f64),
    /// Nothing rose above the noise floor. Treat as lost data, never as zero.
    NoSignal,
}

impl Reading {
    /// The centre position, if the line was found.
    pub fn centre(&self) -> Option<f64> {
        match self {
            Reading::Centre(c) => Some(*c),
            Reading::NoSignal => None,
        }
    }
}

/// Diagnostic profile for display next to the camera feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntensityProfile {
    /// Mean normalised intensity per position across the line.
    pub values: Vec<f64>,
    /// Threshold below which values carried no weight.
    pub floor: f64,
    /// Highest value in the profile.
    pub peak: f64,
    /// Unsmoothed centroid for this frame.
    pub centre: Option<f64>,
    /// Sequence number of the source frame.
    pub sequence: u64,
}

/// Collapse a frame into one mean intensity per position across the line.
pub fn intensity_profile(frame: &Frame, orientation: LineOrientation) -> Vec<f64> {
    let (w, h) = (frame.width(), frame.height());
    match orientation {
        LineOrientation::Horizontal => (0..h)
            .map(|y| (0..w).map(|x| frame.intensity(x, y)).sum::<f64>() / f64::from(w))
            .collect(),
        LineOrientation::Vertical => (0..w)
            .map(|x| (0..h).map(|y| frame.intensity(x, y)).sum::<f64>() / f64::from(h))
            .collect(),
    }
}

/// Line location within a profile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineEstimate {
    /// Weighted centroid, absent when no value exceeded the floor.
    pub centre: Option<f64>,
    /// Absolute floor that was applied.
    pub floor: f64,
    /// Profile maximum.
    pub peak: f64,
}

/// Intensity-weighted centroid of the profile above its noise floor.
///
/// The floor sits `noise_floor` of the way from the profile minimum (ambient
/// light) to its peak. Profiles whose peak-to-background contrast is below
/// `min_contrast` are treated as having no line.
pub fn weighted_centroid(profile: &[f64], noise_floor: f64, min_contrast: f64) -> LineEstimate {
    let (background, peak) = profile
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if profile.is_empty() {
        return LineEstimate {
            centre: None,
            floor: 0.0,
            peak: 0.0,
        };
    }

    let contrast = peak - background;
    let floor = background + noise_floor * contrast;
    if contrast < min_contrast {
        return LineEstimate {
            centre: None,
            floor,
            peak,
        };
    }

    let (moment, mass) = profile
        .iter()
        .enumerate()
        .filter(|(_, &v)| v > floor)
        .fold((0.0, 0.0), |(m, s), (i, &v)| {
            let w = v - floor;
            (m + i as f64 * w, s + w)
        });

    let centre = if mass > 0.0 { Some(moment / mass) } else { None };
    LineEstimate {
        centre,
        floor,
        peak,
    }
}

/// Exponential moving average over successive centroids.
///
/// new = prev + (value - prev) / k, where k grows with the smoothing setting.
/// A smoothing of 0 passes values straight through.
#[derive(Debug, Clone)]
pub struct ExponentialSmoother {
    prev: Option<f64>,
    factor_inv: f64,
}

impl ExponentialSmoother {
    /// Creates a smoother for a 0-200 smoothing setting.
    pub fn new(smoothing: u32) -> Self {
        Self {
            prev: None,
            factor_inv: Self::factor_inv(smoothing),
        }
    }

    fn factor_inv(smoothing: u32) -> f64 {
        1.0 / (1.0 + f64::from(smoothing) / 10.0)
    }

    /// Change the smoothing without losing the current state.
    pub fn set_smoothing(&mut self, smoothing: u32) {
        self.factor_inv = Self::factor_inv(smoothing);
    }

    /// Feed one value and return the smoothed one.
    pub fn add(&mut self, value: f64) -> f64 {
        let next = match self.prev {
            Some(prev) => prev + (value - prev) * self.factor_inv,
            None => value,
        };
        self.prev = Some(next);
        next
    }

    /// Forget history, e.g. after switching cameras.
    pub fn reset(&mut self) {
        self.prev = None;
    }
}

/// Stateful per-camera analyser.
#[derive(Debug, Clone)]
pub struct FrameAnalyser {
    config: AnalyserConfig,
    smoother: ExponentialSmoother,
}

impl FrameAnalyser {
    /// Creates an analyser with the given settings.
    pub fn new(config: AnalyserConfig) -> Self {
        let smoother = ExponentialSmoother::new(config.smoothing);
        Self { config, smoother }
    }

    /// Current settings.
    pub fn config(&self) -> &AnalyserConfig {
        &self.config
    }

    /// Apply new settings. Smoothing history survives unless the orientation changed.
    pub fn reconfigure(&mut self, config: AnalyserConfig) {
        if config.orientation != self.config.orientation {
            self.smoother.reset();
        }
        self.smoother.set_smoothing(config.smoothing);
        self.config = config;
    }

    /// Locate the line in `frame`.
    ///
    /// No-signal frames leave the smoothing state untouched so a brief dropout
    /// does not drag the average towards zero.
    pub fn analyse(&mut self, frame: &Frame) -> (Reading, IntensityProfile) {
        let values = intensity_profile(frame, self.config.orientation);
        let estimate =
            weighted_centroid(&values, self.config.noise_floor, self.config.min_contrast);

        let reading = match estimate.centre {
            Some(c) => Reading::Centre(self.smoother.add(c)),
            None => {
                trace!(sequence = frame.sequence, "no laser line in frame");
                Reading::NoSignal
            }
        };

        let profile = IntensityProfile {
            values,
            floor: estimate.floor,
            peak: estimate.peak,
            centre: estimate.centre,
            sequence: frame.sequence,
        };
        (reading, profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelBuffer;

    fn line_frame(width: u32, height: u32, row: u32) -> Frame {
        let mut pixels = vec![10u8; (width * height) as usize];
        for x in 0..width {
            pixels[(row * width + x) as usize] = 250;
            pixels[((row - 1) * width + x) as usize] = 130;
            pixels[((row + 1) * width + x) as usize] = 130;
        }
        Frame::new(width, height, PixelBuffer::U8(pixels)).unwrap()
    }

    fn config(smoothing: u32) -> AnalyserConfig {
        AnalyserConfig {
            smoothing,
            ..AnalyserConfig::default()
        }
    }

    #[test]
    fn test_symmetric_line_centroid() {
        let frame = line_frame(8, 20, 7);
        let mut analyser = FrameAnalyser::new(config(0));
        let (reading, profile) = analyser.analyse(&frame);
        let centre = reading.centre().unwrap();
        assert!((centre - 7.0).abs() < 1e-9);
        assert_eq!(profile.values.len(), 20);
        assert!(profile.peak > profile.floor);
    }

    #[test]
    fn test_asymmetric_weights_give_subpixel_centre() {
        // weights above floor 0: 1 at index 2, 3 at index 3
        let estimate = weighted_centroid(&[0.0, 0.0, 1.0, 3.0, 0.0], 0.0, 0.1);
        assert!((estimate.centre.unwrap() - 2.75).abs() < 1e-12);
    }

    #[test]
    fn test_flat_frame_is_no_signal() {
        let frame = Frame::new(4, 4, PixelBuffer::U8(vec![80; 16])).unwrap();
        let mut analyser = FrameAnalyser::new(config(0));
        let (reading, profile) = analyser.analyse(&frame);
        assert_eq!(reading, Reading::NoSignal);
        assert!(profile.centre.is_none());
    }

    #[test]
    fn test_vertical_orientation() {
        let mut pixels = vec![0u8; 10 * 3];
        for y in 0..3 {
            pixels[y * 10 + 4] = 200;
        }
        let frame = Frame::new(10, 3, PixelBuffer::U8(pixels)).unwrap();
        let mut analyser = FrameAnalyser::new(AnalyserConfig {
            smoothing: 0,
            orientation: LineOrientation::Vertical,
            ..AnalyserConfig::default()
        });
        let (reading, _) = analyser.analyse(&frame);
        assert!((reading.centre().unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_smoothing_lags_a_step() {
        let mut smoother = ExponentialSmoother::new(10);
        assert_eq!(smoother.add(0.0), 0.0);
        // k = 2, halfway to the new value
        assert!((smoother.add(10.0) - 5.0).abs() < 1e-12);
        assert!((smoother.add(10.0) - 7.5).abs() < 1e-12);
    }

    #[test]
    fn test_zero_smoothing_passes_through() {
        let mut smoother = ExponentialSmoother::new(0);
        smoother.add(3.0);
        assert_eq!(smoother.add(42.0), 42.0);
    }

    #[test]
    fn test_no_signal_keeps_smoothing_state() {
        let mut analyser = FrameAnalyser::new(config(10));
        analyser.analyse(&line_frame(8, 20, 5));
        let dark = Frame::new(8, 20, PixelBuffer::U8(vec![0; 160])).unwrap();
        assert_eq!(analyser.analyse(&dark).0, Reading::NoSignal);
        let (reading, _) = analyser.analyse(&line_frame(8, 20, 9));
        // halfway from 5 to 9
        assert!((reading.centre().unwrap() - 7.0).abs() < 1e-9);
    }
}
