//! Sample sequence, zero reference and summary statistics.
//!
//! The sequence is owned by the orchestrating actor. Every structural change
//! builds a new vector, recomputes flatness over it, and swaps it in whole,
//! so a snapshot handed to a consumer never changes underneath it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AppResult, LevelError};
use crate::flatness;

/// One committed height measurement along the path, in millimetres.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Height relative to the zero reference.
    pub y: f64,
    /// Deviation from the fitted trend line.
    #[serde(rename = "linYError")]
    pub lin_y_error: f64,
    /// Material to add where the surface sits below the trend.
    pub shim: f64,
    /// Material to remove where the surface sits above the trend.
    pub scrape: f64,
}

impl Sample {
    /// A sample with no flatness data yet.
    pub fn new(y: f64) -> Self {
        Self {
            y,
            ..Self::default()
        }
    }
}

/// Baseline subtracted from all sample readings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ZeroReference(Option<f64>);

impl ZeroReference {
    /// A reference established at `value`.
    pub fn at(value: f64) -> Self {
        Self(Some(value))
    }

    /// Offset to subtract; zero until the first zeroing session.
    pub fn offset(&self) -> f64 {
        self.0.unwrap_or(0.0)
    }

    /// Whether a zeroing session has completed.
    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    /// The raw value, if set.
    pub fn value(&self) -> Option<f64> {
        self.0
    }
}

/// Mean, minimum and maximum of one column.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Arithmetic mean.
    pub mean: f64,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
}

impl Summary {
    fn of(values: impl Iterator<Item = f64>) -> Option<Self> {
        let (count, sum, min, max) = values.fold(
            (0usize, 0.0, f64::INFINITY, f64::NEG_INFINITY),
            |(n, s, lo, hi), v| (n + 1, s + v, lo.min(v), hi.max(v)),
        );
        (count > 0).then(|| Summary {
            mean: sum / count as f64,
            min,
            max,
        })
    }

    /// Peak-to-valley spread.
    pub fn range(&self) -> f64 {
        self.max - self.min
    }
}

/// Statistics over the whole sequence.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    /// Number of samples summarised.
    pub count: usize,
    /// Measured heights.
    pub measured: Summary,
    /// Shim corrections.
    pub shim: Summary,
    /// Scrape corrections.
    pub scrape: Summary,
}

impl SampleStats {
    /// Summarise `samples`, or `None` if empty.
    pub fn of(samples: &[Sample]) -> Option<Self> {
        Some(Self {
            count: samples.len(),
            measured: Summary::of(samples.iter().map(|s| s.y))?,
            shim: Summary::of(samples.iter().map(|s| s.shim))?,
            scrape: Summary::of(samples.iter().map(|s| s.scrape))?,
        })
    }
}

/// Versioned, flatness-consistent sample sequence.
#[derive(Clone, Debug, Default)]
pub struct SampleSet {
    samples: Arc<Vec<Sample>>,
    version: u64,
}

impl SampleSet {
    /// An empty sequence at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Incremented on every structural change.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether there are no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Borrow the current samples.
    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    /// Cheap shared handle to the current samples.
    pub fn shared(&self) -> Arc<Vec<Sample>> {
        Arc::clone(&self.samples)
    }

    /// Summary statistics, if any samples exist.
    pub fn stats(&self) -> Option<SampleStats> {
        SampleStats::of(&self.samples)
    }

    fn heights(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.y).collect()
    }

    fn install(&mut self, heights: &[f64]) {
        self.samples = Arc::new(flatness::flatten(heights));
        self.version += 1;
    }

    fn check_index(&self, index: usize) -> AppResult<()> {
        if index >= self.len() {
            return Err(LevelError::SampleIndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        Ok(())
    }

    /// Append a height and return the committed (flattened) sample.
    pub fn push(&mut self, y: f64) -> Sample {
        let mut heights = self.heights();
        heights.push(y);
        self.install(&heights);
        self.samples[self.len() - 1]
    }

    /// Overwrite the height at `index` and return the committed sample.
    pub fn replace(&mut self, index: usize, y: f64) -> AppResult<Sample> {
        self.check_index(index)?;
        let mut heights = self.heights();
        heights[index] = y;
        self.install(&heights);
        Ok(self.samples[index])
    }

    /// Remove the sample at `index`.
    pub fn remove(&mut self, index: usize) -> AppResult<Sample> {
        self.check_index(index)?;
        let removed = self.samples[index];
        let mut heights = self.heights();
        heights.remove(index);
        self.install(&heights);
        Ok(removed)
    }

    /// Remove every sample.
    pub fn clear(&mut self) {
        self.install(&[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_recomputes_everything() {
        let mut set = SampleSet::new();
        set.push(0.0);
        assert_eq!(set.as_slice()[0].lin_y_error, 0.0);
        set.push(0.0);
        set.push(3.0);
        // adding the third point tilts the line, so the first two move too
        assert!(set.as_slice()[0].lin_y_error.abs() > 0.1);
        assert_eq!(set.version(), 3);
    }

    #[test]
    fn test_snapshot_is_stable_across_changes() {
        let mut set = SampleSet::new();
        set.push(1.0);
        let before = set.shared();
        set.push(2.0);
        assert_eq!(before.len(), 1);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_replace_and_remove() {
        let mut set = SampleSet::new();
        for y in [1.0, 5.0, 3.0] {
            set.push(y);
        }
        let replaced = set.replace(1, 2.0).unwrap();
        assert_eq!(replaced.y, 2.0);
        // now an exact line
        assert!(set.as_slice().iter().all(|s| s.lin_y_error.abs() < 1e-9));

        let removed = set.remove(0).unwrap();
        assert_eq!(removed.y, 1.0);
        assert_eq!(set.len(), 2);
        assert!(matches!(
            set.remove(5),
            Err(LevelError::SampleIndexOutOfRange { index: 5, len: 2 })
        ));
    }

    #[test]
    fn test_clear_bumps_version() {
        let mut set = SampleSet::new();
        set.push(1.0);
        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.version(), 2);
    }

    #[test]
    fn test_stats() {
        let mut set = SampleSet::new();
        assert!(set.stats().is_none());
        for y in [0.0, 1.0, 0.0] {
            set.push(y);
        }
        let stats = set.stats().unwrap();
        assert_eq!(stats.count, 3);
        assert!((stats.measured.mean - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(stats.measured.range(), 1.0);
        assert!((stats.scrape.max - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_reference_defaults_to_zero() {
        let zero = ZeroReference::default();
        assert!(!zero.is_set());
        assert_eq!(zero.offset(), 0.0);
        assert_eq!(ZeroReference::at(1.5).offset(), 1.5);
    }

    #[test]
    fn test_sample_serialises_deviation_as_lin_y_error() {
        let json = serde_json::to_value(Sample::new(1.0)).unwrap();
        assert!(json.get("linYError").is_some());
    }
}
