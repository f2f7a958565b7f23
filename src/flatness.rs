//! Flatness analysis over the ordered sample sequence.
//!
//! A least-squares line `y = a*i + b` is fitted against sample index (the
//! position along the measured path, not acquisition time). Each sample's
//! deviation from that line tells where to shim (surface below the line) or
//! scrape (surface above it). The fit is global, so every sample is
//! recomputed whenever the sequence changes.

use serde::{Deserialize, Serialize};

use crate::samples::Sample;

/// Fitted reference line over sample indices.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineFit {
    /// Change in height per sample position.
    pub slope: f64,
    /// Fitted height at index 0.
    pub intercept: f64,
}

impl LineFit {
    /// Fitted height at index `i`.
    pub fn at(&self, i: usize) -> f64 {
        self.slope * i as f64 + self.intercept
    }
}

/// Least-squares fit of `ys` against their indices.
///
/// Uses centred sums so long sequences with a large common offset do not lose
/// precision. A single value fits a flat line through itself.
pub fn fit_line(ys: &[f64]) -> Option<LineFit> {
    let n = ys.len();
    match n {
        0 => None,
        1 => Some(LineFit {
            slope: 0.0,
            intercept: ys[0],
        }),
        _ => {
            let nf = n as f64;
            let x_mean = (nf - 1.0) / 2.0;
            let y_mean = ys.iter().sum::<f64>() / nf;
            let (sxy, sxx) = ys.iter().enumerate().fold((0.0, 0.0), |(sxy, sxx), (i, &y)| {
                let dx = i as f64 - x_mean;
                (sxy + dx * (y - y_mean), sxx + dx * dx)
            });
            let slope = sxy / sxx;
            Some(LineFit {
                slope,
                intercept: y_mean - slope * x_mean,
            })
        }
    }
}

/// Recompute deviation, shim and scrape for every sample in place.
pub fn apply(samples: &mut [Sample]) -> Option<LineFit> {
    let ys: Vec<f64> = samples.iter().map(|s| s.y).collect();
    let fit = fit_line(&ys)?;
    for (i, sample) in samples.iter_mut().enumerate() {
        let error = if ys.len() == 1 { 0.0 } else { sample.y - fit.at(i) };
        sample.lin_y_error = error;
        sample.shim = (-error).max(0.0);
        sample.scrape = error.max(0.0);
    }
    Some(fit)
}

/// Build flattened samples from raw heights.
pub fn flatten(ys: &[f64]) -> Vec<Sample> {
    let mut samples: Vec<Sample> = ys.iter().copied().map(Sample::new).collect();
    apply(&mut samples);
    samples
}
