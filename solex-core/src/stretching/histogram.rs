//! Intensity histograms and peak analysis for automatic stretching.

use ndarray::Array2;
use thiserror::Error;

use crate::image::MAX_PIXEL_VALUE;

/// Number of bins of the analysis histogram
pub const HISTOGRAM_BINS: usize = 256;

/// Width of a bin in pixel units
pub const BIN_WIDTH: f32 = (MAX_PIXEL_VALUE + 1.0) / HISTOGRAM_BINS as f32;

/// A peak rising this many times above the running reference wins at once
const SATURATION_JUMP: f64 = 100.0;

/// Scanning stops on a peak below this fraction of the reference
const PEAK_DROP_RATIO: f64 = 0.25;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistogramError {
    #[error("Histogram has no peak besides the background")]
    NoPeaks,
}

/// Counts of pixel values per bin over `[0, MAX_PIXEL_VALUE]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    counts: Vec<u64>,
}

impl Histogram {
    pub fn of<'a>(values: impl IntoIterator<Item = &'a f32>, bins: usize) -> Self {
        let bins = bins.max(1);
        let mut counts = vec![0u64; bins];
        let scale = bins as f32 / (MAX_PIXEL_VALUE + 1.0);
        for &v in values {
            if !v.is_finite() {
                continue;
            }
            let bin = (v.clamp(0.0, MAX_PIXEL_VALUE) * scale) as usize;
            counts[bin.min(bins - 1)] += 1;
        }
        Self { counts }
    }

    pub fn from_counts(counts: Vec<u64>) -> Self {
        Self { counts }
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// 3-tap smoothing: `(1, 2, 1) / 4` inside, `(2, 1) / 3` on both edges.
    pub fn smoothed(&self) -> Vec<f64> {
        let values = &self.counts;
        let n = values.len();
        if n < 2 {
            return values.iter().map(|&v| v as f64).collect();
        }
        let mut result = vec![0.0; n];
        result[0] = (2 * values[0] + values[1]) as f64 / 3.0;
        for i in 1..n - 1 {
            result[i] = (values[i - 1] + 2 * values[i] + values[i + 1]) as f64 / 4.0;
        }
        result[n - 1] = (2 * values[n - 1] + values[n - 2]) as f64 / 3.0;
        result
    }
}

/// Picks the reference peak of a smoothed histogram.
///
/// Local maxima are collected left to right, ignoring the first one which is
/// the sky background. The remaining peaks are scanned from the right: a
/// peak higher than the current reference becomes the reference, and the
/// scan stops right away if it is more than 100 times higher (saturated
/// disk). A lower peak under a quarter of the reference ends the scan.
///
/// # Errors
/// `HistogramError::NoPeaks` when no peak remains after skipping the background.
pub fn find_rightmost_peak(values: &[f64]) -> Result<usize, HistogramError> {
    let mut peaks = Vec::new();
    let mut background_skipped = false;
    for i in 0..values.len().saturating_sub(1) {
        let previous = if i == 0 { 0.0 } else { values[i - 1] };
        let value = values[i];
        if value > previous && value > values[i + 1] {
            if !background_skipped {
                background_skipped = true;
                continue;
            }
            peaks.push((i, value));
        }
    }

    let mut reference = 0.0;
    let mut index = None;
    for &(i, value) in peaks.iter().rev() {
        if value > reference {
            index = Some(i);
            if reference != 0.0 && value > SATURATION_JUMP * reference {
                break;
            }
        } else if index.is_some() && value < PEAK_DROP_RATIO * reference {
            break;
        }
        reference = f64::max(reference, value);
    }
    index.ok_or(HistogramError::NoPeaks)
}

/// Cutoff positions around the reference peak, in pixel units.
///
/// `lo` and `hi` are the first bins on each side of the peak where the
/// smoothed histogram falls to half the peak value, or 0 when it never does.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoHi {
    pub lo: f32,
    pub hi: f32,
}

/// # Errors
/// Propagates [`HistogramError::NoPeaks`].
pub fn find_lo_hi(data: &Array2<f32>) -> Result<LoHi, HistogramError> {
    let values = Histogram::of(data.iter(), HISTOGRAM_BINS).smoothed();
    let peak = find_rightmost_peak(&values)?;
    let cutoff = values[peak] / 2.0;

    let hi = (peak + 1..values.len())
        .find(|&i| values[i] <= cutoff)
        .map_or(0.0, |i| i as f32 * BIN_WIDTH);
    let lo = (0..peak)
        .rev()
        .find(|&i| values[i] <= cutoff)
        .map_or(0.0, |i| i as f32 * BIN_WIDTH);
    Ok(LoHi { lo, hi })
}
