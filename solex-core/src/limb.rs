//! Disk edge sampling
//!
//! The pipeline proper receives edge samples from upstream. These helpers
//! produce them from a frame: an Otsu threshold separates disk and sky and
//! every row and column crossing of the threshold becomes a sample, and
//! [`refine_limb`] re-detects the limb along rays around a known ellipse.

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use solex_math::{fit_ellipse, Ellipse, Point2};

use crate::error::ProcessingError;
use crate::resample::sample_bilinear;

/// Number of rays used by [`refine_limb`] by default
pub const DEFAULT_LIMB_RAYS: usize = 180;

/// Computes Otsu's threshold maximizing the between-class variance.
///
/// # Arguments
/// * `image` - Input frame
/// * `bins` - Number of histogram bins (default 256)
///
/// # Returns
/// The threshold in pixel units; the minimum for a flat image.
pub fn otsu_threshold(image: ArrayView2<f32>, bins: Option<usize>) -> f32 {
    let bins = bins.unwrap_or(256).max(2);

    let min_val = image.iter().fold(f32::INFINITY, |a, &b| a.min(b));
    let max_val = image.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    if !min_val.is_finite() || (max_val - min_val).abs() < 1e-6 {
        return if min_val.is_finite() { min_val } else { 0.0 };
    }

    let mut histogram = vec![0u64; bins];
    let scale = (bins as f64 - 1.0) / (max_val - min_val) as f64;
    for &pixel in image.iter() {
        let bin = (((pixel - min_val) as f64) * scale).round() as usize;
        histogram[bin.min(bins - 1)] += 1;
    }

    let total_pixels = image.len() as f64;
    let weighted: Vec<f64> = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .collect();
    let total_mean = weighted.iter().sum::<f64>() / total_pixels;

    let mut cum_count = 0u64;
    let mut cum_mean = 0.0;
    let mut best_threshold = 0;
    let mut max_variance = 0.0;
    for t in 0..bins - 1 {
        cum_count += histogram[t];
        cum_mean += weighted[t];

        let w_bg = cum_count as f64 / total_pixels;
        if w_bg == 0.0 || w_bg == 1.0 {
            continue;
        }
        let w_fg = 1.0 - w_bg;
        let mean_bg = cum_mean / cum_count as f64;
        let mean_fg = (total_mean * total_pixels - cum_mean) / (total_pixels - cum_count as f64);

        let variance = w_bg * w_fg * (mean_bg - mean_fg).powi(2);
        if variance > max_variance {
            max_variance = variance;
            best_threshold = t;
        }
    }

    // Midway between the last background bin and the next one
    min_val + ((best_threshold as f64 + 0.5) / scale) as f32
}

/// Sub-pixel position where the profile crosses `threshold` between `i - 1` and `i`.
fn crossing(prev: f32, next: f32, i: usize, threshold: f32) -> f64 {
    let delta = next - prev;
    if delta.abs() < f32::EPSILON {
        return i as f64 - 0.5;
    }
    (i - 1) as f64 + ((threshold - prev) / delta) as f64
}

/// First rising and last falling crossing of a 1D profile.
///
/// Crossings touching the ends of the profile are ignored, the disk being
/// clipped there.
fn profile_crossings(profile: &[f32], threshold: f32) -> Vec<f64> {
    let n = profile.len();
    let mut crossings = Vec::with_capacity(2);
    if n < 3 {
        return crossings;
    }
    if profile[0] < threshold {
        if let Some(i) = (1..n).find(|&i| profile[i] >= threshold) {
            crossings.push(crossing(profile[i - 1], profile[i], i, threshold));
        }
    }
    if profile[n - 1] < threshold {
        if let Some(i) = (1..n).rev().find(|&i| profile[i - 1] >= threshold) {
            crossings.push(crossing(profile[i - 1], profile[i], i, threshold));
        }
    }
    crossings
}

/// Edge samples of the disk found by thresholding rows and columns.
pub fn sample_limb(data: &Array2<f32>) -> Vec<Point2<f64>> {
    let threshold = otsu_threshold(data.view(), None);
    log::debug!("Limb detection threshold: {threshold:.1}");

    let from_rows: Vec<Point2<f64>> = (0..data.nrows())
        .into_par_iter()
        .flat_map_iter(|y| {
            let row: Vec<f32> = data.row(y).iter().copied().collect();
            profile_crossings(&row, threshold)
                .into_iter()
                .map(move |x| Point2::new(x, y as f64))
        })
        .collect();
    let from_cols: Vec<Point2<f64>> = (0..data.ncols())
        .into_par_iter()
        .flat_map_iter(|x| {
            let col: Vec<f32> = data.column(x).iter().copied().collect();
            profile_crossings(&col, threshold)
                .into_iter()
                .map(move |y| Point2::new(x as f64, y))
        })
        .collect();

    let mut samples = from_rows;
    samples.extend(from_cols);
    samples
}

/// Detects the disk by limb sampling then ellipse regression.
///
/// # Errors
/// `ProcessingError::Regression` when the samples cannot be fitted.
pub fn detect_disk(data: &Array2<f32>) -> Result<(Ellipse, Vec<Point2<f64>>), ProcessingError> {
    let samples = sample_limb(data);
    let ellipse = fit_ellipse(&samples)?;
    Ok((ellipse, samples))
}

/// Re-samples the limb along `rays` rays cast from the ellipse center.
///
/// On each ray the search covers `[1 - tolerance, 1 + tolerance]` times the
/// distance to the current ellipse boundary and keeps the position of the
/// steepest intensity drop. The search stops at the frame border and rays
/// without any drop are skipped.
pub fn refine_limb(
    data: &Array2<f32>,
    ellipse: &Ellipse,
    tolerance: f64,
    rays: usize,
) -> Vec<Point2<f64>> {
    const STEP: f64 = 0.5;
    let center = ellipse.center();

    (0..rays)
        .into_par_iter()
        .filter_map(|i| {
            let boundary = ellipse.to_cartesian(std::f64::consts::TAU * i as f64 / rays as f64);
            let (dx, dy) = (boundary.x - center.x, boundary.y - center.y);
            let distance = (dx * dx + dy * dy).sqrt();
            if distance <= 0.0 {
                return None;
            }
            let (ux, uy) = (dx / distance, dy / distance);
            let start = distance * (1.0 - tolerance).max(0.0);
            let end = distance * (1.0 + tolerance);

            let at = |r: f64| sample_bilinear(data, center.x + r * ux, center.y + r * uy);
            let mut best: Option<(f64, f32)> = None;
            let mut r = start;
            let mut previous = at(r)?;
            while r + STEP <= end {
                let Some(next) = at(r + STEP) else {
                    break;
                };
                let fall = previous - next;
                if fall > 0.0 && best.map_or(true, |(_, d)| fall > d) {
                    best = Some((r + STEP / 2.0, fall));
                }
                previous = next;
                r += STEP;
            }
            best.map(|(r, _)| Point2::new(center.x + r * ux, center.y + r * uy))
        })
        .collect()
}
