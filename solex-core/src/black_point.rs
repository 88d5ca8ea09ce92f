//! Sky background estimation.

use ndarray::Array2;

use solex_math::Ellipse;

/// Multiplier applied by the workflow on top of [`estimate_black_point`]
pub const BLACK_POINT_SAFETY_FACTOR: f32 = 1.2;

/// Value returned when no background pixel was found
pub const BLACK_POINT_UNSET: f64 = 0.0;

/// Estimates the background level from the pixels outside the disk.
///
/// Only strictly positive pixels outside `ellipse` contribute. Each sample is
/// weighted by its normalized distance to the image center
/// (`2 * dist / (width + height)`), so the corners, which are the darkest
/// part of the sky, dominate over the scattered light close to the limb. The
/// mean is accumulated incrementally.
///
/// # Returns
/// The weighted mean, or [`BLACK_POINT_UNSET`] when no pixel qualifies.
pub fn estimate_black_point(data: &Array2<f32>, ellipse: &Ellipse) -> f64 {
    let (height, width) = data.dim();
    let cx = width as f64 / 2.0;
    let cy = height as f64 / 2.0;
    let norm = (width + height) as f64;

    let mut estimate = BLACK_POINT_UNSET;
    let mut count = 0u64;
    for ((y, x), &v) in data.indexed_iter() {
        if v <= 0.0 || ellipse.is_within(x as f64, y as f64) {
            continue;
        }
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        let offcenter = 2.0 * (dx * dx + dy * dy).sqrt() / norm;
        count += 1;
        estimate += (offcenter * v as f64 - estimate) / count as f64;
    }
    log::debug!("Black point estimated from {count} background pixels: {estimate:.2}");
    estimate
}
