//! Sub-pixel sampling, rescaling and blurring of frame buffers.

use ndarray::{Array2, Axis};
use num_traits::Float;
use rayon::prelude::*;

use crate::error::ProcessingError;
use crate::events::InterruptFlag;

/// Largest buffer, in pixels, a rescale may produce (1 GiB of f32)
pub const MAX_RESCALED_PIXELS: usize = 1 << 28;

/// Linear interpolation between `a` and `b`.
#[inline]
pub fn lerp<T: Float>(a: T, b: T, t: T) -> T {
    a + (b - a) * t
}

/// Bilinear sample of `data` at the fractional position `(x, y)`.
///
/// Returns `None` outside `[0, width-1] × [0, height-1]`.
pub fn sample_bilinear(data: &Array2<f32>, x: f64, y: f64) -> Option<f32> {
    let (height, width) = data.dim();
    if width == 0 || height == 0 || !x.is_finite() || !y.is_finite() {
        return None;
    }
    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;
    if x < 0.0 || y < 0.0 || x > max_x || y > max_y {
        return None;
    }

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let top = lerp(data[[y0, x0]], data[[y0, x1]], fx);
    let bottom = lerp(data[[y1, x0]], data[[y1, x1]], fx);
    Some(lerp(top, bottom, fy))
}

/// Anisotropic rescale by `(sx, sy)`.
///
/// The output has `round(width * sx) × round(height * sy)` pixels; pixel
/// `(X, Y)` samples the source at `(X / sx, Y / sy)`. Positions falling
/// outside the source get `fill`.
///
/// # Errors
/// `ProcessingError::Interrupted` when the flag is raised while rows are
/// being computed, `ProcessingError::InvalidBuffer` when a factor is not
/// positive or the output would be empty or larger than
/// [`MAX_RESCALED_PIXELS`].
pub fn rescale(
    data: &Array2<f32>,
    sx: f64,
    sy: f64,
    fill: f32,
    interrupt: &InterruptFlag,
) -> Result<Array2<f32>, ProcessingError> {
    if !(sx > 0.0 && sy > 0.0 && sx.is_finite() && sy.is_finite()) {
        return Err(ProcessingError::InvalidBuffer(format!(
            "invalid scale factors {sx} x {sy}"
        )));
    }
    let (height, width) = data.dim();
    let new_width = (width as f64 * sx).round();
    let new_height = (height as f64 * sy).round();
    if new_width < 1.0 || new_height < 1.0 || new_width * new_height > MAX_RESCALED_PIXELS as f64 {
        return Err(ProcessingError::InvalidBuffer(format!(
            "rescaling {width}x{height} by {sx} x {sy} gives a {new_width}x{new_height} buffer"
        )));
    }
    let (new_width, new_height) = (new_width as usize, new_height as usize);
    if new_width == width && new_height == height && sx == 1.0 && sy == 1.0 {
        return Ok(data.clone());
    }

    let mut output = Array2::from_elem((new_height, new_width), fill);
    output
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .try_for_each(|(y, mut row)| {
            interrupt.check()?;
            let source_y = y as f64 / sy;
            for (x, pixel) in row.iter_mut().enumerate() {
                if let Some(v) = sample_bilinear(data, x as f64 / sx, source_y) {
                    *pixel = v;
                }
            }
            Ok::<(), ProcessingError>(())
        })?;
    Ok(output)
}

/// Resizes to exactly `new_width × new_height`, stretching both axes so that
/// corners map onto corners.
pub fn resize(data: &Array2<f32>, new_width: usize, new_height: usize) -> Array2<f32> {
    let (height, width) = data.dim();
    if width == 0 || height == 0 {
        return Array2::zeros((new_height, new_width));
    }
    let fx = if new_width > 1 {
        (width - 1) as f64 / (new_width - 1) as f64
    } else {
        0.0
    };
    let fy = if new_height > 1 {
        (height - 1) as f64 / (new_height - 1) as f64
    } else {
        0.0
    };

    let mut output = Array2::zeros((new_height, new_width));
    output
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(y, mut row)| {
            for (x, pixel) in row.iter_mut().enumerate() {
                *pixel = sample_bilinear(data, x as f64 * fx, y as f64 * fy).unwrap_or(0.0);
            }
        });
    output
}

/// Normalized 1D Gaussian kernel of `2 * radius + 1` taps.
pub fn gaussian_kernel(radius: usize) -> Vec<f32> {
    let sigma = (radius as f32 / 2.0).max(0.5);
    let mut kernel: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let d = i as f32 - radius as f32;
            (-d * d / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

/// Separable Gaussian blur with edge replication.
pub fn gaussian_blur(data: &Array2<f32>, radius: usize) -> Array2<f32> {
    if radius == 0 {
        return data.clone();
    }
    let kernel = gaussian_kernel(radius);
    let horizontal = convolve_rows(data, &kernel);
    let transposed = horizontal.t().to_owned();
    convolve_rows(&transposed, &kernel).t().to_owned()
}

fn convolve_rows(data: &Array2<f32>, kernel: &[f32]) -> Array2<f32> {
    let (height, width) = data.dim();
    let radius = (kernel.len() / 2) as isize;
    let mut output = Array2::zeros((height, width));
    output
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(data.axis_iter(Axis(0)).into_par_iter())
        .for_each(|(mut out_row, in_row)| {
            for x in 0..width {
                let mut acc = 0.0;
                for (k, weight) in kernel.iter().enumerate() {
                    let sx = (x as isize + k as isize - radius).clamp(0, width as isize - 1);
                    acc += weight * in_row[sx as usize];
                }
                out_row[x] = acc;
            }
        });
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_sample_bilinear_midpoints() {
        let data = array![[0.0f32, 10.0], [20.0, 30.0]];
        assert_relative_eq!(sample_bilinear(&data, 0.5, 0.0).unwrap(), 5.0);
        assert_relative_eq!(sample_bilinear(&data, 0.5, 0.5).unwrap(), 15.0);
        assert_relative_eq!(sample_bilinear(&data, 1.0, 1.0).unwrap(), 30.0);
        assert!(sample_bilinear(&data, -0.1, 0.0).is_none());
        assert!(sample_bilinear(&data, 0.0, 1.01).is_none());
    }

    #[test]
    fn test_rescale_dimensions_and_identity() {
        let data = Array2::from_shape_fn((10, 20), |(y, x)| (x + y) as f32);
        let flag = InterruptFlag::new();

        let same = rescale(&data, 1.0, 1.0, 0.0, &flag).unwrap();
        assert_eq!(same, data);

        let wider = rescale(&data, 1.0, 1.5, -1.0, &flag).unwrap();
        assert_eq!(wider.dim(), (15, 20));
        assert_relative_eq!(wider[[3, 4]], 4.0 + 2.0);
    }

    #[test]
    fn test_rescale_fills_outside_with_fill_value() {
        let data = Array2::from_elem((4, 4), 100.0f32);
        let out = rescale(&data, 2.0, 2.0, 7.0, &InterruptFlag::new()).unwrap();
        assert_eq!(out.dim(), (8, 8));
        // x = 7 maps to 3.5, past the last source column
        assert_eq!(out[[0, 7]], 7.0);
        assert_eq!(out[[0, 6]], 100.0);
    }

    #[test]
    fn test_rescale_observes_interrupt() {
        let data = Array2::from_elem((4, 4), 1.0f32);
        let flag = InterruptFlag::new();
        flag.interrupt();
        assert!(matches!(
            rescale(&data, 0.5, 1.0, 0.0, &flag),
            Err(ProcessingError::Interrupted)
        ));
    }

    #[test]
    fn test_rescale_rejects_empty_output() {
        let data = Array2::from_elem((100, 100), 1.0f32);
        let flag = InterruptFlag::new();
        assert!(matches!(
            rescale(&data, 1.0, 0.001, 0.0, &flag),
            Err(ProcessingError::InvalidBuffer(_))
        ));
        assert!(matches!(
            rescale(&data, 0.004, 1.0, 0.0, &flag),
            Err(ProcessingError::InvalidBuffer(_))
        ));
    }

    #[test]
    fn test_rescale_rejects_oversized_output() {
        let data = Array2::from_elem((100, 100), 1.0f32);
        // 100 x 1e8 pixels, refused before allocating
        assert!(matches!(
            rescale(&data, 1.0, 1e6, 0.0, &InterruptFlag::new()),
            Err(ProcessingError::InvalidBuffer(_))
        ));
    }

    #[test]
    fn test_gaussian_blur_preserves_flat_field() {
        let data = Array2::from_elem((9, 7), 42.0f32);
        let blurred = gaussian_blur(&data, 4);
        for v in blurred.iter() {
            assert_relative_eq!(*v, 42.0, epsilon = 1e-3);
        }
        let kernel = gaussian_kernel(4);
        assert_eq!(kernel.len(), 9);
        assert_relative_eq!(kernel.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_resize_round_trip_keeps_corners() {
        let data = array![[0.0f32, 4.0], [8.0, 12.0]];
        let up = resize(&data, 5, 5);
        assert_relative_eq!(up[[0, 0]], 0.0);
        assert_relative_eq!(up[[4, 4]], 12.0);
        assert_relative_eq!(up[[2, 2]], 6.0);
        let down = resize(&up, 2, 2);
        assert_relative_eq!(down[[1, 0]], 8.0);
    }
}
