//! Geometry correction of the reconstructed disk.
//!
//! A spectroheliograph scan builds the image one column per frame. A slit
//! that is not perpendicular to the drift direction shears the disk, and a
//! frame rate that does not match the drift speed squeezes or stretches it
//! horizontally. The corrector removes the shear row by row, rescales the
//! buffer anisotropically so the disk becomes round, and pushes the disk
//! ellipse and every coordinate-bearing metadata entry through the same
//! transform. An optional square crop around the disk follows.

use ndarray::{Array2, ArrayView1, ArrayViewMut1, Axis};
use rayon::prelude::*;

use solex_math::{Ellipse, PixelTransform};

use crate::error::ProcessingError;
use crate::events::{Broadcaster, InterruptFlag, ProcessingEvent};
use crate::image::MonoImage;
use crate::params::{AutocropMode, GeometryParams};
use crate::resample::rescale;

/// Relative axis difference under which a disk is treated as a circle
pub const CIRCLE_EPSILON: f64 = 0.001;

/// X/Y ratio under which the scan is considered undersampled
pub const UNDERSAMPLING_THRESHOLD: f64 = 0.98;

/// Tilt magnitude, in degrees, above which the user is advised to realign
pub const TILT_SUGGESTION_DEGREES: f64 = 1.0;

const RATIO_SNAP_TOLERANCE: f64 = 1e-6;
const TASK: &str = "Correcting geometry";

/// Output of a geometry correction.
#[derive(Debug, Clone)]
pub struct GeometryResult {
    /// Corrected (and possibly cropped) frame, metadata remapped
    pub corrected: MonoImage,
    /// Disk ellipse in the coordinates of `corrected`
    pub ellipse: Ellipse,
    /// False when the transformed ellipse could not be refitted and
    /// `ellipse` is derived from the pre-correction fit
    pub ellipse_refitted: bool,
    /// Disk used for cropping, in pre-crop corrected coordinates. Later frames
    /// of a series reuse it so that every product is cropped identically.
    pub disk: Ellipse,
    /// Tilt that was removed, radians
    pub tilt: f64,
    pub xy_ratio: f64,
    pub scale: (f64, f64),
    /// Full pixel transform from the input frame to `corrected`
    pub transform: PixelTransform,
}

/// Geometry correction stage.
#[derive(Debug, Clone)]
pub struct GeometryCorrector {
    params: GeometryParams,
    frame_rate: Option<f64>,
    black_point: f32,
    reference_disk: Option<Ellipse>,
}

impl GeometryCorrector {
    /// # Arguments
    /// * `params` - Forced tilt / ratio, autocrop mode and downsampling policy
    /// * `black_point` - Value used for pixels the rescale cannot sample
    pub fn new(params: GeometryParams, black_point: f32) -> Self {
        Self {
            params,
            frame_rate: None,
            black_point,
            reference_disk: None,
        }
    }

    /// Frame rate of the capture, enables the undersampling suggestion.
    pub fn with_frame_rate(mut self, frame_rate: Option<f64>) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    /// Disk established on the first frame of a series, used for cropping.
    pub fn with_reference_disk(mut self, disk: Option<Ellipse>) -> Self {
        self.reference_disk = disk;
        self
    }

    /// Tilt to remove, in radians.
    ///
    /// A forced tilt wins. Otherwise a near-circular disk gets no rotation
    /// since its tilt is not measurable, and any other disk uses the tilt
    /// derived from its ellipse.
    pub fn effective_tilt(&self, ellipse: &Ellipse, broadcaster: &dyn Broadcaster) -> f64 {
        let measured = ellipse.tilt_angle();
        let measured_degrees = measured.to_degrees();
        log::info!("Tilt angle: {measured_degrees:.2}°");

        if let Some(forced) = self.params.tilt_degrees {
            log::info!("Overriding tilt angle to {forced:.2}°");
            return forced.to_radians();
        }
        if ellipse.is_almost_circle(CIRCLE_EPSILON) {
            log::info!(
                "Will not apply rotation correction as sun disk is almost a circle (tilt angle is not reliable)"
            );
            return 0.0;
        }
        if measured_degrees.abs() > TILT_SUGGESTION_DEGREES {
            broadcaster.broadcast(ProcessingEvent::Suggestion(format!(
                "Tilt angle is {measured_degrees:.2}°. You should try to reduce it to less than 1°"
            )));
        }
        measured
    }

    /// X/Y ratio to compensate, snapped to exactly 1 when within rounding noise.
    pub fn effective_ratio(&self, ellipse: &Ellipse, broadcaster: &dyn Broadcaster) -> f64 {
        let ratio = match self.params.xy_ratio {
            Some(forced) => {
                log::info!("Overriding X/Y ratio to {forced:.2}");
                forced
            }
            None => {
                let detected = ellipse.xy_ratio();
                log::info!("Detected X/Y ratio: {detected:.2}");
                if detected < UNDERSAMPLING_THRESHOLD {
                    if let Some(fps) = self.frame_rate.filter(|fps| *fps > 0.0) {
                        let exposure = 1000.0 / fps;
                        broadcaster.broadcast(ProcessingEvent::Suggestion(format!(
                            "Image is undersampled by a factor of {detected:.2}. Try to use {:.2} ms exposure at acquisition instead of {exposure:.2} ms",
                            exposure * detected
                        )));
                    }
                }
                detected
            }
        };
        if (ratio - 1.0).abs() < RATIO_SNAP_TOLERANCE {
            1.0
        } else {
            ratio
        }
    }

    /// Scale factors `(sx, sy)` turning a disk of the given ratio round.
    pub fn scale_for_ratio(&self, ratio: f64) -> (f64, f64) {
        match (ratio >= 1.0, self.params.disallow_downsampling) {
            (true, false) => (1.0 / ratio, 1.0),
            (true, true) => (1.0, ratio),
            (false, false) => (1.0, ratio),
            (false, true) => (1.0 / ratio, 1.0),
        }
    }

    /// Runs the correction.
    ///
    /// # Arguments
    /// * `image` - Banding-corrected frame
    /// * `ellipse` - Disk fitted on `image`
    ///
    /// # Errors
    /// `ProcessingError::Interrupted` when the interrupt flag is raised
    /// while rows are resampled. Regression failures on the corrected
    /// ellipse are recovered.
    pub fn correct(
        &self,
        image: &MonoImage,
        ellipse: &Ellipse,
        broadcaster: &dyn Broadcaster,
        interrupt: &InterruptFlag,
    ) -> Result<GeometryResult, ProcessingError> {
        broadcaster.broadcast(ProcessingEvent::progress(0.0, TASK));

        let tilt = self.effective_tilt(ellipse, broadcaster);
        let shear = (-tilt).tan();
        let (sheared, offset) = shear_rows(image.data(), shear, interrupt)?;

        let xy_ratio = self.effective_ratio(ellipse, broadcaster);
        let (sx, sy) = self.scale_for_ratio(xy_ratio);
        let rescaled = rescale(&sheared, sx, sy, self.black_point, interrupt)?;
        interrupt.check()?;

        let transform = PixelTransform::shear_x(shear)
            .then(&PixelTransform::translation(offset, 0.0))
            .then(&PixelTransform::scale(sx, sy));
        let (corrected_ellipse, ellipse_refitted) = match transform.apply_to_ellipse(ellipse) {
            Ok(e) => (e, true),
            Err(e) => {
                log::warn!("Unable to recompute the disk ellipse after geometry correction: {e}");
                (*ellipse, false)
            }
        };

        let mut metadata = image
            .metadata()
            .remapped_with_ellipse(&transform, corrected_ellipse);
        metadata.record_step(format!(
            "Geometry correction (tilt {:.2}°, X/Y ratio {xy_ratio:.3})",
            tilt.to_degrees()
        ));
        let corrected = MonoImage::with_metadata(rescaled, metadata);

        let disk = self.reference_disk.unwrap_or(corrected_ellipse);
        let mut result = GeometryResult {
            corrected,
            ellipse: corrected_ellipse,
            ellipse_refitted,
            disk,
            tilt,
            xy_ratio,
            scale: (sx, sy),
            transform,
        };
        self.autocrop(&mut result, image.width(), broadcaster);

        broadcaster.broadcast(ProcessingEvent::progress(1.0, TASK));
        Ok(result)
    }

    fn autocrop(&self, result: &mut GeometryResult, source_width: usize, broadcaster: &dyn Broadcaster) {
        let disk = result.disk;
        let (cx, cy) = (disk.center().x.round() as i64, disk.center().y.round() as i64);
        let (width, height) = (
            result.corrected.width() as i64,
            result.corrected.height() as i64,
        );

        let (x0, y0, side) = match self.params.autocrop {
            AutocropMode::Off => return,
            AutocropMode::SourceWidth => {
                let side = source_width as i64;
                let (x0, y0) = (cx - side / 2, cy - side / 2);
                if x0 < 0 || y0 < 0 || x0 + side > width || y0 + side > height {
                    let message = format!(
                        "Cannot crop to source width ({source_width} px): the square around the disk would exceed the {width}x{height} image"
                    );
                    log::warn!("{message}");
                    broadcaster.broadcast(ProcessingEvent::Warning(message));
                    return;
                }
                (x0, y0, side)
            }
            mode => {
                let factor = mode.radius_factor().unwrap_or(1.0);
                let half = (factor * disk.radius()).ceil() as i64;
                (cx - half, cy - half, 2 * half)
            }
        };

        let cropped = crop_square(
            result.corrected.data(),
            x0,
            y0,
            side as usize,
            self.black_point,
        );
        let translation = PixelTransform::translation(-(x0 as f64), -(y0 as f64));
        let ellipse = result.ellipse.translate(-(x0 as f64), -(y0 as f64));
        let mut metadata = result
            .corrected
            .metadata()
            .remapped_with_ellipse(&translation, ellipse);
        metadata.record_step(format!("Autocrop {side}x{side} at ({x0}, {y0})"));

        result.corrected = MonoImage::with_metadata(cropped, metadata);
        result.ellipse = ellipse;
        result.transform = result.transform.then(&translation);
    }
}

/// Removes a horizontal shear `x' = x + shear * y + offset`.
///
/// The output is widened by `ceil(|height * shear|)` columns and `offset`
/// keeps every shifted row in positive columns. Each source pixel is split
/// between its two target columns with weights `1 - frac` and `frac`, and
/// contributions are accumulated. Columns left and right of the shifted row
/// replicate its first and last pixel.
///
/// # Returns
/// The sheared buffer and the applied column offset.
pub fn shear_rows(
    data: &Array2<f32>,
    shear: f64,
    interrupt: &InterruptFlag,
) -> Result<(Array2<f32>, f64), ProcessingError> {
    if shear == 0.0 || !shear.is_finite() {
        return Ok((data.clone(), 0.0));
    }
    let (height, width) = data.dim();
    let max_dx = height as f64 * shear;
    let offset = (-max_dx).max(0.0);
    // Ignore rounding noise so that an exact shear does not gain a column
    let new_width = width + (max_dx.abs() - 1e-9).ceil().max(0.0) as usize;

    let mut output = Array2::zeros((height, new_width));
    output
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(data.axis_iter(Axis(0)).into_par_iter())
        .enumerate()
        .try_for_each(|(y, (out_row, in_row))| {
            interrupt.check()?;
            let shift = y as f64 * shear + offset;
            shear_row(in_row, out_row, shift);
            Ok::<(), ProcessingError>(())
        })?;
    Ok((output, offset))
}

fn shear_row(row: ArrayView1<f32>, mut out: ArrayViewMut1<f32>, shift: f64) {
    let width = row.len();
    if width == 0 {
        return;
    }
    let out_width = out.len();
    let base = shift.floor() as i64;
    let frac = (shift - base as f64) as f32;
    let first_col = base;
    let last_col = base + width as i64;

    let pixel = |x: i64| row[x.clamp(0, width as i64 - 1) as usize];
    for x in -1..=width as i64 {
        let v = pixel(x);
        let t = x + base;
        for (col, weight) in [(t, 1.0 - frac), (t + 1, frac)] {
            if col >= first_col && col <= last_col && col >= 0 && (col as usize) < out_width {
                out[col as usize] += v * weight;
            }
        }
    }
    for col in 0..out_width as i64 {
        if col < first_col {
            out[col as usize] = row[0];
        } else if col > last_col {
            out[col as usize] = row[width - 1];
        }
    }
}

/// Copies a `side × side` window whose top-left corner is `(x0, y0)`.
/// Pixels outside the source get `fill`.
pub fn crop_square(data: &Array2<f32>, x0: i64, y0: i64, side: usize, fill: f32) -> Array2<f32> {
    let (height, width) = data.dim();
    Array2::from_shape_fn((side, side), |(y, x)| {
        let sx = x0 + x as i64;
        let sy = y0 + y as i64;
        if sx >= 0 && sy >= 0 && (sx as usize) < width && (sy as usize) < height {
            data[[sy as usize, sx as usize]]
        } else {
            fill
        }
    })
}

#[cfg(test)]
mod tests;
