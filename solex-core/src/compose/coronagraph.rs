//! Artificial coronagraph and disk/prominence mix.
//!
//! The disk is hidden behind a mask fitted tightly on the limb so that the
//! faint material around it can be stretched on its own. The mix then puts
//! the disk back, linearly stretched, inside the fitted limb.

use ndarray::{Array2, Axis, Zip};
use rayon::prelude::*;

use solex_math::{fit_ellipse, Ellipse};

use crate::error::ProcessingError;
use crate::events::InterruptFlag;
use crate::image::{MonoImage, MAX_PIXEL_VALUE};
use crate::limb::{refine_limb, DEFAULT_LIMB_RAYS};
use crate::stretching::linear::linear_stretch;

/// Relative band searched around the current limb when re-fitting the disk
pub const LIMB_TOLERANCE: f64 = 0.1;

/// Exponent of the radial attenuation applied outside the limb
const FALLOFF_EXPONENT: i32 = 10;

#[derive(Debug, Clone)]
pub struct CoronagraphProducts {
    /// Exterior only, disk masked to 0
    pub coronagraph: MonoImage,
    /// Disk from the source image, exterior from the attenuated coronagraph
    pub mix: MonoImage,
    /// Disk used as the mask
    pub ellipse: Ellipse,
}

/// Fits the limb again on the corrected image, falling back to `ellipse`.
pub fn refit_disk(data: &Array2<f32>, ellipse: &Ellipse) -> Ellipse {
    let samples = refine_limb(data, ellipse, LIMB_TOLERANCE, DEFAULT_LIMB_RAYS);
    match fit_ellipse(&samples) {
        Ok(refitted) => refitted,
        Err(e) => {
            log::debug!("Keeping the geometry ellipse for the coronagraph: {e}");
            *ellipse
        }
    }
}

/// Masks the disk and removes the sky background from the rest.
pub fn mask_disk(
    image: &MonoImage,
    ellipse: &Ellipse,
    black_point: f32,
    interrupt: &InterruptFlag,
) -> Result<MonoImage, ProcessingError> {
    let mut data = image.data().clone();
    data.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .try_for_each(|(y, mut row)| {
            interrupt.check()?;
            for (x, v) in row.iter_mut().enumerate() {
                *v = if ellipse.is_within(x as f64, y as f64) {
                    0.0
                } else {
                    (*v - black_point).max(0.0)
                };
            }
            Ok::<(), ProcessingError>(())
        })?;
    Ok(image.with_data(data))
}

/// Attenuates exterior pixels with their distance to the disk center.
///
/// Each pixel outside the disk is divided by `log2(0.99 + d / a)^10`, with
/// `a` the first semi-axis: close to the limb the factor is about 1, at two
/// semi-axes it is close to 100. This removes most of the stray light and
/// artifacts near the frame border.
pub fn prefilter(data: &mut Array2<f32>, ellipse: &Ellipse) {
    let center = ellipse.center();
    let (semi_axis, _) = ellipse.semi_axes();
    data.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(y, mut row)| {
            for (x, v) in row.iter_mut().enumerate() {
                if ellipse.is_within(x as f64, y as f64) {
                    continue;
                }
                let dist = (x as f64 - center.x).hypot(y as f64 - center.y);
                let scale = (0.99 + dist / semi_axis).log2().powi(FALLOFF_EXPONENT);
                if scale > 0.0 && scale.is_finite() {
                    *v = (*v as f64 / scale) as f32;
                }
            }
        });
}

/// Disk pixels from the linearly stretched source, the rest from the
/// attenuated coronagraph.
pub fn mix(source: &MonoImage, coronagraph: &MonoImage, ellipse: &Ellipse) -> MonoImage {
    let mut disk = source.data().clone();
    linear_stretch(&mut disk, 0.0, MAX_PIXEL_VALUE);
    let mut exterior = coronagraph.data().clone();
    prefilter(&mut exterior, ellipse);

    let mut data = Array2::zeros(disk.dim());
    Zip::indexed(&mut data)
        .and(&disk)
        .and(&exterior)
        .par_for_each(|(y, x), out, &d, &e| {
            *out = if ellipse.is_within(x as f64, y as f64) { d } else { e };
        });
    source.with_data(data)
}

/// Runs the whole coronagraph chain on a geometry-corrected image.
///
/// # Errors
/// `ProcessingError::Interrupted` when the flag is raised.
pub fn compose_coronagraph(
    image: &MonoImage,
    ellipse: &Ellipse,
    black_point: f32,
    interrupt: &InterruptFlag,
) -> Result<CoronagraphProducts, ProcessingError> {
    let ellipse = refit_disk(image.data(), ellipse);
    interrupt.check()?;
    let coronagraph = mask_disk(image, &ellipse, black_point, interrupt)?;
    let mix = mix(image, &coronagraph, &ellipse);
    Ok(CoronagraphProducts {
        coronagraph,
        mix,
        ellipse,
    })
}
