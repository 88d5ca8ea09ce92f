//! Composite stretch tuned for full-disk solar images
//!
//! The disk and the faint structures around it (prominences) have very
//! different dynamic ranges. The disk is gamma-stretched while the exterior
//! is taken from a brighter, background-neutralized copy; the two are blended
//! through a smoothed exterior mask. A cutoff driven by the histogram peak of
//! the disk then sets the white level, and a light CLAHE pass is mixed in for
//! local contrast.

use ndarray::{Array2, Zip};

use solex_math::Ellipse;

use crate::error::InvalidParameter;
use crate::image::MonoImage;
use crate::resample::{gaussian_blur, resize};
use crate::stretching::clahe::ClaheStrategy;
use crate::stretching::cutoff::CutoffStrategy;
use crate::stretching::gamma::apply_gamma;
use crate::stretching::histogram::find_lo_hi;
use crate::stretching::StretchingStrategy;

pub const DEFAULT_AUTOHISTOGRAM_GAMMA: f64 = 1.5;

/// Exponent of the brightening pass applied to the exterior
const PROTUS_GAMMA: f64 = 0.75;

/// Share of the highlights kept above the histogram-driven cutoff
const CUTOFF_RATIO: f32 = 0.5;

/// Weight of the CLAHE pass in the final blend
const CLAHE_WEIGHT: f32 = 0.25;

/// The exterior mask is smoothed at `1 / MASK_DOWNSCALE` resolution
const MASK_DOWNSCALE: usize = 16;
const MASK_BLUR_RADIUS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutohistogramStrategy {
    gamma: f64,
}

impl Default for AutohistogramStrategy {
    fn default() -> Self {
        Self {
            gamma: DEFAULT_AUTOHISTOGRAM_GAMMA,
        }
    }
}

impl AutohistogramStrategy {
    /// # Errors
    /// `InvalidParameter` unless `gamma > 1`.
    pub fn new(gamma: f64) -> Result<Self, InvalidParameter> {
        if !(gamma > 1.0 && gamma.is_finite()) {
            return Err(InvalidParameter::new("gamma", gamma, "must be > 1"));
        }
        Ok(Self { gamma })
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }
}

/// Subtracts the mean level of the pixels outside `ellipse`, clamping at 0.
pub fn neutralize_background(data: &mut Array2<f32>, ellipse: &Ellipse) {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for ((y, x), &v) in data.indexed_iter() {
        if !ellipse.is_within(x as f64, y as f64) {
            sum += v as f64;
            count += 1;
        }
    }
    if count == 0 {
        return;
    }
    let level = (sum / count as f64) as f32;
    log::trace!("Neutralizing background level {level:.1}");
    data.par_mapv_inplace(|v| (v - level).max(0.0));
}

/// Smooth mask equal to 1 far outside the disk and close to 0 inside.
///
/// The hard disk mask is blurred at a sixteenth of the resolution and scaled
/// back, which gives a wide transition across the limb.
pub fn exterior_mask(width: usize, height: usize, ellipse: &Ellipse) -> Array2<f32> {
    let mask = Array2::from_shape_fn((height, width), |(y, x)| {
        if ellipse.is_within(x as f64, y as f64) {
            0.0
        } else {
            1.0
        }
    });
    let small = resize(
        &mask,
        (width / MASK_DOWNSCALE).max(1),
        (height / MASK_DOWNSCALE).max(1),
    );
    let blurred = gaussian_blur(&small, MASK_BLUR_RADIUS);
    resize(&blurred, width, height).mapv(|v| v.clamp(0.0, 1.0))
}

impl StretchingStrategy for AutohistogramStrategy {
    fn stretch(&self, image: &mut MonoImage) {
        let ellipse = image.ellipse().copied();
        let original = image.data().clone();
        apply_gamma(image.data_mut(), self.gamma);

        if let Some(ellipse) = ellipse {
            let mut protus = original;
            neutralize_background(&mut protus, &ellipse);
            apply_gamma(&mut protus, PROTUS_GAMMA);
            let mask = exterior_mask(image.width(), image.height(), &ellipse);
            let exponent = (2.0 * self.gamma) as f32;
            Zip::from(image.data_mut())
                .and(&protus)
                .and(&mask)
                .par_for_each(|disk, &exterior, &m| {
                    let weight = m.powf(exponent);
                    *disk = *disk * (1.0 - weight) + exterior * weight;
                });
        }

        match find_lo_hi(image.data()) {
            Ok(lohi) => {
                let high = (lohi.hi > 0.0).then_some(lohi.hi);
                log::debug!("Autohistogram cutoff lo={} hi={}", lohi.lo, lohi.hi);
                // The ratio is a constant within range and the bound is positive
                if let Ok(cutoff) = CutoffStrategy::new(CUTOFF_RATIO, high) {
                    cutoff.stretch(image);
                }
            }
            Err(e) => log::warn!("Skipping dynamic cutoff: {e}"),
        }

        let mut equalized = image.clone();
        ClaheStrategy::default().stretch(&mut equalized);
        Zip::from(image.data_mut())
            .and(equalized.data())
            .par_for_each(|v, &c| *v = *v * (1.0 - CLAHE_WEIGHT) + c * CLAHE_WEIGHT);
    }
}
