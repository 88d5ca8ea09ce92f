use ndarray::Array2;

use crate::error::InvalidParameter;
use crate::image::{MonoImage, MAX_PIXEL_VALUE};
use crate::stretching::StretchingStrategy;

/// Power-law remap `v' = MAX * (v / MAX)^gamma` darkening the midtones.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GammaStrategy {
    gamma: f64,
}

impl GammaStrategy {
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

/// Power-law kernel shared by the strategies. Accepts any positive gamma, an
/// exponent below 1 brightens.
pub fn apply_gamma(data: &mut Array2<f32>, gamma: f64) {
    data.par_mapv_inplace(|v| {
        let x = (v.clamp(0.0, MAX_PIXEL_VALUE) / MAX_PIXEL_VALUE) as f64;
        (MAX_PIXEL_VALUE as f64 * x.powf(gamma)) as f32
    });
}

impl StretchingStrategy for GammaStrategy {
    fn stretch(&self, image: &mut MonoImage) {
        apply_gamma(image.data_mut(), self.gamma);
    }
}
