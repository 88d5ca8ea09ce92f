use rayon::prelude::*;

use crate::error::InvalidParameter;
use crate::image::{MonoImage, MAX_PIXEL_VALUE};
use crate::stretching::StretchingStrategy;

/// Hyperbolic arcsine stretch above a black point.
///
/// With `x` the value normalized between the black point and the image
/// maximum, the output is `MAX * asinh(k x) / asinh(k)`. The strength `k`
/// starts at `stretch * MAX / range` so that dim images are lifted harder,
/// and is kept within `[stretch, max_stretch]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcsinhStrategy {
    black_point: f32,
    stretch: f64,
    max_stretch: f64,
}

impl ArcsinhStrategy {
    /// # Errors
    /// `InvalidParameter` if the black point is negative, `stretch <= 0` or
    /// `max_stretch < stretch`.
    pub fn new(black_point: f32, stretch: f64, max_stretch: f64) -> Result<Self, InvalidParameter> {
        if !(black_point >= 0.0 && black_point.is_finite()) {
            return Err(InvalidParameter::new("black_point", black_point as f64, "must be >= 0"));
        }
        if !(stretch > 0.0 && stretch.is_finite()) {
            return Err(InvalidParameter::new("stretch", stretch, "must be > 0"));
        }
        if !(max_stretch >= stretch && max_stretch.is_finite()) {
            return Err(InvalidParameter::new("max_stretch", max_stretch, "must be >= stretch"));
        }
        Ok(Self {
            black_point,
            stretch,
            max_stretch,
        })
    }

    pub fn black_point(&self) -> f32 {
        self.black_point
    }
}

impl StretchingStrategy for ArcsinhStrategy {
    fn stretch(&self, image: &mut MonoImage) {
        let data = image.data_mut();
        let max = data.par_iter().copied().reduce(|| f32::MIN, f32::max);
        let range = (max - self.black_point) as f64;
        if range <= 0.0 || !range.is_finite() {
            let bp = self.black_point;
            data.par_mapv_inplace(|v| if v <= bp { 0.0 } else { v.min(MAX_PIXEL_VALUE) });
            return;
        }
        let k = (self.stretch * MAX_PIXEL_VALUE as f64 / range).clamp(self.stretch, self.max_stretch);
        let norm = k.asinh();
        let bp = self.black_point as f64;
        data.par_mapv_inplace(|v| {
            let x = ((v as f64 - bp) / range).clamp(0.0, 1.0);
            (MAX_PIXEL_VALUE as f64 * (k * x).asinh() / norm) as f32
        });
    }
}
