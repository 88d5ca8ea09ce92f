use ndarray::Array2;

use crate::error::InvalidParameter;
use crate::image::{min_max, MonoImage, MAX_PIXEL_VALUE};
use crate::stretching::StretchingStrategy;

/// Affine min/max rescale onto `[lo, hi]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearStrategy {
    lo: f32,
    hi: f32,
}

impl Default for LinearStrategy {
    fn default() -> Self {
        Self {
            lo: 0.0,
            hi: MAX_PIXEL_VALUE,
        }
    }
}

impl LinearStrategy {
    /// # Errors
    /// `InvalidParameter` unless `0 <= lo < hi <= MAX_PIXEL_VALUE`.
    pub fn new(lo: f32, hi: f32) -> Result<Self, InvalidParameter> {
        if !(0.0..MAX_PIXEL_VALUE).contains(&lo) {
            return Err(InvalidParameter::new("lo", lo as f64, "must be within [0, 65535)"));
        }
        if !(hi > lo && hi <= MAX_PIXEL_VALUE) {
            return Err(InvalidParameter::new("hi", hi as f64, "must be within (lo, 65535]"));
        }
        Ok(Self { lo, hi })
    }
}

/// Rescales `data` so that its minimum maps to `lo` and maximum to `hi`.
///
/// A flat buffer has no range to stretch and is only clamped.
pub fn linear_stretch(data: &mut Array2<f32>, lo: f32, hi: f32) {
    let Some((min, max)) = min_max(data.iter().copied()) else {
        return;
    };
    let range = max - min;
    if range <= 0.0 || !range.is_finite() {
        data.par_mapv_inplace(|v| v.clamp(0.0, MAX_PIXEL_VALUE));
        return;
    }
    let scale = (hi - lo) / range;
    data.par_mapv_inplace(|v| (lo + (v - min) * scale).clamp(0.0, MAX_PIXEL_VALUE));
}

impl StretchingStrategy for LinearStrategy {
    fn stretch(&self, image: &mut MonoImage) {
        linear_stretch(image.data_mut(), self.lo, self.hi);
    }
}
