use ndarray::Array2;

use crate::error::InvalidParameter;
use crate::image::{MonoImage, MAX_PIXEL_VALUE};
use crate::stretching::linear::linear_stretch;
use crate::stretching::StretchingStrategy;

/// Percentile used as the high bound when none is given
pub const DEFAULT_CUTOFF_PERCENTILE: f64 = 0.999;

/// Compresses values above a high bound, then stretches linearly.
///
/// A value `v > high` becomes `high + (v - high) * ratio`: a ratio of 0 clips
/// at `high`, a ratio of 1 leaves the image untouched before the linear
/// stretch. Without an explicit bound the 99.9th percentile is used, which
/// keeps a few hot pixels from flattening the whole disk.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CutoffStrategy {
    ratio: f32,
    high: Option<f32>,
}

impl CutoffStrategy {
    /// # Errors
    /// `InvalidParameter` if `ratio` is outside `[0, 1]` or `high` is not
    /// strictly positive.
    pub fn new(ratio: f32, high: Option<f32>) -> Result<Self, InvalidParameter> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(InvalidParameter::new("ratio", ratio as f64, "must be within [0, 1]"));
        }
        if let Some(h) = high {
            if !(h > 0.0 && h.is_finite()) {
                return Err(InvalidParameter::new("high", h as f64, "must be > 0"));
            }
        }
        Ok(Self { ratio, high })
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    pub fn high(&self) -> Option<f32> {
        self.high
    }
}

/// Value below which `percentile` of the pixels fall.
pub fn percentile(data: &Array2<f32>, percentile: f64) -> Option<f32> {
    let mut values: Vec<f32> = data.iter().copied().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return None;
    }
    let rank = ((values.len() - 1) as f64 * percentile.clamp(0.0, 1.0)).round() as usize;
    let (_, value, _) = values.select_nth_unstable_by(rank, f32::total_cmp);
    Some(*value)
}

impl StretchingStrategy for CutoffStrategy {
    fn stretch(&self, image: &mut MonoImage) {
        let data = image.data_mut();
        let high = self
            .high
            .or_else(|| percentile(data, DEFAULT_CUTOFF_PERCENTILE))
            .unwrap_or(MAX_PIXEL_VALUE);
        let ratio = self.ratio;
        data.par_mapv_inplace(|v| if v > high { high + (v - high) * ratio } else { v });
        linear_stretch(data, 0.0, MAX_PIXEL_VALUE);
    }
}
