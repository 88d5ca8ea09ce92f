use ndarray::Zip;

use crate::error::ProcessingError;
use crate::image::{MonoImage, RgbImage};

/// Builds the Doppler RGB image from two frames taken at `-shift` and `+shift`
/// around the line core.
///
/// Red carries the blue-shifted frame, blue the red-shifted one and green
/// their mean, so that approaching material shows red and receding material
/// blue. The metadata of `minus` is kept.
///
/// # Errors
/// `ProcessingError::InvalidBuffer` when both frames differ in size.
pub fn doppler_composite(minus: &MonoImage, plus: &MonoImage) -> Result<RgbImage, ProcessingError> {
    if minus.size() != plus.size() {
        return Err(ProcessingError::InvalidBuffer(format!(
            "Doppler frames differ in size: {} vs {}",
            minus.size(),
            plus.size()
        )));
    }
    let r = minus.data().clone();
    let b = plus.data().clone();
    let g = Zip::from(&r).and(&b).par_map_collect(|&m, &p| (m + p) / 2.0);
    let mut rgb = RgbImage::new(r, g, b)?;
    rgb.metadata = minus.metadata().clone();
    Ok(rgb)
}
