//! Reading reconstructed frames from disk.

use std::path::Path;

use anyhow::{Context, Result};
use image::{ImageBuffer, Luma};
use ndarray::Array2;

use solex_core::limb::sample_limb;
use solex_core::workflow::FrameInput;
use solex_core::MonoImage;

/// Converts a 16 bit grayscale image to a `[row, column]` array.
pub fn gray16_to_array2(image: &ImageBuffer<Luma<u16>, Vec<u16>>) -> Array2<f32> {
    let (width, height) = image.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        image.get_pixel(x as u32, y as u32)[0] as f32
    })
}

/// Opens a frame and samples its limb.
///
/// Color and 8 bit inputs are converted to 16 bit luminance.
pub fn load_frame(path: &Path, pixel_shift: f64) -> Result<FrameInput> {
    let image = image::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?
        .into_luma16();
    let data = gray16_to_array2(&image);
    let samples = sample_limb(&data);
    log::info!(
        "Loaded {} ({}x{}), {} limb samples",
        path.display(),
        data.ncols(),
        data.nrows(),
        samples.len()
    );
    Ok(FrameInput::new(pixel_shift, MonoImage::new(data), samples))
}

/// File stem used to name the products of `path`.
pub fn product_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".to_string())
}
