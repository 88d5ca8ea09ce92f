use ndarray::Array2;

use solex_math::{Ellipse, Point2};

use crate::image::{ImageSize, MonoImage, MAX_PIXEL_VALUE};

/// Debug image showing the fitted disk and the limb samples it was fitted on.
///
/// The disk is drawn at a quarter of the full range and every sample falling
/// inside the frame is set to the maximum.
pub fn edge_detection_image(size: ImageSize, ellipse: &Ellipse, samples: &[Point2<f64>]) -> MonoImage {
    let disk_level = MAX_PIXEL_VALUE / 4.0;
    let mut data = Array2::from_shape_fn((size.height, size.width), |(y, x)| {
        if ellipse.is_within(x as f64, y as f64) {
            disk_level
        } else {
            0.0
        }
    });
    for sample in samples {
        let (x, y) = (sample.x.round(), sample.y.round());
        if x < 0.0 || y < 0.0 {
            continue;
        }
        if let Some(pixel) = data.get_mut([y as usize, x as usize]) {
            *pixel = MAX_PIXEL_VALUE;
        }
    }
    let mut image = MonoImage::new(data);
    image.metadata_mut().insert(*ellipse);
    image
}
