use ndarray::Zip;

use crate::image::{MonoImage, RgbImage, MAX_PIXEL_VALUE};
use crate::spectral::{ChannelCurve, ColorCurve};
use crate::stretching::linear::linear_stretch;

/// Maps a mono image through the color curve of a spectral line.
///
/// The values are stretched to the full range first so that the curve sees
/// the whole tone scale.
pub fn colorize(image: &MonoImage, curve: &ColorCurve) -> RgbImage {
    let mut mono = image.data().clone();
    linear_stretch(&mut mono, 0.0, MAX_PIXEL_VALUE);
    let channel = |c: &ChannelCurve| Zip::from(&mono).par_map_collect(|&v| c.map(v));
    let (r, g, b) = (channel(&curve.r), channel(&curve.g), channel(&curve.b));
    RgbImage {
        r,
        g,
        b,
        metadata: image.metadata().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectral::SpectralRay;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_colorize_endpoints_and_channel_order() {
        let curve = SpectralRay::HAlpha.color_curve().unwrap();
        let image = MonoImage::from_vec(3, 1, vec![1000.0, 2000.0, 3000.0]).unwrap();
        let rgb = colorize(&image, &curve);

        assert_eq!(rgb.size(), image.size());
        for channel in [&rgb.r, &rgb.g, &rgb.b] {
            assert_abs_diff_eq!(channel[[0, 0]], 0.0, epsilon = 1e-2);
            assert_abs_diff_eq!(channel[[0, 2]], MAX_PIXEL_VALUE, epsilon = 1.0);
        }
        let (r, g, b) = curve.to_rgb(MAX_PIXEL_VALUE / 2.0);
        assert_abs_diff_eq!(rgb.r[[0, 1]], r, epsilon = 1.0);
        assert_abs_diff_eq!(rgb.g[[0, 1]], g, epsilon = 1.0);
        assert_abs_diff_eq!(rgb.b[[0, 1]], b, epsilon = 1.0);
    }

    #[test]
    fn test_source_is_untouched() {
        let curve = SpectralRay::CalciumK.color_curve().unwrap();
        let image = MonoImage::from_vec(2, 1, vec![10.0, 20.0]).unwrap();
        let _ = colorize(&image, &curve);
        assert_eq!(image.data()[[0, 1]], 20.0);
    }
}
