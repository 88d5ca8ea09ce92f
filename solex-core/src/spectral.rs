//! Observed spectral lines and their color curves.

use serde::{Deserialize, Serialize};

use crate::image::MAX_PIXEL_VALUE;

/// Spectral line the frames were reconstructed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectralRay {
    #[default]
    HAlpha,
    HBeta,
    CalciumK,
    CalciumH,
    SodiumD1,
    SodiumD2,
    HeliumD3,
    MagnesiumB1,
    /// Unlisted line, no color curve
    Other,
}

impl SpectralRay {
    pub const ALL: [SpectralRay; 9] = [
        SpectralRay::HAlpha,
        SpectralRay::HBeta,
        SpectralRay::CalciumK,
        SpectralRay::CalciumH,
        SpectralRay::SodiumD1,
        SpectralRay::SodiumD2,
        SpectralRay::HeliumD3,
        SpectralRay::MagnesiumB1,
        SpectralRay::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SpectralRay::HAlpha => "H-alpha",
            SpectralRay::HBeta => "H-beta",
            SpectralRay::CalciumK => "Calcium (K)",
            SpectralRay::CalciumH => "Calcium (H)",
            SpectralRay::SodiumD1 => "Sodium (D1)",
            SpectralRay::SodiumD2 => "Sodium (D2)",
            SpectralRay::HeliumD3 => "Helium (D3)",
            SpectralRay::MagnesiumB1 => "Magnesium (b1)",
            SpectralRay::Other => "Other",
        }
    }

    /// Wavelength in nanometers, `None` for [`SpectralRay::Other`]
    pub fn wavelength_nm(&self) -> Option<f64> {
        match self {
            SpectralRay::HAlpha => Some(656.281),
            SpectralRay::HBeta => Some(486.134),
            SpectralRay::CalciumK => Some(393.366),
            SpectralRay::CalciumH => Some(396.847),
            SpectralRay::SodiumD1 => Some(589.592),
            SpectralRay::SodiumD2 => Some(588.995),
            SpectralRay::HeliumD3 => Some(587.562),
            SpectralRay::MagnesiumB1 => Some(518.362),
            SpectralRay::Other => None,
        }
    }

    pub fn color_curve(&self) -> Option<ColorCurve> {
        let curve = |r: (u8, u8), g: (u8, u8), b: (u8, u8)| {
            Some(ColorCurve::new(
                ChannelCurve::new(r.0, r.1),
                ChannelCurve::new(g.0, g.1),
                ChannelCurve::new(b.0, b.1),
            ))
        };
        match self {
            SpectralRay::HAlpha => curve((64, 180), (128, 80), (128, 40)),
            SpectralRay::HBeta => curve((128, 40), (96, 140), (64, 170)),
            SpectralRay::CalciumK | SpectralRay::CalciumH => {
                curve((128, 90), (128, 40), (64, 180))
            }
            SpectralRay::SodiumD1 | SpectralRay::SodiumD2 => {
                curve((64, 170), (96, 110), (128, 40))
            }
            SpectralRay::HeliumD3 => curve((64, 170), (64, 150), (128, 40)),
            SpectralRay::MagnesiumB1 => curve((128, 60), (64, 170), (128, 60)),
            SpectralRay::Other => None,
        }
    }

    /// Doppler products are only meaningful on H-alpha
    pub fn supports_doppler(&self) -> bool {
        matches!(self, SpectralRay::HAlpha)
    }
}

/// Quadratic tone curve through `(0, 0)`, `(input, output)` and `(255, 255)`,
/// expressed on an 8-bit scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelCurve {
    a: f64,
    b: f64,
}

impl ChannelCurve {
    pub fn new(input: u8, output: u8) -> Self {
        let (x, y) = (input as f64, output as f64);
        if input == 0 || input == 255 {
            return Self { a: 0.0, b: 1.0 };
        }
        let a = (y - x) / (x * (x - 255.0));
        Self {
            a,
            b: 1.0 - 255.0 * a,
        }
    }

    /// Maps a 16-bit value through the curve, result within `[0, 65535]`.
    pub fn map(&self, value: f32) -> f32 {
        let x = (value.clamp(0.0, MAX_PIXEL_VALUE) / 257.0) as f64;
        let y = (self.a * x * x + self.b * x).clamp(0.0, 255.0);
        (y * 257.0) as f32
    }
}

/// Per-channel curves turning a mono value into an RGB triple.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorCurve {
    pub r: ChannelCurve,
    pub g: ChannelCurve,
    pub b: ChannelCurve,
}

impl ColorCurve {
    pub fn new(r: ChannelCurve, g: ChannelCurve, b: ChannelCurve) -> Self {
        Self { r, g, b }
    }

    pub fn to_rgb(&self, value: f32) -> (f32, f32, f32) {
        (self.r.map(value), self.g.map(value), self.b.map(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_channel_curve_passes_through_control_points() {
        let curve = ChannelCurve::new(64, 180);
        assert_abs_diff_eq!(curve.map(0.0), 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(curve.map(64.0 * 257.0), 180.0 * 257.0, epsilon = 1e-1);
        assert_abs_diff_eq!(curve.map(MAX_PIXEL_VALUE), MAX_PIXEL_VALUE, epsilon = 1e-1);
    }

    #[test]
    fn test_channel_curve_is_monotonic_for_stock_rays() {
        for ray in SpectralRay::ALL {
            let Some(curve) = ray.color_curve() else {
                continue;
            };
            for channel in [curve.r, curve.g, curve.b] {
                let mut previous = 0.0;
                for i in 0..=255u32 {
                    let v = channel.map((i * 257) as f32);
                    assert!(v >= previous, "{ray:?} not monotonic at {i}");
                    previous = v;
                }
            }
        }
    }

    #[test]
    fn test_only_halpha_supports_doppler() {
        let supported: Vec<_> = SpectralRay::ALL
            .iter()
            .filter(|r| r.supports_doppler())
            .collect();
        assert_eq!(supported, vec![&SpectralRay::HAlpha]);
        assert!(SpectralRay::Other.color_curve().is_none());
    }
}
