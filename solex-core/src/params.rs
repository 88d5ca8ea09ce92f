//! Processing parameters
//!
//! Every group deserializes with defaults for missing fields, so a params file
//! only needs to mention what it overrides.

use serde::{Deserialize, Serialize};

use crate::error::InvalidParameter;
use crate::spectral::SpectralRay;

/// Bounds of a forced X/Y ratio
pub const MIN_XY_RATIO: f64 = 0.1;
pub const MAX_XY_RATIO: f64 = 10.0;

/// How the corrected disk is cropped after geometry correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutocropMode {
    #[default]
    Off,
    /// Square of side 2.2 × radius around the disk center
    Radius1_1,
    /// Square of side 2.4 × radius around the disk center
    Radius1_2,
    /// Square of side 3 × radius around the disk center
    Radius1_5,
    /// Square as wide as the source frame, only when fully in bounds
    SourceWidth,
}

impl AutocropMode {
    /// Radius multiplier of the fixed-radius modes
    pub fn radius_factor(&self) -> Option<f64> {
        match self {
            AutocropMode::Radius1_1 => Some(1.1),
            AutocropMode::Radius1_2 => Some(1.2),
            AutocropMode::Radius1_5 => Some(1.5),
            AutocropMode::Off | AutocropMode::SourceWidth => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryParams {
    /// Forced tilt in degrees, replaces the ellipse-derived tilt
    pub tilt_degrees: Option<f64>,
    /// Forced X/Y ratio, replaces the ellipse-derived ratio
    pub xy_ratio: Option<f64>,
    pub autocrop: AutocropMode,
    /// Stretch the short axis instead of shrinking the long one
    pub disallow_downsampling: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandingParams {
    /// Height in rows of the moving average window
    pub width: usize,
    pub passes: usize,
}

impl Default for BandingParams {
    fn default() -> Self {
        Self {
            width: 24,
            passes: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumParams {
    pub ray: SpectralRay,
    /// Pixel shift used for the Doppler pair (`-shift` and `+shift`)
    pub doppler_shift: i32,
}

impl Default for SpectrumParams {
    fn default() -> Self {
        Self {
            ray: SpectralRay::HAlpha,
            doppler_shift: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugParams {
    pub generate_debug_images: bool,
}

/// Strategy used for the "Stretched" product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StretchedMode {
    #[default]
    Arcsinh,
    Autohistogram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductParams {
    pub stretched_mode: StretchedMode,
    pub stretched: bool,
    pub colorized: bool,
    pub coronagraph: bool,
    pub doppler: bool,
}

impl Default for ProductParams {
    fn default() -> Self {
        Self {
            stretched_mode: StretchedMode::default(),
            stretched: true,
            colorized: true,
            coronagraph: true,
            doppler: true,
        }
    }
}

/// All parameters of a processing run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessParams {
    pub geometry: GeometryParams,
    pub banding: BandingParams,
    pub spectrum: SpectrumParams,
    pub debug: DebugParams,
    pub products: ProductParams,
}

impl ProcessParams {
    /// Rejects values no stage can work with.
    ///
    /// # Errors
    /// `InvalidParameter` naming the first offending field.
    pub fn validate(&self) -> Result<(), InvalidParameter> {
        if let Some(ratio) = self.geometry.xy_ratio {
            if !(MIN_XY_RATIO..=MAX_XY_RATIO).contains(&ratio) {
                return Err(InvalidParameter::new(
                    "geometry.xy_ratio",
                    ratio,
                    "must be within [0.1, 10]",
                ));
            }
        }
        if let Some(tilt) = self.geometry.tilt_degrees {
            if !tilt.is_finite() || tilt.abs() >= 90.0 {
                return Err(InvalidParameter::new(
                    "geometry.tilt_degrees",
                    tilt,
                    "must be within (-90, 90)",
                ));
            }
        }
        if self.banding.width == 0 {
            return Err(InvalidParameter::new(
                "banding.width",
                0.0,
                "must be > 0",
            ));
        }
        if self.spectrum.doppler_shift == 0 {
            return Err(InvalidParameter::new(
                "spectrum.doppler_shift",
                0.0,
                "must not be 0",
            ));
        }
        Ok(())
    }
}
