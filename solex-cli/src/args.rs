//! Command line arguments and their mapping onto [`ProcessParams`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use solex_core::params::{AutocropMode, StretchedMode};
use solex_core::{ProcessParams, SpectralRay};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Reconstructed frames (PNG or TIFF, 8 or 16 bit grayscale)
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Directory receiving the products
    #[arg(short, long, default_value = "out")]
    pub output: PathBuf,

    /// JSON parameter file, command line flags override its values
    #[arg(short, long)]
    pub params: Option<PathBuf>,

    /// Pixel shift of every input, in order. The inputs are then processed as
    /// one series and the first one is the crop reference.
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    pub shifts: Vec<f64>,

    /// Forced tilt angle in degrees
    #[arg(long, allow_negative_numbers = true)]
    pub tilt: Option<f64>,

    /// Forced X/Y ratio
    #[arg(long)]
    pub xy_ratio: Option<f64>,

    #[arg(long, value_enum)]
    pub autocrop: Option<Autocrop>,

    /// Upscale the short axis instead of shrinking the long one
    #[arg(long)]
    pub no_downsampling: bool,

    /// Banding reduction window height in rows
    #[arg(long)]
    pub banding_width: Option<usize>,

    /// Banding reduction passes, 0 disables it
    #[arg(long)]
    pub banding_passes: Option<usize>,

    #[arg(long, value_enum)]
    pub ray: Option<Ray>,

    /// Strategy of the stretched product
    #[arg(long, value_enum)]
    pub stretch: Option<StretchMode>,

    /// Frame rate of the scan, used for the tilt suggestion
    #[arg(long)]
    pub fps: Option<f64>,

    /// Also write the debug images
    #[arg(long)]
    pub debug: bool,

    /// Frames processed at the same time in batch mode
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Threads writing image files
    #[arg(long, default_value_t = 2)]
    pub writers: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Autocrop {
    Off,
    /// 2.2 × radius square
    #[value(name = "radius1-1")]
    Radius1_1,
    /// 2.4 × radius square
    #[value(name = "radius1-2")]
    Radius1_2,
    /// 3 × radius square
    #[value(name = "radius1-5")]
    Radius1_5,
    /// Square as wide as the source frame
    SourceWidth,
}

impl From<Autocrop> for AutocropMode {
    fn from(mode: Autocrop) -> Self {
        match mode {
            Autocrop::Off => AutocropMode::Off,
            Autocrop::Radius1_1 => AutocropMode::Radius1_1,
            Autocrop::Radius1_2 => AutocropMode::Radius1_2,
            Autocrop::Radius1_5 => AutocropMode::Radius1_5,
            Autocrop::SourceWidth => AutocropMode::SourceWidth,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Ray {
    HAlpha,
    HBeta,
    CalciumK,
    CalciumH,
    SodiumD1,
    SodiumD2,
    HeliumD3,
    MagnesiumB1,
    Other,
}

impl From<Ray> for SpectralRay {
    fn from(ray: Ray) -> Self {
        match ray {
            Ray::HAlpha => SpectralRay::HAlpha,
            Ray::HBeta => SpectralRay::HBeta,
            Ray::CalciumK => SpectralRay::CalciumK,
            Ray::CalciumH => SpectralRay::CalciumH,
            Ray::SodiumD1 => SpectralRay::SodiumD1,
            Ray::SodiumD2 => SpectralRay::SodiumD2,
            Ray::HeliumD3 => SpectralRay::HeliumD3,
            Ray::MagnesiumB1 => SpectralRay::MagnesiumB1,
            Ray::Other => SpectralRay::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StretchMode {
    Arcsinh,
    Autohistogram,
}

impl From<StretchMode> for StretchedMode {
    fn from(mode: StretchMode) -> Self {
        match mode {
            StretchMode::Arcsinh => StretchedMode::Arcsinh,
            StretchMode::Autohistogram => StretchedMode::Autohistogram,
        }
    }
}

fn load_params(path: &Path) -> Result<ProcessParams> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read parameter file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Invalid parameter file {}", path.display()))
}

impl Args {
    /// Parameters from the optional JSON file with the flags applied on top.
    pub fn process_params(&self) -> Result<ProcessParams> {
        let mut params = match &self.params {
            Some(path) => load_params(path)?,
            None => ProcessParams::default(),
        };
        if self.tilt.is_some() {
            params.geometry.tilt_degrees = self.tilt;
        }
        if self.xy_ratio.is_some() {
            params.geometry.xy_ratio = self.xy_ratio;
        }
        if let Some(mode) = self.autocrop {
            params.geometry.autocrop = mode.into();
        }
        if self.no_downsampling {
            params.geometry.disallow_downsampling = true;
        }
        if let Some(width) = self.banding_width {
            params.banding.width = width;
        }
        if let Some(passes) = self.banding_passes {
            params.banding.passes = passes;
        }
        if let Some(ray) = self.ray {
            params.spectrum.ray = ray.into();
        }
        if let Some(mode) = self.stretch {
            params.products.stretched_mode = mode.into();
        }
        if self.debug {
            params.debug.generate_debug_images = true;
        }
        params.validate()?;
        Ok(params)
    }

    /// Shift of each input, `None` in batch mode.
    ///
    /// # Errors
    /// When shifts are given but do not match the number of inputs.
    pub fn series_shifts(&self) -> Result<Option<&[f64]>> {
        if self.shifts.is_empty() {
            return Ok(None);
        }
        anyhow::ensure!(
            self.shifts.len() == self.inputs.len(),
            "{} shifts given for {} inputs",
            self.shifts.len(),
            self.inputs.len()
        );
        Ok(Some(&self.shifts))
    }
}
