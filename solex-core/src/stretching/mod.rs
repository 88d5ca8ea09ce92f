//! Intensity stretching strategies
//!
//! A strategy remaps the pixel values of an image in place, always into
//! `[0, MAX_PIXEL_VALUE]`. Strategies are small value objects validated at
//! construction; an out-of-range parameter is an [`InvalidParameter`] error,
//! never clamped.
//!
//! [`InvalidParameter`]: crate::error::InvalidParameter

pub mod arcsinh;
pub mod autohistogram;
pub mod clahe;
pub mod cutoff;
pub mod gamma;
pub mod histogram;
pub mod linear;

pub use arcsinh::ArcsinhStrategy;
pub use autohistogram::AutohistogramStrategy;
pub use clahe::ClaheStrategy;
pub use cutoff::CutoffStrategy;
pub use gamma::GammaStrategy;
pub use histogram::HistogramError;
pub use linear::LinearStrategy;

use crate::image::{MonoImage, RgbImage};

/// Remaps pixel intensities in place.
pub trait StretchingStrategy: Send + Sync {
    fn stretch(&self, image: &mut MonoImage);

    /// Stretches each channel independently; the metadata of the RGB image is
    /// visible to every channel.
    fn stretch_rgb(&self, image: &mut RgbImage) {
        let metadata = image.metadata.clone();
        for channel in image.channels_mut() {
            let data = std::mem::take(channel);
            let mut mono = MonoImage::with_metadata(data, metadata.clone());
            self.stretch(&mut mono);
            *channel = mono.into_data();
        }
    }
}

/// Any of the stock strategies, selected by configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum Stretch {
    Linear(LinearStrategy),
    Cutoff(CutoffStrategy),
    Gamma(GammaStrategy),
    Arcsinh(ArcsinhStrategy),
    Clahe(ClaheStrategy),
    Autohistogram(AutohistogramStrategy),
}

impl Default for Stretch {
    fn default() -> Self {
        Stretch::Linear(LinearStrategy::default())
    }
}

impl Stretch {
    pub fn name(&self) -> &'static str {
        match self {
            Stretch::Linear(_) => "linear",
            Stretch::Cutoff(_) => "cutoff",
            Stretch::Gamma(_) => "gamma",
            Stretch::Arcsinh(_) => "arcsinh",
            Stretch::Clahe(_) => "clahe",
            Stretch::Autohistogram(_) => "autohistogram",
        }
    }

    fn strategy(&self) -> &dyn StretchingStrategy {
        match self {
            Stretch::Linear(s) => s,
            Stretch::Cutoff(s) => s,
            Stretch::Gamma(s) => s,
            Stretch::Arcsinh(s) => s,
            Stretch::Clahe(s) => s,
            Stretch::Autohistogram(s) => s,
        }
    }
}

impl StretchingStrategy for Stretch {
    fn stretch(&self, image: &mut MonoImage) {
        self.strategy().stretch(image)
    }

    fn stretch_rgb(&self, image: &mut RgbImage) {
        self.strategy().stretch_rgb(image)
    }
}

macro_rules! stretch_from {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for Stretch {
            fn from(strategy: $ty) -> Self {
                Stretch::$variant(strategy)
            }
        }
    };
}

stretch_from!(LinearStrategy, Linear);
stretch_from!(CutoffStrategy, Cutoff);
stretch_from!(GammaStrategy, Gamma);
stretch_from!(ArcsinhStrategy, Arcsinh);
stretch_from!(ClaheStrategy, Clahe);
stretch_from!(AutohistogramStrategy, Autohistogram);
