//! Named image products and the sink they are handed to.
//!
//! The pipeline never decides how a product is persisted: it builds an
//! [`ImageProduct`] (pixels plus the stretch to apply before display) and
//! passes it to an [`ImageEmitter`].

use std::sync::{Mutex, PoisonError};

use crate::error::ProcessingError;
use crate::image::{ImageSize, MonoImage, RgbImage};
use crate::stretching::{Stretch, StretchingStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductKind {
    Raw,
    RawLinear,
    Disk,
    EdgeDetection,
    Stretched,
    Colorized,
    Coronagraph,
    Mix,
    Doppler,
}

impl ProductKind {
    pub fn title(&self) -> &'static str {
        match self {
            ProductKind::Raw => "Raw",
            ProductKind::RawLinear => "Raw (Linear)",
            ProductKind::Disk => "Disk",
            ProductKind::EdgeDetection => "Edge detection",
            ProductKind::Stretched => "Stretched",
            ProductKind::Colorized => "Colorized",
            ProductKind::Coronagraph => "Coronagraph",
            ProductKind::Mix => "Mix",
            ProductKind::Doppler => "Doppler",
        }
    }

    /// Base file name, without extension
    pub fn file_name(&self) -> &'static str {
        match self {
            ProductKind::Raw => "recon",
            ProductKind::RawLinear => "linear",
            ProductKind::Disk => "disk",
            ProductKind::EdgeDetection => "edge-detection",
            ProductKind::Stretched => "stretched",
            ProductKind::Colorized => "colorized",
            ProductKind::Coronagraph => "protus",
            ProductKind::Mix => "mix",
            ProductKind::Doppler => "doppler",
        }
    }

    /// Only produced when debug images are requested
    pub fn is_debug(&self) -> bool {
        matches!(self, ProductKind::EdgeDetection)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProductImage {
    Mono(MonoImage),
    Rgb(RgbImage),
}

impl ProductImage {
    pub fn size(&self) -> ImageSize {
        match self {
            ProductImage::Mono(image) => image.size(),
            ProductImage::Rgb(image) => image.size(),
        }
    }
}

impl From<MonoImage> for ProductImage {
    fn from(image: MonoImage) -> Self {
        ProductImage::Mono(image)
    }
}

impl From<RgbImage> for ProductImage {
    fn from(image: RgbImage) -> Self {
        ProductImage::Rgb(image)
    }
}

/// An image ready to be displayed or saved.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageProduct {
    pub kind: ProductKind,
    /// Display title, defaults to the kind title
    pub title: String,
    /// Pixel shift of the frame this product comes from
    pub pixel_shift: f64,
    pub image: ProductImage,
    pub stretch: Stretch,
}

impl ImageProduct {
    pub fn new(kind: ProductKind, image: impl Into<ProductImage>, stretch: impl Into<Stretch>) -> Self {
        Self {
            kind,
            title: kind.title().to_string(),
            pixel_shift: 0.0,
            image: image.into(),
            stretch: stretch.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_pixel_shift(mut self, pixel_shift: f64) -> Self {
        self.pixel_shift = pixel_shift;
        self
    }

    /// Pixels after applying the product stretch; the product itself is kept.
    pub fn render(&self) -> ProductImage {
        match &self.image {
            ProductImage::Mono(image) => {
                let mut image = image.clone();
                self.stretch.stretch(&mut image);
                ProductImage::Mono(image)
            }
            ProductImage::Rgb(image) => {
                let mut image = image.clone();
                self.stretch.stretch_rgb(&mut image);
                ProductImage::Rgb(image)
            }
        }
    }
}

/// Receives the products of the pipeline, possibly from several threads.
pub trait ImageEmitter: Send + Sync {
    /// # Errors
    /// Implementations report persistence failures as `ProcessingError`.
    fn emit(&self, product: ImageProduct) -> Result<(), ProcessingError>;
}

/// Keeps every product in memory.
#[derive(Debug, Default)]
pub struct CollectingEmitter {
    products: Mutex<Vec<ImageProduct>>,
}

impl CollectingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything collected so far.
    pub fn take(&self) -> Vec<ImageProduct> {
        let mut products = self.products.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *products)
    }
}

impl ImageEmitter for CollectingEmitter {
    fn emit(&self, product: ImageProduct) -> Result<(), ProcessingError> {
        log::debug!("Collected {} ({})", product.title, product.image.size());
        self.products
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(product);
        Ok(())
    }
}
