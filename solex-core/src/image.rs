//! Frame buffers and image dimensions

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

use solex_math::Ellipse;

use crate::error::ProcessingError;
use crate::metadata::Metadata;

/// Largest representable pixel value (16-bit sensor range)
pub const MAX_PIXEL_VALUE: f32 = 65535.0;

/// Image dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    /// Image width in pixels
    pub width: usize,
    /// Image height in pixels
    pub height: usize,
}

impl ImageSize {
    pub fn from_width_height(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Zeroed array with shape (height, width)
    pub fn empty_array(&self) -> Array2<f32> {
        Array2::zeros((self.height, self.width))
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A single-channel frame buffer plus the metadata travelling with it.
///
/// Pixels are stored row-major as `data[[y, x]]`, values conceptually within
/// `[0, MAX_PIXEL_VALUE]`.
#[derive(Debug, Clone, PartialEq)]
pub struct MonoImage {
    data: Array2<f32>,
    metadata: Metadata,
}

impl MonoImage {
    pub fn new(data: Array2<f32>) -> Self {
        Self {
            data,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(data: Array2<f32>, metadata: Metadata) -> Self {
        Self { data, metadata }
    }

    /// Builds an image from a flat row-major buffer.
    ///
    /// # Errors
    /// `ProcessingError::InvalidBuffer` when the length is not `width * height`.
    pub fn from_vec(width: usize, height: usize, pixels: Vec<f32>) -> Result<Self, ProcessingError> {
        if pixels.len() != width * height {
            return Err(ProcessingError::InvalidBuffer(format!(
                "expected {} pixels for {width}x{height}, got {}",
                width * height,
                pixels.len()
            )));
        }
        let data = Array2::from_shape_vec((height, width), pixels)
            .map_err(|e| ProcessingError::InvalidBuffer(e.to_string()))?;
        Ok(Self::new(data))
    }

    pub fn filled(size: ImageSize, value: f32) -> Self {
        Self::new(Array2::from_elem((size.height, size.width), value))
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::from_width_height(self.width(), self.height())
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array2<f32> {
        &mut self.data
    }

    pub fn into_data(self) -> Array2<f32> {
        self.data
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Disk ellipse attached to this image, if any
    pub fn ellipse(&self) -> Option<&Ellipse> {
        self.metadata.get::<Ellipse>()
    }

    /// Same metadata, new pixels.
    pub fn with_data(&self, data: Array2<f32>) -> Self {
        Self {
            data,
            metadata: self.metadata.clone(),
        }
    }

    /// Minimum and maximum pixel value, `None` for an empty image.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        min_max(self.data.iter().copied())
    }
}

/// Three-channel image, each channel a frame buffer of identical size.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbImage {
    pub r: Array2<f32>,
    pub g: Array2<f32>,
    pub b: Array2<f32>,
    pub metadata: Metadata,
}

impl RgbImage {
    /// # Errors
    /// `ProcessingError::InvalidBuffer` when the channel shapes differ.
    pub fn new(r: Array2<f32>, g: Array2<f32>, b: Array2<f32>) -> Result<Self, ProcessingError> {
        if r.dim() != g.dim() || r.dim() != b.dim() {
            return Err(ProcessingError::InvalidBuffer(format!(
                "channel shapes differ: {:?} {:?} {:?}",
                r.dim(),
                g.dim(),
                b.dim()
            )));
        }
        Ok(Self {
            r,
            g,
            b,
            metadata: Metadata::new(),
        })
    }

    pub fn width(&self) -> usize {
        self.r.ncols()
    }

    pub fn height(&self) -> usize {
        self.r.nrows()
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::from_width_height(self.width(), self.height())
    }

    pub fn channels_mut(&mut self) -> [&mut Array2<f32>; 3] {
        [&mut self.r, &mut self.g, &mut self.b]
    }
}

pub(crate) fn min_max(values: impl Iterator<Item = f32>) -> Option<(f32, f32)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}
