//! Solar disk reconstruction pipeline
//!
//! Takes a reconstructed spectroheliograph frame together with disk-edge samples
//! and turns it into geometrically correct, stretched products:
//!
//! - [`banding`] removes row artifacts inside the disk
//! - [`black_point`] estimates the sky background
//! - [`geometry`] removes scan tilt, fixes the X/Y ratio and optionally crops
//! - [`stretching`] remaps intensities for display
//! - [`compose`] builds the coronagraph, mix, colorized and Doppler images
//! - [`workflow`] wires the stages into a per-frame task graph and a batch runner

pub mod banding;
pub mod black_point;
pub mod compose;
pub mod emitter;
pub mod error;
pub mod events;
pub mod geometry;
pub mod image;
pub mod limb;
pub mod metadata;
pub mod params;
pub mod resample;
pub mod spectral;
pub mod stretching;
pub mod workflow;

pub use error::{InvalidParameter, ProcessingError};
pub use events::{Broadcaster, InterruptFlag, ProcessingEvent};
pub use image::{ImageSize, MonoImage, RgbImage, MAX_PIXEL_VALUE};
pub use metadata::Metadata;
pub use params::ProcessParams;
pub use spectral::{ColorCurve, SpectralRay};
pub use stretching::{Stretch, StretchingStrategy};
pub use workflow::ProcessingWorkflow;
