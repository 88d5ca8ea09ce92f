//! Geometry for solar disk reconstruction
//!
//! This crate provides the disk ellipse model, least-squares ellipse
//! regression on edge samples, and the affine pixel transforms shared by the
//! geometry correction stage and everything that carries coordinates through it.

pub mod ellipse;
pub mod regression;
pub mod transform;

pub use ellipse::{ConicCoefficients, Ellipse};
pub use nalgebra::Point2;
pub use regression::{fit_ellipse, RegressionError};
pub use transform::PixelTransform;
