//! Derived images built from geometry-corrected frames.
//!
//! Composers never touch their inputs; every product is a fresh image that
//! inherits the metadata of its source.

pub mod colorize;
pub mod coronagraph;
pub mod doppler;
pub mod edge;

pub use colorize::colorize;
pub use coronagraph::{compose_coronagraph, CoronagraphProducts};
pub use doppler::doppler_composite;
pub use edge::edge_detection_image;
