//! Error types shared by the processing stages.

use solex_math::RegressionError;
use thiserror::Error;

use crate::stretching::histogram::HistogramError;

/// An out-of-range configuration value.
///
/// Raised when a strategy or parameter set is constructed, never clamped silently.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid parameter {name}={value}: {reason}")]
pub struct InvalidParameter {
    pub name: &'static str,
    pub value: f64,
    pub reason: &'static str,
}

impl InvalidParameter {
    pub fn new(name: &'static str, value: f64, reason: &'static str) -> Self {
        Self {
            name,
            value,
            reason,
        }
    }
}

/// Errors that abort the pipeline of a single frame.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Ellipse regression failed: {0}")]
    Regression(#[from] RegressionError),

    #[error(transparent)]
    InvalidParameter(#[from] InvalidParameter),

    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] HistogramError),

    #[error("Invalid image buffer: {0}")]
    InvalidBuffer(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("{stage} failed: {message}")]
    Failure { stage: &'static str, message: String },

    #[error("Processing interrupted")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessingError {
    pub fn failure(stage: &'static str, message: impl Into<String>) -> Self {
        ProcessingError::Failure {
            stage,
            message: message.into(),
        }
    }
}
