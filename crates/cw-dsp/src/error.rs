//! Error types for DSP processors.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("stretch factor must be > 0, got {0}")]
    NonPositiveStretchFactor(f64),

    #[error("resample ratio must be > 0, got {0}")]
    NonPositiveResampleRatio(f64),

    #[error("processor not ready: {0}")]
    NotReady(String),
}

pub type DspResult<T> = Result<T, DspError>;
