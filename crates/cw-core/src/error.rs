//! Error types for the data-model layer.

use thiserror::Error;

/// Invariant-violation and format-conversion errors raised at API boundaries.
///
/// Per the error-handling design, these never enter the audio callback: they
/// are returned synchronously from constructors and setters on the control
/// thread.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("speed must be > 0, got {0}")]
    NonPositiveSpeed(f64),

    #[error("time-stretch factor must be > 0, got {0}")]
    NonPositiveStretchFactor(f64),

    #[error("pan out of range: {0}")]
    PanOutOfRange(f64),

    #[error("invalid channel count: {0}")]
    InvalidChannelCount(u16),

    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("invalid loop points: start={start}, end={end}")]
    InvalidLoopPoints { start: i64, end: i64 },

    #[error("duration must be > 0, got {0}")]
    NonPositiveDuration(f64),
}

pub type CoreResult<T> = Result<T, CoreError>;
