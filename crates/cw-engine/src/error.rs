//! Topology and structural errors for the graph and editing engine (§4.3, §4.8).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("connecting this input would create a cycle")]
    Cycle,

    #[error("a node cannot connect to itself")]
    SelfConnect,

    #[error("segment overlaps an existing segment on this track")]
    SegmentOverlap,

    #[error("unknown id: {0}")]
    UnknownId(String),

    #[error("resource not ready: {0}")]
    NotReady(String),

    #[error("invalid loop points: start={start}, end={end}")]
    InvalidLoopPoints { start: i64, end: i64 },

    #[error(transparent)]
    Core(#[from] cw_core::CoreError),

    #[error(transparent)]
    Dsp(#[from] cw_dsp::DspError),
}

pub type EngineResult<T> = Result<T, EngineError>;
