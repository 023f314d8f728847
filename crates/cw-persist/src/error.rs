//! Persistence collaborator error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error(transparent)]
    Engine(#[from] cw_engine::EngineError),
}

pub type PersistResult<T> = Result<T, PersistError>;
