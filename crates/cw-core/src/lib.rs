//! cw-core: shared data-model types for the audio graph and editing engine.
//!
//! This crate has no knowledge of devices, files, or the graph itself — it
//! supplies the sample buffer, time, and format types the other crates build
//! on, plus the invariant-violation error taxonomy raised at API boundaries.

mod error;
mod format;
mod sample;
mod sample_source;
mod time;

pub use error::*;
pub use format::*;
pub use sample::*;
pub use sample_source::*;
pub use time::*;
