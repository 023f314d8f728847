//! cw-dsp: the per-sample processing contracts and reference processors
//! that plug into the graph (§4.10), plus the time-stretch and resample
//! engines the sound player and segment renderer use (§4.5, §4.6, §4.8).

mod analyzer;
mod error;
mod modifier;
mod resample;
pub mod timestretch;

pub use analyzer::*;
pub use error::*;
pub use modifier::*;
pub use resample::*;
