//! Time-scale modification (§4.6).

mod wsola;

pub use wsola::{StretchStats, WsolaStretcher, ANALYSIS_HOP, SEARCH_RADIUS, WINDOW_SIZE};
