//! cw-engine: the pull-model audio graph and the non-destructive timeline
//! editing engine built on top of it (§4.3-§4.5, §4.8).

mod bufferpool;
mod composition;
mod error;
mod mixer;
mod node;
mod player;
mod segment;
mod track;

pub use bufferpool::{BufferPool, PooledBuffer};
pub use composition::Composition;
pub use error::{EngineError, EngineResult};
pub use mixer::Mixer;
pub use node::{node_pan_from_bipolar, Generator, Node, NodeId, SilentGenerator};
pub use player::{SeekOrigin, SoundPlayer, TransportState};
pub use segment::{FadeCurve, FadeSettings, LoopSetting, Segment, SegmentSettings, TimeStretchSetting};
pub use track::Track;
