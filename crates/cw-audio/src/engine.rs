//! The audio engine: the real-time callback entry point, owning the master
//! mixer and the solo registry (§4.7).

use std::sync::Arc;

use cw_core::{float_to_foreign, foreign_to_float, SampleFormat};
use cw_engine::{BufferPool, Mixer, Node};
use parking_lot::Mutex;

/// Which direction a processed buffer of samples came from, passed to
/// `on_audio_processed` listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Playback,
    Record,
    Mixed,
}

type ProcessedListener = Box<dyn Fn(&[f32], Capability) + Send>;

/// Owns the master mixer and the solo registry; the sole call surface the
/// real-time callback uses.
pub struct AudioEngine {
    master: Arc<Node>,
    pool: BufferPool,
    sample_rate: u32,
    channels: u16,
    sample_format: SampleFormat,
    solo: Mutex<Option<Arc<Node>>>,
    listeners: Mutex<Vec<ProcessedListener>>,
    float_scratch: Mutex<Vec<f32>>,
}

impl AudioEngine {
    pub fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        let pool = BufferPool::new();
        let master = Mixer::new_master(channels, sample_rate, pool.clone());
        Self {
            master,
            pool,
            sample_rate,
            channels,
            sample_format,
            solo: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            float_scratch: Mutex::new(Vec::new()),
        }
    }

    pub fn master(&self) -> &Arc<Node> {
        &self.master
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Serializes a solo mutation; the callback-side cost is one pointer
    /// read of the resulting `Option<Arc<Node>>` (§5).
    pub fn solo(&self, node: &Arc<Node>) {
        *self.solo.lock() = Some(node.clone());
    }

    pub fn unsolo(&self) {
        *self.solo.lock() = None;
    }

    pub fn on_audio_processed(&self, listener: impl Fn(&[f32], Capability) + Send + 'static) {
        self.listeners.lock().push(Box::new(listener));
    }

    fn notify(&self, samples: &[f32], capability: Capability) {
        for listener in self.listeners.lock().iter() {
            listener(samples, capability);
        }
    }

    /// Pulls either the soloed node or the master mixer into a float
    /// scratch buffer, then format-converts into `out_buffer` (device-
    /// native bytes) and fires `on_audio_processed(Playback)`.
    ///
    /// The spec's wording lets the callback reuse `out_buffer` directly
    /// when the device format is already F32, to avoid a copy; this
    /// implementation always goes through the pooled float scratch and
    /// then converts, trading that copy for never reinterpreting a raw
    /// byte buffer as `&mut [f32]` without an alignment guarantee.
    pub fn process_graph(&self, out_buffer: &mut [u8], frame_count: usize) {
        let channels = self.channels.max(1) as usize;
        let sample_count = frame_count * channels;

        let mut scratch = self.float_scratch.lock();
        scratch.clear();
        scratch.resize(sample_count, 0.0);

        let root = self.solo.lock().clone().unwrap_or_else(|| self.master.clone());
        root.process(&mut scratch);

        float_to_foreign(&scratch, out_buffer, self.sample_format);
        self.notify(&scratch, Capability::Playback);
    }

    /// Mirrors `process_graph` for capture: converts the device-native
    /// `in_buffer` to float and fires `on_audio_processed(Record)`. There is
    /// no graph pull on the input path — capture is a pass-through tap for
    /// listeners (e.g. a recorder collaborator), not a node.
    pub fn process_audio_input(&self, in_buffer: &[u8], frame_count: usize) {
        let channels = self.channels.max(1) as usize;
        let sample_count = frame_count * channels;

        let mut scratch = self.float_scratch.lock();
        scratch.clear();
        scratch.resize(sample_count, 0.0);

        foreign_to_float(in_buffer, &mut scratch, self.sample_format);
        self.notify(&scratch, Capability::Record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn process_graph_on_silent_master_yields_silence() {
        let engine = AudioEngine::new(48_000, 1, SampleFormat::F32);
        let mut out = vec![0u8; 16 * 4];
        engine.process_graph(&mut out, 16);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn listeners_are_notified_once_per_call() {
        let engine = AudioEngine::new(48_000, 1, SampleFormat::F32);
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        engine.on_audio_processed(move |_, capability| {
            if capability == Capability::Playback {
                count_clone.fetch_add(1, Ordering::Relaxed);
            }
        });
        let mut out = vec![0u8; 16 * 4];
        engine.process_graph(&mut out, 16);
        engine.process_graph(&mut out, 16);
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn solo_selects_soloed_node_over_master() {
        let engine = AudioEngine::new(48_000, 1, SampleFormat::F32);
        let pool = engine.pool().clone();
        let child = Node::new(1, 48_000, Box::new(cw_engine::SilentGenerator), pool);
        engine.master().connect_input(&child).unwrap();
        engine.solo(&child);
        let mut out = vec![0u8; 16 * 4];
        engine.process_graph(&mut out, 16);
        engine.unsolo();
        assert!(out.iter().all(|&b| b == 0));
    }
}
