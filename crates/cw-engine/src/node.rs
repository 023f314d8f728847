//! The pull-model audio graph node (§4.3, §4.4).
//!
//! A `Node` owns its input list as strong `Arc` references and its
//! consumer (output) list as `Weak` references — no central graph registry
//! is needed; `connect_input`'s cycle check walks the consumer edges
//! reachable from the candidate input. This keeps the design free of the
//! process-wide mutable graph object the source material's push-model
//! `AudioGraph` used, per the call for avoiding singleton state.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use cw_core::{equal_power_pan, pan_bipolar_to_unit};
use cw_dsp::{Analyzer, Modifier};
use parking_lot::Mutex;

use crate::bufferpool::BufferPool;
use crate::error::{EngineError, EngineResult};

/// Stable identity for a node. `MASTER` is reserved for the engine's
/// process-wide master mixer and is never assigned to any other node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    pub const MASTER: Self = Self(0);

    fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// The ramp length, in frames, over which a gain/pan change is linearly
/// interpolated to avoid zipper noise (§4.3).
const RAMP_FRAMES: usize = 128;

/// A node's `generate` behavior: what it contributes beyond its summed
/// inputs. A plain mixer's generator is a no-op; a sound player's
/// generator fills the buffer from its source.
pub trait Generator: Send {
    /// Called with the buffer already containing the additive sum of the
    /// node's inputs; may add to or overwrite it.
    fn generate(&mut self, buffer: &mut [f32], channels: u16, sample_rate: u32);

    fn reset(&mut self) {}
}

/// A generator with nothing to contribute beyond its summed inputs.
pub struct SilentGenerator;

impl Generator for SilentGenerator {
    fn generate(&mut self, _buffer: &mut [f32], _channels: u16, _sample_rate: u32) {}
}

struct Connections {
    inputs: Vec<Arc<Node>>,
    outputs: Vec<Weak<Node>>,
}

struct NodeState {
    enabled: bool,
    muted: bool,
    soloed: bool,
    gain: f32,
    pan: f32,
    prev_gain: f32,
    prev_pan: f32,
    modifiers: Vec<Box<dyn Modifier>>,
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            enabled: true,
            muted: false,
            soloed: false,
            gain: 1.0,
            pan: 0.5,
            prev_gain: 1.0,
            prev_pan: 0.5,
            modifiers: Vec::new(),
            analyzers: Vec::new(),
        }
    }
}

pub struct Node {
    id: NodeId,
    channels: u16,
    sample_rate: u32,
    connections: Mutex<Connections>,
    state: Mutex<NodeState>,
    generator: Mutex<Box<dyn Generator>>,
    pool: BufferPool,
}

impl Node {
    pub fn new(channels: u16, sample_rate: u32, generator: Box<dyn Generator>, pool: BufferPool) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::next(),
            channels,
            sample_rate,
            connections: Mutex::new(Connections {
                inputs: Vec::new(),
                outputs: Vec::new(),
            }),
            state: Mutex::new(NodeState::default()),
            generator: Mutex::new(generator),
            pool,
        })
    }

    /// Like `new`, but the generator is built with a `Weak` back-reference
    /// to the node being constructed (via `Arc::new_cyclic`) — for
    /// generators that need to mutate their own node's flags from within
    /// `generate` (a sound player disabling itself at end of stream, §4.5).
    pub fn new_cyclic<F>(channels: u16, sample_rate: u32, pool: BufferPool, build: F) -> Arc<Self>
    where
        F: FnOnce(Weak<Node>) -> Box<dyn Generator>,
    {
        Arc::new_cyclic(|weak| Self {
            id: NodeId::next(),
            channels,
            sample_rate,
            connections: Mutex::new(Connections {
                inputs: Vec::new(),
                outputs: Vec::new(),
            }),
            state: Mutex::new(NodeState::default()),
            generator: Mutex::new(build(weak.clone())),
            pool,
        })
    }

    /// Constructs the process-wide master mixer with `NodeId::MASTER`.
    pub fn new_master(channels: u16, sample_rate: u32, pool: BufferPool) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::MASTER,
            channels,
            sample_rate,
            connections: Mutex::new(Connections {
                inputs: Vec::new(),
                outputs: Vec::new(),
            }),
            state: Mutex::new(NodeState::default()),
            generator: Mutex::new(Box::new(SilentGenerator)),
            pool,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn set_muted(&self, muted: bool) {
        self.state.lock().muted = muted;
    }

    pub fn muted(&self) -> bool {
        self.state.lock().muted
    }

    pub fn set_soloed(&self, soloed: bool) {
        self.state.lock().soloed = soloed;
    }

    pub fn soloed(&self) -> bool {
        self.state.lock().soloed
    }

    /// Sets gain (linear, `[0, inf)`) and pan (`[0, 1]`, 0=left, 1=right).
    /// The previous value becomes the ramp start for the next `process`.
    pub fn set_gain_pan(&self, gain: f32, pan_0_1: f32) {
        let mut state = self.state.lock();
        state.prev_gain = state.gain;
        state.prev_pan = state.pan;
        state.gain = gain.max(0.0);
        state.pan = pan_0_1.clamp(0.0, 1.0);
    }

    pub fn gain_pan(&self) -> (f32, f32) {
        let state = self.state.lock();
        (state.gain, state.pan)
    }

    pub fn add_modifier(&self, modifier: Box<dyn Modifier>) {
        self.state.lock().modifiers.push(modifier);
    }

    pub fn remove_all_modifiers(&self) {
        self.state.lock().modifiers.clear();
    }

    pub fn add_analyzer(&self, analyzer: Box<dyn Analyzer>) {
        self.state.lock().analyzers.push(analyzer);
    }

    pub fn remove_all_analyzers(&self) {
        self.state.lock().analyzers.clear();
    }

    /// Connects `other` as an input of `self`. Fails with `SelfConnect` if
    /// `other` and `self` are the same node, or `Cycle` if `other` can
    /// already reach `self` by following existing consumer (output) edges
    /// transitively — connecting would then create a cycle.
    pub fn connect_input(self: &Arc<Self>, other: &Arc<Node>) -> EngineResult<()> {
        if Arc::ptr_eq(self, other) {
            log::warn!("rejected self-connect on node {:?}", self.id);
            return Err(EngineError::SelfConnect);
        }
        if reachable_via_outputs(other, self) {
            log::warn!("rejected connect_input {:?} -> {:?}: would create a cycle", other.id, self.id);
            return Err(EngineError::Cycle);
        }

        let mut self_conn = self.connections.lock();
        let mut other_conn = other.connections.lock();
        self_conn.inputs.push(other.clone());
        other_conn.outputs.push(Arc::downgrade(self));
        Ok(())
    }

    /// Idempotent: removing an input that isn't present is not an error.
    pub fn disconnect_input(self: &Arc<Self>, other: &Arc<Node>) {
        let mut self_conn = self.connections.lock();
        self_conn.inputs.retain(|n| !Arc::ptr_eq(n, other));

        let mut other_conn = other.connections.lock();
        other_conn.outputs.retain(|w| match w.upgrade() {
            Some(n) => !Arc::ptr_eq(&n, self),
            None => false,
        });
    }

    pub fn inputs_snapshot(&self) -> Vec<Arc<Node>> {
        self.connections.lock().inputs.clone()
    }

    /// The pull entry point (§4.3). Additively mixes this node's fully
    /// processed signal into `output_buffer`; does nothing if the node is
    /// disabled or muted.
    pub fn process(self: &Arc<Self>, output_buffer: &mut [f32]) {
        let (enabled, muted) = {
            let state = self.state.lock();
            (state.enabled, state.muted)
        };
        if !enabled || muted {
            return;
        }

        let mut scratch = self.pool.rent(output_buffer.len());

        let inputs = self.inputs_snapshot();
        for input in &inputs {
            input.process(&mut scratch);
        }

        {
            let mut generator = self.generator.lock();
            generator.generate(&mut scratch, self.channels, self.sample_rate);
        }

        let (gain, pan, prev_gain, prev_pan) = {
            let mut state = self.state.lock();
            for modifier in state.modifiers.iter_mut() {
                modifier.process(&mut scratch, self.channels);
            }
            let snapshot = (state.gain, state.pan, state.prev_gain, state.prev_pan);
            state.prev_gain = state.gain;
            state.prev_pan = state.pan;
            snapshot
        };

        apply_ramped_gain_pan(&mut scratch, self.channels, prev_gain, prev_pan, gain, pan);

        for (dst, src) in output_buffer.iter_mut().zip(scratch.iter()) {
            *dst += *src;
        }

        {
            let mut state = self.state.lock();
            for analyzer in state.analyzers.iter_mut() {
                analyzer.analyze(&scratch, self.channels);
            }
        }
    }

    pub fn reset(&self) {
        self.generator.lock().reset();
        for modifier in self.state.lock().modifiers.iter_mut() {
            modifier.reset();
        }
        for analyzer in self.state.lock().analyzers.iter_mut() {
            analyzer.reset();
        }
    }

    pub fn with_generator<R>(&self, f: impl FnOnce(&mut dyn Generator) -> R) -> R {
        let mut generator = self.generator.lock();
        f(generator.as_mut())
    }
}

/// BFS from `start` over its existing output (consumer) edges, transitively,
/// checking whether `target` is reachable. See §4.3: connecting `target`
/// (`self`) to take `start` (`other`) as an input must fail if `start` can
/// already reach `target` this way, since that would create a cycle.
fn reachable_via_outputs(start: &Arc<Node>, target: &Arc<Node>) -> bool {
    let mut visited: Vec<NodeId> = vec![start.id()];
    let mut queue: VecDeque<Arc<Node>> = VecDeque::new();
    queue.push_back(start.clone());

    while let Some(current) = queue.pop_front() {
        if Arc::ptr_eq(&current, target) {
            return true;
        }
        let outputs = current.connections.lock().outputs.clone();
        for weak in outputs {
            if let Some(consumer) = weak.upgrade() {
                if !visited.contains(&consumer.id()) {
                    visited.push(consumer.id());
                    queue.push_back(consumer);
                }
            }
        }
    }

    false
}

/// Applies channel-aware gain/pan to `buffer`, linearly ramping from
/// `(prev_gain, prev_pan)` to `(gain, pan)` over `RAMP_FRAMES` frames (or
/// the whole buffer if shorter), per §4.3.
fn apply_ramped_gain_pan(buffer: &mut [f32], channels: u16, prev_gain: f32, prev_pan: f32, gain: f32, pan: f32) {
    let channels = channels.max(1) as usize;
    let frame_count = buffer.len() / channels;
    if frame_count == 0 {
        return;
    }
    let ramp_len = RAMP_FRAMES.min(frame_count).max(1);

    for (frame_idx, frame) in buffer.chunks_mut(channels).enumerate() {
        let t = (frame_idx as f32 / ramp_len as f32).min(1.0);
        let g = prev_gain + (gain - prev_gain) * t;
        let p = prev_pan + (pan - prev_pan) * t;
        apply_gain_pan_frame(frame, g, p);
    }
}

fn apply_gain_pan_frame(frame: &mut [f32], gain: f32, pan_0_1: f32) {
    match frame.len() {
        0 => {}
        1 => frame[0] *= gain,
        _ => {
            let (left_gain, right_gain) = equal_power_pan(gain, pan_0_1);
            let other_gain = (left_gain + right_gain) * 0.5;
            frame[0] *= left_gain;
            frame[1] *= right_gain;
            for s in frame.iter_mut().skip(2) {
                *s *= other_gain;
            }
        }
    }
}

/// Remaps a bipolar `[-1, 1]` pan (the editing-engine convention) into the
/// node's `[0, 1]` convention.
pub fn node_pan_from_bipolar(pan: f32) -> f32 {
    pan_bipolar_to_unit(pan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node(channels: u16, pool: &BufferPool) -> Arc<Node> {
        Node::new(channels, 48_000, Box::new(SilentGenerator), pool.clone())
    }

    #[test]
    fn chain_a_b_c_rejects_closing_cycle() {
        let pool = BufferPool::new();
        let a = test_node(2, &pool);
        let b = test_node(2, &pool);
        let c = test_node(2, &pool);

        b.connect_input(&a).unwrap();
        c.connect_input(&b).unwrap();

        let result = c.connect_input(&a);
        assert_eq!(result, Err(EngineError::Cycle));
    }

    #[test]
    fn self_connect_is_rejected() {
        let pool = BufferPool::new();
        let a = test_node(2, &pool);
        assert_eq!(a.connect_input(&a), Err(EngineError::SelfConnect));
    }

    #[test]
    fn disconnect_is_idempotent() {
        let pool = BufferPool::new();
        let a = test_node(2, &pool);
        let b = test_node(2, &pool);
        b.disconnect_input(&a);
        b.connect_input(&a).unwrap();
        b.disconnect_input(&a);
        b.disconnect_input(&a);
        assert!(b.inputs_snapshot().is_empty());
    }

    #[test]
    fn disabled_node_contributes_nothing() {
        let pool = BufferPool::new();
        let a = test_node(1, &pool);
        a.set_enabled(false);
        let mut out = vec![1.0_f32; 4];
        a.process(&mut out);
        assert_eq!(out, vec![1.0; 4]);
    }

    #[test]
    fn silent_graph_stays_silent() {
        let pool = BufferPool::new();
        let master = test_node(2, &pool);
        let child = test_node(2, &pool);
        master.connect_input(&child).unwrap();

        let mut out = vec![0.0_f32; 256];
        master.process(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
