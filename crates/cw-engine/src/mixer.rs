//! The summing mixer node (§4.4).
//!
//! A mixer's `generate` is a no-op: `Node::process` has already summed its
//! inputs into the scratch buffer by the time `generate` runs, so there is
//! nothing left for a mixer to contribute. This module exists to give that
//! construction a name at the call site rather than reusing the generic
//! node constructor directly everywhere a mixer is needed.

use std::sync::Arc;

use crate::bufferpool::BufferPool;
use crate::node::{Node, SilentGenerator};

pub struct Mixer;

impl Mixer {
    /// Builds a plain summing mixer node.
    pub fn new(channels: u16, sample_rate: u32, pool: BufferPool) -> Arc<Node> {
        Node::new(channels, sample_rate, Box::new(SilentGenerator), pool)
    }

    /// Builds the process-wide master mixer with the reserved `NodeId::MASTER`.
    pub fn new_master(channels: u16, sample_rate: u32, pool: BufferPool) -> Arc<Node> {
        Node::new_master(channels, sample_rate, pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;

    #[test]
    fn master_mixer_has_the_reserved_id() {
        let pool = BufferPool::new();
        let master = Mixer::new_master(2, 48_000, pool);
        assert_eq!(master.id(), NodeId::MASTER);
    }

    #[test]
    fn mixer_sums_its_inputs() {
        let pool = BufferPool::new();
        let mixer = Mixer::new(1, 48_000, pool.clone());
        let a = Node::new(1, 48_000, Box::new(super::super::node::SilentGenerator), pool.clone());
        let b = Node::new(1, 48_000, Box::new(super::super::node::SilentGenerator), pool);
        a.set_gain_pan(1.0, 0.5);
        b.set_gain_pan(1.0, 0.5);
        mixer.connect_input(&a).unwrap();
        mixer.connect_input(&b).unwrap();

        let mut out = vec![0.0_f32; 8];
        mixer.process(&mut out);
        assert!(out.iter().all(|&s| s == 0.0)); // both inputs are silent generators
    }
}
