//! Scratch float-buffer rental for the audio callback path (§5).
//!
//! Every node's `process` needs a same-length scratch buffer per pull. A
//! per-length free-list avoids allocating on the callback thread: buffers
//! are returned to the pool when their `PooledBuffer` guard drops. The
//! critical section is a short list pop/push under `parking_lot::Mutex`,
//! not a true lock-free structure — see `DESIGN.md` for why the spec's
//! "lock-free or wait-free" wording is approximated rather than met
//! literally here.
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    free: HashMap<usize, Vec<Vec<f32>>>,
}

/// A shared scratch-buffer pool. Cheap to clone (an `Arc` wrapper).
#[derive(Clone, Default)]
pub struct BufferPool {
    inner: Arc<Mutex<Inner>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rents a zeroed buffer of exactly `len` samples.
    pub fn rent(&self, len: usize) -> PooledBuffer {
        let mut buffer = {
            let mut inner = self.inner.lock();
            inner
                .free
                .get_mut(&len)
                .and_then(|bucket| bucket.pop())
                .unwrap_or_else(|| vec![0.0; len])
        };
        buffer.iter_mut().for_each(|s| *s = 0.0);
        PooledBuffer {
            buffer,
            pool: self.inner.clone(),
        }
    }
}

/// A rented scratch buffer. Returned to the pool's free-list on drop.
pub struct PooledBuffer {
    buffer: Vec<f32>,
    pool: Arc<Mutex<Inner>>,
}

impl std::ops::Deref for PooledBuffer {
    type Target = [f32];
    fn deref(&self) -> &[f32] {
        &self.buffer
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let len = self.buffer.len();
        let buffer = std::mem::take(&mut self.buffer);
        self.pool.lock().free.entry(len).or_default().push(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rented_buffers_are_zeroed_even_when_reused() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.rent(4);
            buf.iter_mut().for_each(|s| *s = 1.0);
        }
        let buf = pool.rent(4);
        assert_eq!(&*buf, &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn different_lengths_get_independent_buckets() {
        let pool = BufferPool::new();
        let a = pool.rent(4);
        let b = pool.rent(8);
        assert_eq!(a.len(), 4);
        assert_eq!(b.len(), 8);
    }
}
