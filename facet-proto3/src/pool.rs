//! Reusable encode buffers.
//!
//! [`SchemaRegistry::marshal_pooled`](crate::SchemaRegistry::marshal_pooled)
//! takes a buffer from here and hands it back when the returned
//! [`PooledBuf`] is dropped, so steady-state encoding does not allocate.

use core::fmt;
use core::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::queue::ArrayQueue;

/// Lock-free pool of `Vec<u8>` buffers.
///
/// When the pool is empty a fresh buffer is allocated; when it is full a
/// returned buffer is dropped.
pub struct BufferPool {
    queue: ArrayQueue<Vec<u8>>,
    buffer_capacity: usize,
    metrics: PoolMetrics,
}

#[derive(Debug, Default)]
struct PoolMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    returns: AtomicU64,
    drops: AtomicU64,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers served from the pool
    pub hits: u64,
    /// Buffers allocated because the pool was empty
    pub misses: u64,
    /// Buffers put back
    pub returns: u64,
    /// Buffers dropped because the pool was full
    pub drops: u64,
}

impl PoolStats {
    /// Fraction of requests served without allocating, 1.0 when idle.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            1.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl BufferPool {
    /// Creates a pool holding up to `pool_size` buffers, each created with
    /// `buffer_capacity` bytes of capacity. Buffers are allocated lazily.
    pub fn new(pool_size: usize, buffer_capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(pool_size.max(1)),
            buffer_capacity,
            metrics: PoolMetrics::default(),
        }
    }

    /// Takes an empty buffer.
    pub fn get(&self) -> Vec<u8> {
        match self.queue.pop() {
            Some(buf) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(self.buffer_capacity)
            }
        }
    }

    /// Clears `buf` and keeps it for reuse if there is room.
    pub fn put(&self, mut buf: Vec<u8>) {
        buf.clear();
        match self.queue.push(buf) {
            Ok(()) => {
                self.metrics.returns.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.metrics.drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of buffers currently idle in the pool.
    pub fn available(&self) -> usize {
        self.queue.len()
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            returns: self.metrics.returns.load(Ordering::Relaxed),
            drops: self.metrics.drops.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("available", &self.queue.len())
            .field("capacity", &self.queue.capacity())
            .field("buffer_capacity", &self.buffer_capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Encoded bytes borrowed from a [`BufferPool`]. The buffer goes back to the
/// pool on drop.
pub struct PooledBuf<'pool> {
    buf: Vec<u8>,
    pool: &'pool BufferPool,
}

impl<'pool> PooledBuf<'pool> {
    pub(crate) fn new(buf: Vec<u8>, pool: &'pool BufferPool) -> Self {
        Self { buf, pool }
    }

    /// Takes the bytes out; the buffer is not returned to the pool.
    pub fn into_vec(mut self) -> Vec<u8> {
        core::mem::take(&mut self.buf)
    }
}

impl Deref for PooledBuf<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl AsRef<[u8]> for PooledBuf<'_> {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl fmt::Debug for PooledBuf<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledBuf").field(&self.buf).finish()
    }
}

impl Drop for PooledBuf<'_> {
    fn drop(&mut self) {
        let buf = core::mem::take(&mut self.buf);
        if buf.capacity() > 0 {
            self.pool.put(buf);
        }
    }
}
