//! Reusable copy buffers.
//!
//! # Responsibilities
//! - Hand out fixed-capacity byte buffers to copy loops
//! - Take them back on drop, cleared, whatever the copy outcome was
//! - Bound the number of idle buffers retained
//!
//! # Design Decisions
//! - Checkout holds the lock only for a `Vec::pop`; no I/O under the lock
//! - A returned buffer is cleared before reuse, so no bytes cross requests
//! - Buffers that grew past their nominal size are dropped instead of pooled

use bytes::BytesMut;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Shared pool of copy buffers.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    idle: Mutex<Vec<BytesMut>>,
    buffer_size: usize,
    max_idle: usize,
}

impl BufferPool {
    /// Create a pool of `buffer_size`-byte buffers keeping at most `max_idle` idle.
    pub fn new(buffer_size: usize, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::with_capacity(max_idle)),
                buffer_size,
                max_idle,
            }),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Check out an empty buffer with at least `buffer_size` capacity.
    pub fn get(&self) -> PooledBuffer {
        let reused = self
            .inner
            .idle
            .lock()
            .expect("buffer pool mutex poisoned")
            .pop();
        let buf = reused.unwrap_or_else(|| BytesMut::with_capacity(self.inner.buffer_size));
        PooledBuffer {
            buf: Some(buf),
            pool: self.inner.clone(),
        }
    }

    /// Number of idle buffers currently pooled.
    pub fn idle(&self) -> usize {
        self.inner
            .idle
            .lock()
            .expect("buffer pool mutex poisoned")
            .len()
    }
}

impl PoolInner {
    fn put(&self, mut buf: BytesMut) {
        if buf.capacity() > self.buffer_size * 2 {
            return;
        }
        buf.clear();
        let mut idle = self.idle.lock().expect("buffer pool mutex poisoned");
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }
}

/// A checked-out buffer. Returned to its pool when dropped.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Option<BytesMut>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    /// Nominal buffer size of the owning pool.
    pub fn nominal_size(&self) -> usize {
        self.pool.buffer_size
    }

    /// True once the buffer holds at least its nominal size.
    pub fn is_full(&self) -> bool {
        self.len() >= self.pool.buffer_size
    }
}

impl Deref for PooledBuffer {
    type Target = BytesMut;
    fn deref(&self) -> &Self::Target {
        self.buf.as_ref().expect("buffer present until drop")
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.as_mut().expect("buffer present until drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(buf);
        }
    }
}
