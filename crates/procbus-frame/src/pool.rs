//! Recycling pools for frame and I/O buffers.
//!
//! A pool is an explicit object, built once at process start and cloned into
//! every component that allocates buffers. Neither `get` nor `recycle` ever
//! blocks: an empty pool falls back to a fresh allocation and a full pool
//! drops the returned buffer. Only buffers whose capacity equals the pool's
//! configured size are retained.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::BytesMut;
use crossbeam::channel::{bounded, Receiver, Sender};
use tracing::trace;

/// Capacity of a frame buffer. One byte more than the largest frame.
pub const FRAME_BUFFER_SIZE: usize = 256;

/// Capacity of a socket read buffer.
pub const IO_BUFFER_SIZE: usize = 8 * 1024;

/// Maximum number of idle buffers kept by the default pools.
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// Bounded pool of equally sized byte buffers.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    free_tx: Sender<BytesMut>,
    free_rx: Receiver<BytesMut>,
    buffer_size: usize,
    max_pooled: usize,
}

impl BufferPool {
    /// Create a pool keeping at most `max_pooled` idle buffers of
    /// `buffer_size` bytes. Half of them are allocated up front.
    pub fn new(max_pooled: usize, buffer_size: usize) -> Self {
        let (free_tx, free_rx) = bounded(max_pooled);
        for _ in 0..max_pooled / 2 {
            let _ = free_tx.try_send(BytesMut::with_capacity(buffer_size));
        }
        trace!(
            pooled = free_rx.len(),
            max_pooled,
            buffer_size,
            "initialized buffer pool"
        );
        Self {
            inner: Arc::new(PoolInner {
                free_tx,
                free_rx,
                buffer_size,
                max_pooled,
            }),
        }
    }

    /// Pool sized for frame buffers.
    pub fn for_frames() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY, FRAME_BUFFER_SIZE)
    }

    /// Pool sized for socket read buffers.
    pub fn for_io() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY, IO_BUFFER_SIZE)
    }

    /// Borrow a buffer that returns itself to this pool when dropped.
    pub fn get(&self) -> PooledBuf {
        PooledBuf {
            buf: self.take(),
            pool: Some(self.clone()),
        }
    }

    /// Take an empty buffer out of the pool, or allocate one.
    ///
    /// The caller owns the buffer; hand it back with [`BufferPool::recycle`].
    pub fn take(&self) -> BytesMut {
        match self.inner.free_rx.try_recv() {
            Ok(buf) => buf,
            Err(_) => {
                trace!(buffer_size = self.inner.buffer_size, "pool empty, allocating");
                BytesMut::with_capacity(self.inner.buffer_size)
            }
        }
    }

    /// Return a buffer to the pool.
    ///
    /// Returns `false` when the buffer was dropped instead, either because its
    /// capacity no longer matches the pool or because the pool is full.
    pub fn recycle(&self, mut buf: BytesMut) -> bool {
        if buf.capacity() != self.inner.buffer_size {
            trace!(
                capacity = buf.capacity(),
                buffer_size = self.inner.buffer_size,
                "discarding mismatched buffer"
            );
            return false;
        }
        buf.clear();
        self.inner.free_tx.try_send(buf).is_ok()
    }

    /// Number of idle buffers currently held.
    pub fn available(&self) -> usize {
        self.inner.free_rx.len()
    }

    /// Capacity of the buffers this pool hands out.
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Maximum number of idle buffers this pool keeps.
    pub fn max_pooled(&self) -> usize {
        self.inner.max_pooled
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::for_frames()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("available", &self.available())
            .field("max_pooled", &self.inner.max_pooled)
            .field("buffer_size", &self.inner.buffer_size)
            .finish()
    }
}

/// A buffer that goes back to its pool exactly once, when dropped.
pub struct PooledBuf {
    buf: BytesMut,
    pool: Option<BufferPool>,
}

impl PooledBuf {
    /// Wrap a buffer that belongs to no pool.
    pub fn detached(buf: BytesMut) -> Self {
        Self { buf, pool: None }
    }

    /// Copy `data` into a buffer that belongs to no pool.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::detached(BytesMut::from(data))
    }
}

impl Deref for PooledBuf {
    type Target = BytesMut;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl AsRef<[u8]> for PooledBuf {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.recycle(std::mem::take(&mut self.buf));
        }
    }
}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}
