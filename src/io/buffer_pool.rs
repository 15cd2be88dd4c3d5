//! Lock-free Datagram Buffer Pool
//!
//! This module provides the buffer pool used by the UDP receive path. Buffers
//! are lent as [`PooledBuffer`] values that give themselves back to their pool
//! when dropped, so every exit path (normal completion, handler error, panic
//! unwinding, cancellation, queue eviction) returns the buffer exactly once.
//!
//! The pool is an injected dependency: the node only sees `Arc<dyn BufferPool>`,
//! which lets tests substitute a pool that tracks every loan.
//!
//! # Example
//!
//! ```
//! use node_runtime::io::{ArrayBufferPool, BufferPool, PooledBuffer};
//! use std::sync::Arc;
//!
//! let pool: Arc<dyn BufferPool> = Arc::new(ArrayBufferPool::new(16, 2048));
//!
//! let buffer = PooledBuffer::rent(&pool);
//! assert_eq!(buffer.capacity(), 2048);
//! assert_eq!(pool.outstanding(), 1);
//!
//! // Buffer is automatically returned to the pool when dropped
//! drop(buffer);
//! assert_eq!(pool.outstanding(), 0);
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

/// Default datagram buffer size (maximum UDP payload)
pub const DEFAULT_BUFFER_SIZE: usize = 65535;

/// Default pool capacity (number of idle buffers kept)
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// A lender of fixed-size byte buffers.
///
/// Implementations must be safe to use from many tasks at once. Every vector
/// handed out by [`rent_vec`](Self::rent_vec) comes back through
/// [`return_vec`](Self::return_vec) exactly once when it is wrapped in a
/// [`PooledBuffer`].
pub trait BufferPool: Send + Sync + fmt::Debug {
    /// Size in bytes of every buffer this pool lends
    fn buffer_size(&self) -> usize;

    /// Take a buffer of exactly `buffer_size()` bytes
    fn rent_vec(&self) -> Vec<u8>;

    /// Give a previously rented buffer back
    fn return_vec(&self, buffer: Vec<u8>);

    /// Number of buffers currently on loan
    fn outstanding(&self) -> u64;
}

/// Statistics for the buffer pool
#[derive(Debug, Default)]
pub struct BufferPoolStats {
    /// Buffers handed out
    rents: AtomicU64,
    /// Rents served by allocating (pool was empty)
    allocations: AtomicU64,
    /// Rents served from an idle buffer
    reuses: AtomicU64,
    /// Buffers given back
    returns: AtomicU64,
    /// Returned buffers freed because the pool was full
    discards: AtomicU64,
}

impl BufferPoolStats {
    /// Get the number of rents
    #[must_use]
    pub fn rents(&self) -> u64 {
        self.rents.load(Ordering::Relaxed)
    }

    /// Get the number of allocations
    #[must_use]
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Get the number of reuses
    #[must_use]
    pub fn reuses(&self) -> u64 {
        self.reuses.load(Ordering::Relaxed)
    }

    /// Get the number of returns
    #[must_use]
    pub fn returns(&self) -> u64 {
        self.returns.load(Ordering::Relaxed)
    }

    /// Get the number of discarded returns
    #[must_use]
    pub fn discards(&self) -> u64 {
        self.discards.load(Ordering::Relaxed)
    }

    /// Buffers rented and not yet returned
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        // Returns are recorded after the matching rent, so read returns first.
        let returns = self.returns();
        self.rents().saturating_sub(returns)
    }

    /// Get pool efficiency (reuses / rents)
    ///
    /// Returns 0.0 if no operations have occurred.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn efficiency(&self) -> f64 {
        let rents = self.rents();
        if rents == 0 {
            0.0
        } else {
            self.reuses() as f64 / rents as f64
        }
    }

    /// Get a snapshot of all stats
    #[must_use]
    pub fn snapshot(&self) -> BufferPoolStatsSnapshot {
        BufferPoolStatsSnapshot {
            rents: self.rents(),
            allocations: self.allocations(),
            reuses: self.reuses(),
            returns: self.returns(),
            discards: self.discards(),
        }
    }
}

/// Snapshot of buffer pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolStatsSnapshot {
    /// Buffers handed out
    pub rents: u64,
    /// Rents served by allocating
    pub allocations: u64,
    /// Rents served from an idle buffer
    pub reuses: u64,
    /// Buffers given back
    pub returns: u64,
    /// Returned buffers freed because the pool was full
    pub discards: u64,
}

impl BufferPoolStatsSnapshot {
    /// Buffers rented and not yet returned
    #[must_use]
    pub const fn outstanding(&self) -> u64 {
        self.rents.saturating_sub(self.returns)
    }
}

/// Lock-free buffer pool backed by `crossbeam_queue::ArrayQueue`.
///
/// Idle buffers are kept up to `capacity`; rents beyond that allocate, and
/// returns beyond that free the buffer.
pub struct ArrayBufferPool {
    /// Lock-free queue of idle buffers
    buffers: ArrayQueue<Vec<u8>>,
    /// Size of each buffer
    buffer_size: usize,
    /// Pool statistics
    stats: BufferPoolStats,
}

impl ArrayBufferPool {
    /// Create a new buffer pool with the specified capacity and buffer size.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(capacity),
            buffer_size,
            stats: BufferPoolStats::default(),
        }
    }

    /// Create a pool with default settings (1024 buffers of 65535 bytes)
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY, DEFAULT_BUFFER_SIZE)
    }

    /// Pre-allocate up to `count` idle buffers.
    pub fn prewarm(&self, count: usize) {
        for _ in 0..count {
            if self.buffers.push(vec![0u8; self.buffer_size]).is_err() {
                break;
            }
        }
    }

    /// Get the pool capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffers.capacity()
    }

    /// Get the number of idle buffers
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffers.len()
    }

    /// Get pool statistics
    #[must_use]
    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }
}

impl fmt::Debug for ArrayBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayBufferPool")
            .field("capacity", &self.buffers.capacity())
            .field("available", &self.buffers.len())
            .field("buffer_size", &self.buffer_size)
            .field("stats", &self.stats)
            .finish()
    }
}

impl BufferPool for ArrayBufferPool {
    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn rent_vec(&self) -> Vec<u8> {
        self.stats.rents.fetch_add(1, Ordering::Relaxed);
        if let Some(mut buf) = self.buffers.pop() {
            self.stats.reuses.fetch_add(1, Ordering::Relaxed);
            // Contents are not zeroed: the receive call overwrites them.
            if buf.len() != self.buffer_size {
                buf.resize(self.buffer_size, 0);
            }
            buf
        } else {
            self.stats.allocations.fetch_add(1, Ordering::Relaxed);
            vec![0u8; self.buffer_size]
        }
    }

    fn return_vec(&self, buffer: Vec<u8>) {
        self.stats.returns.fetch_add(1, Ordering::Relaxed);
        if self.buffers.push(buffer).is_err() {
            self.stats.discards.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn outstanding(&self) -> u64 {
        self.stats.outstanding()
    }
}

/// A buffer on loan from a [`BufferPool`].
///
/// Dereferences to the whole buffer; [`filled`](Self::filled) exposes only
/// the bytes written by the last receive. Dropping it returns the buffer.
pub struct PooledBuffer {
    /// The underlying buffer (taken on drop)
    buffer: Option<Vec<u8>>,
    /// Number of valid bytes
    filled: usize,
    /// Pool the buffer goes back to
    pool: Arc<dyn BufferPool>,
}

impl PooledBuffer {
    /// Rent a buffer from `pool`
    #[must_use]
    pub fn rent(pool: &Arc<dyn BufferPool>) -> Self {
        Self {
            buffer: Some(pool.rent_vec()),
            filled: 0,
            pool: Arc::clone(pool),
        }
    }

    /// Get the capacity of the underlying buffer
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.as_ref().map_or(0, Vec::len)
    }

    /// Record how many bytes the last receive wrote.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the buffer capacity.
    pub fn set_filled(&mut self, len: usize) {
        assert!(len <= self.capacity(), "length exceeds buffer capacity");
        self.filled = len;
    }

    /// The received bytes
    #[must_use]
    pub fn filled(&self) -> &[u8] {
        self.buffer.as_ref().map_or(&[], |b| &b[..self.filled])
    }

    /// Number of received bytes
    #[must_use]
    pub const fn len(&self) -> usize {
        self.filled
    }

    /// Whether no bytes have been received
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.filled == 0
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buffer.take() {
            self.pool.return_vec(buf);
        }
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.buffer.as_ref().map_or(&[], Vec::as_slice)
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buffer.as_mut().map_or(&mut [], Vec::as_mut_slice)
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("capacity", &self.capacity())
            .field("filled", &self.filled)
            .finish_non_exhaustive()
    }
}

/// Configuration for the buffer pool
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Pool capacity (number of idle buffers)
    pub capacity: usize,
    /// Buffer size in bytes
    pub buffer_size: usize,
    /// Number of buffers to pre-warm
    pub prewarm_count: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_POOL_CAPACITY,
            buffer_size: DEFAULT_BUFFER_SIZE,
            prewarm_count: 0,
        }
    }
}

impl BufferPoolConfig {
    /// Create a new config with specified values
    #[must_use]
    pub const fn new(capacity: usize, buffer_size: usize) -> Self {
        Self {
            capacity,
            buffer_size,
            prewarm_count: 0,
        }
    }

    /// Set the prewarm count
    #[must_use]
    pub const fn with_prewarm(mut self, count: usize) -> Self {
        self.prewarm_count = count;
        self
    }

    /// Build the buffer pool
    #[must_use]
    pub fn build(self) -> Arc<ArrayBufferPool> {
        let pool = Arc::new(ArrayBufferPool::new(self.capacity.max(1), self.buffer_size));
        if self.prewarm_count > 0 {
            pool.prewarm(self.prewarm_count);
        }
        pool
    }
}
