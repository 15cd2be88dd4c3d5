//! I/O utilities for node-runtime
//!
//! # Datagram Buffer Pool
//!
//! The [`BufferPool`] trait and its lock-free [`ArrayBufferPool`] implementation
//! lend fixed-size receive buffers to the UDP path. Loans are RAII
//! [`PooledBuffer`] values that return themselves on drop.

mod buffer_pool;

pub use buffer_pool::{
    ArrayBufferPool, BufferPool, BufferPoolConfig, BufferPoolStats, BufferPoolStatsSnapshot,
    PooledBuffer, DEFAULT_BUFFER_SIZE, DEFAULT_POOL_CAPACITY,
};
