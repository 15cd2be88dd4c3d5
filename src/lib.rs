//! node-runtime: bounded-concurrency TCP/UDP connection runtime
//!
//! This crate accepts and services network traffic under bounded concurrency
//! using a producer/consumer pipeline with explicit backpressure, pooled
//! datagram buffers and coordinated graceful shutdown. Protocol logic is
//! plugged in through handler traits; the runtime itself is protocol-agnostic.
//!
//! # Features
//!
//! - **Backpressure**: a full TCP queue stalls `accept()`; a full UDP queue
//!   evicts the oldest datagram instead of stalling the receiver
//! - **Isolation**: a failing or panicking handler only fails its own unit
//! - **Buffer pooling**: lock-free datagram buffer pool with RAII return
//! - **Graceful shutdown**: cooperative cancellation with a bounded stop timeout
//!
//! # Architecture
//!
//! ```text
//! Acceptor/Receiver → BoundedQueue → Worker pool → Processor → Handler
//!                                                     ↓
//!                                       reply over connection / Responder
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use node_runtime::config::TcpNodeConfig;
//! use node_runtime::handlers::EchoStreamHandler;
//! use node_runtime::node::TcpNode;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let node = TcpNode::tcp(
//!     TcpNodeConfig::new("127.0.0.1:7000".parse()?).with_max_concurrent_connections(64),
//!     EchoStreamHandler::factory(),
//! )?;
//!
//! node.start().await?;
//! tokio::signal::ctrl_c().await?;
//! node.dispose().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`error`]: Error types and socket error classification
//! - [`handlers`]: Echo handlers
//! - [`io`]: Datagram buffer pool
//! - [`node`]: Nodes, transports, workers and lifecycle
//! - [`queue`]: Bounded work queue

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod io;
pub mod node;
pub mod queue;

// Re-export commonly used types at the crate root
pub use config::{Config, TcpNodeConfig, UdpNodeConfig};
pub use error::{ConfigError, HandlerError, NodeError, SocketErrorKind};
pub use io::{ArrayBufferPool, BufferPool, PooledBuffer};
pub use node::{
    DatagramHandler, ExceptionHandler, Node, NodeState, StopReport, StreamHandler, TcpNode,
    UdpNode,
};
pub use queue::{BoundedQueue, FullMode};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
