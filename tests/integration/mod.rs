//! Integration tests for node-runtime
//!
//! These tests run real nodes on loopback sockets and drive them with plain
//! tokio clients.
//!
//! # Test Organization
//!
//! - `tcp_node`: backpressure, failure isolation, graceful and timed-out stop
//! - `udp_node`: exactly-once buffer return, lossy overflow, replies
//! - `lifecycle`: idempotent stop/dispose, restart, linked cancellation
//! - `support`: log capture, tracking buffer pool, polling helpers
//!
//! # Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test --test integration_tests
//!
//! # Run specific test module
//! cargo test --test integration_tests udp_node
//! ```

pub mod lifecycle;
pub mod support;
pub mod udp_node;
