//! Configuration module for node-runtime
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use node_runtime::config::{load_config, Config};
//!
//! let config = load_config("/etc/node-runtime/config.json").unwrap();
//! if let Some(tcp) = &config.tcp {
//!     println!("TCP node on {}", tcp.address);
//! }
//! ```

mod loader;
mod types;

pub use loader::{
    create_default_config, load_config, load_config_str, load_config_with_env, ENV_LOG_LEVEL,
    ENV_MAX_CONCURRENCY, ENV_TCP_ADDR, ENV_UDP_ADDR,
};
pub use types::{Config, LogConfig, TcpNodeConfig, UdpNodeConfig, MAX_DATAGRAM_SIZE};
