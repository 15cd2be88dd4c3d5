//! Configuration types for node-runtime
//!
//! This module defines the option structures for TCP and UDP nodes plus the
//! root [`Config`] consumed by the `node-runtime` binary. Every type is
//! deserializable from JSON with per-field defaults and is checked by a
//! `validate()` method before a node is built from it.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::ConfigError;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// TCP node options (omit to disable the TCP node)
    #[serde(default)]
    pub tcp: Option<TcpNodeConfig>,

    /// UDP node options (omit to disable the UDP node)
    #[serde(default)]
    pub udp: Option<UdpNodeConfig>,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tcp.is_none() && self.udp.is_none() {
            return Err(ConfigError::ValidationError(
                "At least one of tcp or udp must be configured".into(),
            ));
        }

        if let Some(tcp) = &self.tcp {
            tcp.validate()?;
        }
        if let Some(udp) = &self.udp {
            udp.validate()?;
        }

        self.log.validate()?;

        Ok(())
    }

    /// Create a default configuration with a TCP and a UDP echo node on localhost
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            tcp: Some(TcpNodeConfig::new(SocketAddr::from(([127, 0, 0, 1], 7000)))),
            udp: Some(UdpNodeConfig::new(SocketAddr::from(([127, 0, 0, 1], 7001)))),
            log: LogConfig::default(),
        }
    }
}

/// Options for a TCP node
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TcpNodeConfig {
    /// Bind address (e.g., "0.0.0.0:7000")
    pub address: SocketAddr,

    /// Number of workers, and therefore of connections serviced at once
    #[serde(default = "default_max_concurrent_connections")]
    pub max_concurrent_connections: usize,

    /// Accepted connections waiting for a worker before `accept()` stalls
    #[serde(default = "default_tcp_queue_capacity")]
    pub queue_capacity: usize,

    /// Listen backlog passed to the OS
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Upper bound on graceful shutdown, in milliseconds
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

impl TcpNodeConfig {
    /// Create options for `address` with every other field at its default
    #[must_use]
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            max_concurrent_connections: default_max_concurrent_connections(),
            queue_capacity: default_tcp_queue_capacity(),
            backlog: default_backlog(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }

    /// Set the worker count
    #[must_use]
    pub fn with_max_concurrent_connections(mut self, n: usize) -> Self {
        self.max_concurrent_connections = n;
        self
    }

    /// Set the queue capacity
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the listen backlog
    #[must_use]
    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set the stop timeout
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Stop timeout as a `Duration`
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Validate the options
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if a limit is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_connections == 0 {
            return Err(ConfigError::ValidationError(
                "tcp.max_concurrent_connections must be greater than 0".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "tcp.queue_capacity must be greater than 0".into(),
            ));
        }
        if self.backlog == 0 {
            return Err(ConfigError::ValidationError(
                "tcp.backlog must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Options for a UDP node
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UdpNodeConfig {
    /// Bind address (e.g., "0.0.0.0:7001")
    pub address: SocketAddr,

    /// Number of worker tasks draining the queue
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Datagrams processed at once across all workers
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Datagrams waiting for a worker before the oldest is evicted
    #[serde(default = "default_udp_queue_capacity")]
    pub queue_capacity: usize,

    /// Size in bytes of each receive buffer
    #[serde(default = "default_receive_buffer_size")]
    pub receive_buffer_size: usize,

    /// Idle buffers kept by the default buffer pool
    #[serde(default = "default_buffer_pool_capacity")]
    pub buffer_pool_capacity: usize,

    /// Upper bound on graceful shutdown, in milliseconds
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

impl UdpNodeConfig {
    /// Create options for `address` with every other field at its default
    #[must_use]
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            workers: default_workers(),
            max_concurrency: default_max_concurrency(),
            queue_capacity: default_udp_queue_capacity(),
            receive_buffer_size: default_receive_buffer_size(),
            buffer_pool_capacity: default_buffer_pool_capacity(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }

    /// Set the worker count
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the in-flight datagram limit
    #[must_use]
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    /// Set the queue capacity
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the receive buffer size
    #[must_use]
    pub fn with_receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size;
        self
    }

    /// Set the stop timeout
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Stop timeout as a `Duration`
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Validate the options
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if a limit is zero, the
    /// concurrency limit exceeds what a semaphore can hold, or the receive
    /// buffer size is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::ValidationError(
                "udp.workers must be greater than 0".into(),
            ));
        }
        if self.max_concurrency == 0 || self.max_concurrency > Semaphore::MAX_PERMITS {
            return Err(ConfigError::ValidationError(format!(
                "udp.max_concurrency must be between 1 and {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "udp.queue_capacity must be greater than 0".into(),
            ));
        }
        if self.receive_buffer_size == 0 || self.receive_buffer_size > MAX_DATAGRAM_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "udp.receive_buffer_size must be between 1 and {MAX_DATAGRAM_SIZE}"
            )));
        }
        if self.buffer_pool_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "udp.buffer_pool_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Largest UDP payload
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include timestamps
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            timestamps: true,
            target: true,
        }
    }
}

impl LogConfig {
    /// Validate the logging options
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for an unknown format.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(ConfigError::ValidationError(format!(
                "log.format must be \"json\" or \"text\", got \"{other}\""
            ))),
        }
    }
}

// Default value functions for serde

const fn default_true() -> bool {
    true
}

const fn default_backlog() -> u32 {
    1024
}

const fn default_max_concurrent_connections() -> usize {
    256
}

const fn default_tcp_queue_capacity() -> usize {
    1024
}

const fn default_udp_queue_capacity() -> usize {
    4096
}

const fn default_max_concurrency() -> usize {
    1024
}

fn default_workers() -> usize {
    num_cpus::get()
}

const fn default_receive_buffer_size() -> usize {
    MAX_DATAGRAM_SIZE
}

const fn default_buffer_pool_capacity() -> usize {
    1024
}

const fn default_stop_timeout_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "json".into()
}
