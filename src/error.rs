//! Error types for node-runtime
//!
//! This module defines the error hierarchy for the connection runtime.
//! Errors are grouped by where they surface:
//!
//! - [`ConfigError`] and [`NodeError`] are the only errors a caller of
//!   `start`/`stop`/`dispose` ever sees.
//! - [`HandlerError`] is produced by protocol handlers and stays inside the
//!   worker pool (logged and forwarded to the exception callback).
//! - [`SocketErrorKind`] classifies accept/receive failures so the producer
//!   loops can branch on the cause instead of on platform error types.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Top-level error type for node-runtime
#[derive(Debug, Error)]
pub enum NodeError {
    /// Invalid options detected at construction time
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Socket could not be created, configured or bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

impl NodeError {
    /// Create a bind error
    pub fn bind(addr: SocketAddr, source: io::Error) -> Self {
        Self::Bind { addr, source }
    }

    /// Check if retrying the operation could succeed
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            // The port may be released by its current owner
            Self::Bind { source, .. } => source.kind() == io::ErrorKind::AddrInUse,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }
}

/// Failure of a single work unit (one connection or one datagram)
///
/// Handler errors never leave the worker that produced them.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Handler reported a protocol-level failure
    #[error("Handler failed: {0}")]
    Failed(String),

    /// I/O failure while servicing the unit
    #[error("Handler I/O error: {0}")]
    Io(#[from] io::Error),

    /// Handler panicked; the panic was contained by the worker
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// Handler observed cancellation and gave up
    #[error("Handler cancelled")]
    Cancelled,
}

impl HandlerError {
    /// Create a generic failure
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Build a `Panicked` error from a caught panic payload
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(msg)
    }

    /// Cancellation is an expected outcome during shutdown, not a failure
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Classification of a socket error raised by accept/receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketErrorKind {
    /// The socket was closed under us (shutdown in progress); exit quietly
    Aborted,
    /// Per-iteration failure; log and keep looping
    Transient,
    /// The socket is unusable; stop the node
    Critical,
}

impl SocketErrorKind {
    /// Classify an accept error on a listening TCP socket
    ///
    /// A peer that aborts or resets between SYN and `accept()` only affects
    /// that one connection and is transient. EINVAL means the listener is no
    /// longer listening.
    #[must_use]
    pub fn classify_accept(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted => return Self::Transient,
            _ => {}
        }
        if err.raw_os_error() == Some(libc::EINVAL) {
            return Self::Aborted;
        }
        Self::classify_common(err).unwrap_or(Self::Transient)
    }

    /// Classify a receive error on a UDP socket
    ///
    /// ICMP port-unreachable caused by an earlier send surfaces on the next
    /// `recv_from` as ECONNRESET/ECONNREFUSED; the socket itself is fine.
    /// EINVAL on an unconnected datagram socket points at a broken socket.
    #[must_use]
    pub fn classify_receive(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted => return Self::Transient,
            _ => {}
        }
        if err.raw_os_error() == Some(libc::EINVAL) {
            return Self::Critical;
        }
        Self::classify_common(err).unwrap_or(Self::Transient)
    }

    fn classify_common(err: &io::Error) -> Option<Self> {
        match err.kind() {
            io::ErrorKind::PermissionDenied
            | io::ErrorKind::AddrInUse
            | io::ErrorKind::AddrNotAvailable => return Some(Self::Critical),
            io::ErrorKind::NotConnected => return Some(Self::Aborted),
            _ => {}
        }
        match err.raw_os_error() {
            Some(libc::EBADF) | Some(libc::ENOTSOCK) | Some(libc::ECANCELED) => Some(Self::Aborted),
            Some(libc::ESHUTDOWN) | Some(libc::ENETDOWN) => Some(Self::Critical),
            _ => None,
        }
    }

    /// Resource exhaustion errors (EMFILE, ENFILE, ENOBUFS, ENOMEM) deserve a backoff
    /// before the loop retries.
    #[must_use]
    pub fn needs_backoff(err: &io::Error) -> bool {
        matches!(
            err.raw_os_error(),
            Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOBUFS) | Some(libc::ENOMEM)
        ) || err.kind() == io::ErrorKind::OutOfMemory
    }
}

/// Type alias for Result with NodeError
pub type Result<T> = std::result::Result<T, NodeError>;
