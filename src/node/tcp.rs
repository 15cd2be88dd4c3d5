//! TCP transport
//!
//! Accepted connections are queued with [`FullMode::Wait`]: when every worker
//! is busy and the queue is full the acceptor stops calling `accept()`, and new
//! connections wait in the kernel backlog.
//!
//! # Example
//!
//! ```no_run
//! use node_runtime::config::TcpNodeConfig;
//! use node_runtime::handlers::EchoStreamHandler;
//! use node_runtime::node::TcpNode;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TcpNodeConfig::new("127.0.0.1:7000".parse()?);
//! let node = TcpNode::tcp(config, EchoStreamHandler::factory())?;
//! node.start().await?;
//! // ...
//! node.dispose().await;
//! # Ok(())
//! # }
//! ```

use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::handler::{ConnectionContext, StreamHandlerFactory};
use super::lifecycle::Node;
use super::socket::bind_tcp_listener;
use super::transport::{Bound, Transport, UnitProcessor, UnitSource, WorkUnit};
use crate::config::TcpNodeConfig;
use crate::error::{ConfigError, HandlerError, NodeError, SocketErrorKind};
use crate::queue::FullMode;

/// A TCP node
pub type TcpNode = Node<TcpTransport>;

/// An accepted connection waiting for a worker
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
}

impl TcpConnection {
    /// Wrap an accepted stream
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl WorkUnit for TcpConnection {
    fn remote_addr(&self) -> Option<SocketAddr> {
        // A peer that already reset the connection has no address
        self.stream.peer_addr().ok()
    }
}

/// Accept loop source
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
}

#[async_trait]
impl UnitSource for TcpAcceptor {
    type Unit = TcpConnection;

    async fn next_unit(&mut self) -> io::Result<TcpConnection> {
        let (stream, peer) = self.listener.accept().await?;
        trace!(peer = %peer, "Accepted connection");
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }
        Ok(TcpConnection::new(stream))
    }

    fn classify(&self, err: &io::Error) -> SocketErrorKind {
        SocketErrorKind::classify_accept(err)
    }
}

/// Runs a [`StreamHandler`](super::StreamHandler) over one connection
pub struct ConnectionProcessor {
    factory: StreamHandlerFactory,
    local_addr: SocketAddr,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ConnectionProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProcessor")
            .field("local_addr", &self.local_addr)
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl UnitProcessor for ConnectionProcessor {
    type Unit = TcpConnection;

    async fn process(
        &self,
        unit: TcpConnection,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let ctx = ConnectionContext {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            local_addr: self.local_addr,
            remote_addr: unit.remote_addr(),
        };
        let (mut reader, mut writer) = unit.stream.into_split();
        let mut handler = (self.factory)();

        let result = AssertUnwindSafe(handler.handle(&mut reader, &mut writer, &ctx, cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic.as_ref())));

        // Flush and send FIN whatever the handler did
        if let Err(e) = writer.shutdown().await {
            trace!(conn_id = ctx.id, error = %e, "Write half shutdown failed");
        }
        handler.close().await;

        result
    }
}

/// TCP strategy for [`Node`]
pub struct TcpTransport {
    config: TcpNodeConfig,
    factory: StreamHandlerFactory,
}

impl TcpTransport {
    /// Create a transport from validated options
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the options are invalid.
    pub fn new(config: TcpNodeConfig, factory: StreamHandlerFactory) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, factory })
    }

    /// Node options
    #[must_use]
    pub fn config(&self) -> &TcpNodeConfig {
        &self.config
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Transport for TcpTransport {
    type Unit = TcpConnection;
    type Source = TcpAcceptor;
    type Processor = ConnectionProcessor;

    const NAME: &'static str = "tcp";

    fn address(&self) -> SocketAddr {
        self.config.address
    }

    fn full_mode(&self) -> FullMode {
        FullMode::Wait
    }

    fn queue_capacity(&self) -> usize {
        self.config.queue_capacity
    }

    fn worker_count(&self) -> usize {
        self.config.max_concurrent_connections
    }

    fn stop_timeout(&self) -> Duration {
        self.config.stop_timeout()
    }

    fn bind(&self) -> Result<Bound<TcpAcceptor, ConnectionProcessor>, NodeError> {
        let addr = self.config.address;
        let listener =
            bind_tcp_listener(addr, self.config.backlog).map_err(|e| NodeError::bind(addr, e))?;
        let local_addr = listener.local_addr().map_err(|e| NodeError::bind(addr, e))?;

        Ok(Bound {
            source: TcpAcceptor { listener },
            processor: ConnectionProcessor {
                factory: self.factory.clone(),
                local_addr,
                next_id: AtomicU64::new(1),
            },
            local_addr,
        })
    }
}

impl Node<TcpTransport> {
    /// Build a stopped TCP node
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the options are invalid.
    pub fn tcp(config: TcpNodeConfig, factory: StreamHandlerFactory) -> Result<Self, ConfigError> {
        Ok(Self::new(TcpTransport::new(config, factory)?))
    }
}
