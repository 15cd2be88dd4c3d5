//! UDP transport
//!
//! Received datagrams are queued with [`FullMode::DropOldest`]: the receiver
//! never waits, and under saturation the oldest queued datagram is evicted
//! (its buffer goes straight back to the pool). The sender is not told.
//!
//! Workers dispatch each datagram as its own task once they hold one of
//! `max_concurrency` permits.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::handler::DatagramHandlerFactory;
use super::lifecycle::Node;
use super::socket::bind_udp_socket;
use super::transport::{Bound, Transport, UnitProcessor, UnitSource, WorkUnit};
use crate::config::UdpNodeConfig;
use crate::error::{ConfigError, HandlerError, NodeError, SocketErrorKind};
use crate::io::{BufferPool, BufferPoolConfig, PooledBuffer};
use crate::queue::FullMode;

/// Number of send lock stripes
const SEND_LOCK_STRIPES: usize = 64;

/// A UDP node
pub type UdpNode = Node<UdpTransport>;

/// A received datagram waiting for a worker
#[derive(Debug)]
pub struct Datagram {
    buffer: PooledBuffer,
    peer: SocketAddr,
}

impl Datagram {
    /// Payload bytes
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.buffer.filled()
    }

    /// Sender address
    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl WorkUnit for Datagram {
    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }
}

/// Receive loop source
#[derive(Debug)]
pub struct UdpReceiver {
    socket: Arc<UdpSocket>,
    pool: Arc<dyn BufferPool>,
}

#[async_trait]
impl UnitSource for UdpReceiver {
    type Unit = Datagram;

    async fn next_unit(&mut self) -> io::Result<Datagram> {
        // Rented before the receive; returned on error or cancellation by drop
        let mut buffer = PooledBuffer::rent(&self.pool);
        let (len, peer) = self.socket.recv_from(&mut buffer).await?;
        buffer.set_filled(len);
        Ok(Datagram { buffer, peer })
    }

    fn classify(&self, err: &io::Error) -> SocketErrorKind {
        SocketErrorKind::classify_receive(err)
    }
}

/// Striped async locks keyed by peer address
struct SendLocks {
    stripes: Box<[Mutex<()>]>,
}

impl SendLocks {
    fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe_for(&self, peer: &SocketAddr) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        peer.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let index = (hasher.finish() as usize) % self.stripes.len();
        &self.stripes[index]
    }
}

/// Sends replies from the node's socket.
///
/// Sends to the same peer are serialized so concurrent handlers never
/// interleave their writes to one endpoint. The responder does not keep the
/// socket alive past the end of its run: once the node has stopped, sends fail
/// with `NotConnected` even from handlers the stop timeout abandoned.
#[derive(Clone)]
pub struct Responder {
    socket: Arc<RwLock<Option<Arc<UdpSocket>>>>,
    locks: Arc<SendLocks>,
}

impl Responder {
    fn new(socket: Arc<UdpSocket>) -> Self {
        Self {
            socket: Arc::new(RwLock::new(Some(socket))),
            locks: Arc::new(SendLocks::new(SEND_LOCK_STRIPES)),
        }
    }

    fn socket(&self) -> io::Result<Arc<UdpSocket>> {
        self.socket
            .read()
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "node socket is closed"))
    }

    /// Send `data` to `peer`
    ///
    /// # Errors
    ///
    /// Returns the socket error if the send fails, or `NotConnected` once the
    /// node has stopped.
    pub async fn send_to(&self, data: &[u8], peer: SocketAddr) -> io::Result<usize> {
        let socket = self.socket()?;
        let _guard = self.locks.stripe_for(&peer).lock().await;
        socket.send_to(data, peer).await
    }

    /// Local address of the node's socket
    ///
    /// # Errors
    ///
    /// Returns the socket error if the address cannot be read, or
    /// `NotConnected` once the node has stopped.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket()?.local_addr()
    }

    /// Drop this run's reference to the socket
    fn close(&self) {
        self.socket.write().take();
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("socket", &self.socket.read())
            .field("stripes", &self.locks.stripes.len())
            .finish()
    }
}

/// Runs a [`DatagramHandler`](super::DatagramHandler) over one datagram
pub struct DatagramProcessor {
    factory: DatagramHandlerFactory,
    responder: Responder,
}

impl fmt::Debug for DatagramProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatagramProcessor")
            .field("responder", &self.responder)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl UnitProcessor for DatagramProcessor {
    type Unit = Datagram;

    async fn process(&self, unit: Datagram, cancel: &CancellationToken) -> Result<(), HandlerError> {
        let mut handler = (self.factory)();

        let result = AssertUnwindSafe(handler.handle(
            unit.payload(),
            unit.peer,
            &self.responder,
            cancel,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic.as_ref())));

        handler.close().await;
        // Buffer goes back to the pool here on every path
        drop(unit);

        result
    }

    fn release(&self) {
        self.responder.close();
    }
}

/// UDP strategy for [`Node`]
pub struct UdpTransport {
    config: UdpNodeConfig,
    factory: DatagramHandlerFactory,
    pool: Arc<dyn BufferPool>,
}

impl UdpTransport {
    /// Create a transport with the default lock-free buffer pool
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the options are invalid.
    pub fn new(config: UdpNodeConfig, factory: DatagramHandlerFactory) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool: Arc<dyn BufferPool> =
            BufferPoolConfig::new(config.buffer_pool_capacity, config.receive_buffer_size).build();
        Ok(Self {
            config,
            factory,
            pool,
        })
    }

    /// Create a transport that rents from `pool`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the options are invalid or the
    /// pool's buffers are smaller than `receive_buffer_size`.
    pub fn with_buffer_pool(
        config: UdpNodeConfig,
        factory: DatagramHandlerFactory,
        pool: Arc<dyn BufferPool>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if pool.buffer_size() < config.receive_buffer_size {
            return Err(ConfigError::validation(format!(
                "buffer pool size {} is smaller than udp.receive_buffer_size {}",
                pool.buffer_size(),
                config.receive_buffer_size
            )));
        }
        Ok(Self {
            config,
            factory,
            pool,
        })
    }

    /// Node options
    #[must_use]
    pub fn config(&self) -> &UdpNodeConfig {
        &self.config
    }

    /// Buffer pool used by the receiver
    #[must_use]
    pub fn buffer_pool(&self) -> &Arc<dyn BufferPool> {
        &self.pool
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpTransport")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Transport for UdpTransport {
    type Unit = Datagram;
    type Source = UdpReceiver;
    type Processor = DatagramProcessor;

    const NAME: &'static str = "udp";

    fn address(&self) -> SocketAddr {
        self.config.address
    }

    fn full_mode(&self) -> FullMode {
        FullMode::DropOldest
    }

    fn queue_capacity(&self) -> usize {
        self.config.queue_capacity
    }

    fn worker_count(&self) -> usize {
        self.config.workers
    }

    fn dispatch_limit(&self) -> Option<usize> {
        Some(self.config.max_concurrency)
    }

    fn stop_timeout(&self) -> Duration {
        self.config.stop_timeout()
    }

    fn bind(&self) -> Result<Bound<UdpReceiver, DatagramProcessor>, NodeError> {
        let addr = self.config.address;
        let socket = Arc::new(bind_udp_socket(addr).map_err(|e| NodeError::bind(addr, e))?);
        let local_addr = socket.local_addr().map_err(|e| NodeError::bind(addr, e))?;

        Ok(Bound {
            source: UdpReceiver {
                socket: Arc::clone(&socket),
                pool: Arc::clone(&self.pool),
            },
            processor: DatagramProcessor {
                factory: self.factory.clone(),
                responder: Responder::new(socket),
            },
            local_addr,
        })
    }
}

impl Node<UdpTransport> {
    /// Build a stopped UDP node with the default buffer pool
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the options are invalid.
    pub fn udp(config: UdpNodeConfig, factory: DatagramHandlerFactory) -> Result<Self, ConfigError> {
        Ok(Self::new(UdpTransport::new(config, factory)?))
    }
}
