//! Protocol handler contracts
//!
//! The runtime is protocol-agnostic: per connection or per datagram it builds a
//! handler from a factory and hands it the unit's I/O. Handlers only ever see
//! borrowed streams and slices, so they cannot keep them past the call.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::sync::CancellationToken;

use super::udp::Responder;
use crate::error::HandlerError;

/// Per-connection metadata passed to a [`StreamHandler`]
#[derive(Debug, Clone, Copy)]
pub struct ConnectionContext {
    /// Node-local connection id
    pub id: u64,
    /// Address the node is bound to
    pub local_addr: SocketAddr,
    /// Peer address, if it could be resolved
    pub remote_addr: Option<SocketAddr>,
}

/// Handles one accepted TCP connection.
///
/// After `handle` returns (or fails, or panics) the runtime shuts down the write
/// half and then awaits [`close`](Self::close).
#[async_trait]
pub trait StreamHandler: Send {
    /// Service the connection
    async fn handle(
        &mut self,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
        ctx: &ConnectionContext,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError>;

    /// Release handler resources. Called exactly once per handler.
    async fn close(&mut self) {}
}

/// Handles one received UDP datagram.
#[async_trait]
pub trait DatagramHandler: Send {
    /// Service the datagram. Replies go through `responder`.
    async fn handle(
        &mut self,
        datagram: &[u8],
        peer: SocketAddr,
        responder: &Responder,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError>;

    /// Release handler resources. Called exactly once per handler.
    async fn close(&mut self) {}
}

/// Builds a fresh [`StreamHandler`] for every connection
pub type StreamHandlerFactory = Arc<dyn Fn() -> Box<dyn StreamHandler> + Send + Sync>;

/// Builds a fresh [`DatagramHandler`] for every datagram
pub type DatagramHandlerFactory = Arc<dyn Fn() -> Box<dyn DatagramHandler> + Send + Sync>;

/// Callback invoked when a work unit fails, with the peer address if known.
///
/// A panic inside the callback is caught and logged.
pub type ExceptionHandler = Arc<dyn Fn(&HandlerError, Option<SocketAddr>) + Send + Sync>;
