//! Echo handlers
//!
//! Minimal protocol handlers used by the `node-runtime` binary, the
//! integration tests and the benchmarks.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::HandlerError;
use crate::node::{
    ConnectionContext, DatagramHandler, DatagramHandlerFactory, Responder, StreamHandler,
    StreamHandlerFactory,
};

/// Read chunk size for stream echo
const ECHO_CHUNK: usize = 16 * 1024;

/// Writes every byte it reads back to the peer until EOF or cancellation
#[derive(Debug, Default)]
pub struct EchoStreamHandler {
    echoed: u64,
}

impl EchoStreamHandler {
    /// Factory producing a fresh handler per connection
    #[must_use]
    pub fn factory() -> StreamHandlerFactory {
        Arc::new(|| Box::new(Self::default()))
    }
}

#[async_trait]
impl StreamHandler for EchoStreamHandler {
    async fn handle(
        &mut self,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
        ctx: &ConnectionContext,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let mut buf = vec![0u8; ECHO_CHUNK];
        loop {
            let n = tokio::select! {
                () = cancel.cancelled() => return Err(HandlerError::Cancelled),
                n = reader.read(&mut buf) => n?,
            };
            if n == 0 {
                trace!(conn_id = ctx.id, bytes = self.echoed, "Echo connection finished");
                return Ok(());
            }
            writer.write_all(&buf[..n]).await?;
            self.echoed += n as u64;
        }
    }
}

/// Replies to every datagram with the same bytes
#[derive(Debug, Default)]
pub struct EchoDatagramHandler;

impl EchoDatagramHandler {
    /// Factory producing a handler per datagram
    #[must_use]
    pub fn factory() -> DatagramHandlerFactory {
        Arc::new(|| Box::new(Self))
    }
}

#[async_trait]
impl DatagramHandler for EchoDatagramHandler {
    async fn handle(
        &mut self,
        datagram: &[u8],
        peer: SocketAddr,
        responder: &Responder,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        responder.send_to(datagram, peer).await?;
        Ok(())
    }
}
