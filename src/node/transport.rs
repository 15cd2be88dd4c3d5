//! Transport strategy seam
//!
//! A [`Node`](super::Node) knows nothing about TCP or UDP. It drives a
//! [`Transport`], which binds a socket and splits it into a [`UnitSource`]
//! (the producer side: accept or receive) and a [`UnitProcessor`] (the
//! consumer side: service one unit).

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{HandlerError, NodeError, SocketErrorKind};
use crate::queue::FullMode;

/// One connection or datagram travelling from producer to worker.
///
/// Dropping a unit releases everything it owns (closes the connection or
/// returns the buffer).
pub trait WorkUnit: Send + 'static {
    /// Peer address, if known
    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// Producer side of a bound socket
#[async_trait]
pub trait UnitSource: Send + Sync + 'static {
    /// Unit type produced
    type Unit: WorkUnit;

    /// Wait for the next connection or datagram.
    ///
    /// Must be cancel-safe: dropping the future loses nothing.
    async fn next_unit(&mut self) -> io::Result<Self::Unit>;

    /// Classify an error returned by [`next_unit`](Self::next_unit)
    fn classify(&self, err: &io::Error) -> SocketErrorKind;
}

/// Consumer side of a bound socket
#[async_trait]
pub trait UnitProcessor: Send + Sync + 'static {
    /// Unit type consumed
    type Unit: WorkUnit;

    /// Service one unit to completion
    async fn process(
        &self,
        unit: Self::Unit,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError>;

    /// Drop socket resources shared with in-flight units. Called by the node
    /// once a run has stopped, including runs whose stop timed out.
    fn release(&self) {}
}

/// Result of [`Transport::bind`]
#[derive(Debug)]
pub struct Bound<S, P> {
    /// Producer half
    pub source: S,
    /// Consumer half
    pub processor: P,
    /// Address actually bound (resolves port 0)
    pub local_addr: SocketAddr,
}

/// A socket flavor the generic node can drive
pub trait Transport: Send + Sync + 'static {
    /// Unit type flowing through the queue
    type Unit: WorkUnit;
    /// Producer half
    type Source: UnitSource<Unit = Self::Unit>;
    /// Consumer half
    type Processor: UnitProcessor<Unit = Self::Unit>;

    /// Short name used in log fields
    const NAME: &'static str;

    /// Configured bind address
    fn address(&self) -> SocketAddr;

    /// Queue policy when the producer outpaces the workers
    fn full_mode(&self) -> FullMode;

    /// Queue capacity
    fn queue_capacity(&self) -> usize;

    /// Number of worker tasks
    fn worker_count(&self) -> usize;

    /// Per-unit dispatch limit.
    ///
    /// `None` processes each unit inline on its worker. `Some(n)` makes workers
    /// acquire one of `n` permits and spawn the unit, so up to `n` units run at
    /// once regardless of the worker count.
    fn dispatch_limit(&self) -> Option<usize> {
        None
    }

    /// Upper bound on graceful shutdown
    fn stop_timeout(&self) -> Duration;

    /// Create, configure and bind the socket.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Bind`] if the socket cannot be set up.
    fn bind(&self) -> Result<Bound<Self::Source, Self::Processor>, NodeError>;
}
