//! Acceptor / receiver loop
//!
//! One producer per node pulls units from the [`UnitSource`] and pushes them
//! into the bounded queue. Errors from the source are branched on their
//! [`SocketErrorKind`].

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::stats::NodeStats;
use super::transport::{UnitSource, WorkUnit};
use crate::error::SocketErrorKind;
use crate::queue::{BoundedQueue, QueueClosed};

/// Pause after a resource exhaustion error (EMFILE and friends)
pub(crate) const EXHAUSTION_BACKOFF: Duration = Duration::from_millis(50);

/// Why the producer loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProducerExit {
    /// Cancellation fired; the normal shutdown path
    Cancelled,
    /// The socket was closed without cancellation
    SocketClosed,
    /// A critical socket error made the socket unusable
    Critical,
}

pub(crate) struct Producer<S: UnitSource> {
    pub(crate) node: &'static str,
    pub(crate) source: S,
    pub(crate) queue: Arc<BoundedQueue<S::Unit>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) stats: Arc<NodeStats>,
}

impl<S: UnitSource> Producer<S> {
    /// Run until cancellation or a fatal socket condition. Always closes the
    /// queue on the way out, and drops the socket with `self`.
    pub(crate) async fn run(mut self) -> ProducerExit {
        let exit = self.produce().await;
        self.queue.close();
        debug!(node = self.node, exit = ?exit, "Producer exited");
        exit
    }

    async fn produce(&mut self) -> ProducerExit {
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return ProducerExit::Cancelled,
                next = self.source.next_unit() => next,
            };

            match next {
                Ok(unit) => {
                    self.stats.record_accepted();
                    if !self.enqueue(unit).await {
                        return ProducerExit::Cancelled;
                    }
                }
                Err(e) => match self.source.classify(&e) {
                    SocketErrorKind::Aborted => {
                        if self.cancel.is_cancelled() {
                            return ProducerExit::Cancelled;
                        }
                        info!(node = self.node, error = %e, "Socket closed, producer stopping");
                        return ProducerExit::SocketClosed;
                    }
                    SocketErrorKind::Transient => {
                        self.stats.record_producer_error();
                        warn!(node = self.node, error = %e, "Transient socket error");
                        if SocketErrorKind::needs_backoff(&e) {
                            tokio::select! {
                                () = self.cancel.cancelled() => return ProducerExit::Cancelled,
                                () = tokio::time::sleep(EXHAUSTION_BACKOFF) => {}
                            }
                        }
                    }
                    SocketErrorKind::Critical => {
                        error!(
                            node = self.node,
                            critical = true,
                            error = %e,
                            "Critical socket error, stopping node"
                        );
                        return ProducerExit::Critical;
                    }
                },
            }
        }
    }

    /// Push one unit. Returns false if the node is shutting down.
    async fn enqueue(&self, unit: S::Unit) -> bool {
        let pushed = tokio::select! {
            biased;
            // A unit still waiting for a slot is dropped with the push future
            () = self.cancel.cancelled() => {
                self.stats.record_dropped(1);
                return false;
            }
            pushed = self.queue.push(unit) => pushed,
        };

        match pushed {
            Ok(None) => true,
            Ok(Some(evicted)) => {
                self.stats.record_dropped(1);
                warn!(
                    node = self.node,
                    remote = ?evicted.remote_addr(),
                    capacity = self.queue.capacity(),
                    "Work queue full, dropped oldest unit"
                );
                true
            }
            Err(QueueClosed(unit)) => {
                drop(unit);
                self.stats.record_dropped(1);
                false
            }
        }
    }
}
