//! Worker pool
//!
//! Each worker repeatedly dequeues one unit and runs it through the
//! transport's processor. Failures stay inside the unit: an error result or a
//! panic is logged, counted and reported to the exception callback, and the
//! worker moves on. Workers stop taking units once cancellation fires; units
//! still queued at that point are discarded by the lifecycle controller.

use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use super::handler::ExceptionHandler;
use super::stats::NodeStats;
use super::transport::{UnitProcessor, WorkUnit};
use crate::error::HandlerError;
use crate::queue::BoundedQueue;

/// Spawned-unit mode: a permit pool bounding in-flight units plus the tracker
/// the lifecycle controller waits on.
pub(crate) struct Dispatch {
    pub(crate) permits: Arc<Semaphore>,
    pub(crate) tracker: TaskTracker,
}

/// State shared by every worker of one node
pub(crate) struct WorkerContext<P: UnitProcessor> {
    pub(crate) node: &'static str,
    pub(crate) local_addr: SocketAddr,
    pub(crate) queue: Arc<BoundedQueue<P::Unit>>,
    pub(crate) processor: Arc<P>,
    pub(crate) cancel: CancellationToken,
    pub(crate) stats: Arc<NodeStats>,
    pub(crate) exception_handler: Option<ExceptionHandler>,
    pub(crate) dispatch: Option<Dispatch>,
}

impl<P: UnitProcessor> WorkerContext<P> {
    /// Worker main loop
    pub(crate) async fn run(self: Arc<Self>, worker_id: usize) {
        debug!(node = self.node, worker_id, "Worker started");

        loop {
            let unit = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                unit = self.queue.pop() => match unit {
                    Some(unit) => unit,
                    // Closed and drained
                    None => break,
                },
            };

            match &self.dispatch {
                None => self.process_unit(unit).await,
                Some(dispatch) => {
                    let permit = tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => {
                            drop(unit);
                            self.stats.record_dropped(1);
                            break;
                        }
                        permit = Arc::clone(&dispatch.permits).acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                    };
                    let ctx = Arc::clone(&self);
                    dispatch.tracker.spawn(async move {
                        ctx.process_unit(unit).await;
                        drop(permit);
                    });
                }
            }
        }

        debug!(node = self.node, worker_id, "Worker exiting");
    }

    /// Process one unit inside the isolation boundary
    async fn process_unit(&self, unit: P::Unit) {
        let remote = unit.remote_addr();
        self.stats.unit_started();

        let outcome = AssertUnwindSafe(self.processor.process(unit, &self.cancel))
            .catch_unwind()
            .await;

        self.stats.unit_finished();

        let err = match outcome {
            Ok(Ok(())) => {
                self.stats.record_processed(false);
                return;
            }
            Ok(Err(err)) => err,
            Err(panic) => HandlerError::from_panic(panic.as_ref()),
        };

        if err.is_cancellation() {
            self.stats.record_processed(false);
            debug!(node = self.node, remote = ?remote, "Work unit cancelled");
            return;
        }

        self.stats.record_processed(true);
        error!(
            node = self.node,
            local = %self.local_addr,
            remote = ?remote,
            error = %err,
            "Work unit failed"
        );
        self.report(&err, remote);
    }

    fn report(&self, err: &HandlerError, remote: Option<SocketAddr>) {
        let Some(handler) = &self.exception_handler else {
            return;
        };
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(err, remote))) {
            error!(
                node = self.node,
                remote = ?remote,
                panic = %HandlerError::from_panic(panic.as_ref()),
                "Exception handler panicked"
            );
        }
    }
}
