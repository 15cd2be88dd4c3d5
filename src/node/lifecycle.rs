//! Node lifecycle controller
//!
//! A [`Node`] is constructed configured-but-stopped and moves through
//! `Created -> Starting -> Running -> Stopping -> Stopped`, and finally to
//! `Disposed`.
//!
//! - `start` binds the socket, builds the queue, derives a cancellation token
//!   and spawns the producer plus the worker pool. It is a no-op while running
//!   and after `dispose`.
//! - `stop` cancels, discards queued units, and waits for the producer, the
//!   workers and any dispatched units for at most the stop timeout. It is
//!   idempotent and never fails; an expired timeout is a warning and the
//!   leftover work keeps running in the background until it observes the
//!   cancellation.
//! - `dispose` stops and then refuses further starts.
//!
//! A producer that ends on its own (critical socket error, socket closed,
//! parent token cancelled) stops the node.

use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::handler::ExceptionHandler;
use super::producer::{Producer, ProducerExit};
use super::stats::{NodeStats, NodeStatsSnapshot};
use super::transport::{Bound, Transport, UnitProcessor};
use super::worker::{Dispatch, WorkerContext};
use crate::error::{HandlerError, NodeError};
use crate::queue::BoundedQueue;

/// Lifecycle state of a [`Node`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Constructed, never started
    Created,
    /// Binding and spawning tasks
    Starting,
    /// Producer and workers running
    Running,
    /// Shutdown in progress
    Stopping,
    /// Stopped; may be started again
    Stopped,
    /// Stopped for good
    Disposed,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

/// Outcome of [`Node::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopReport {
    /// Whether this call actually stopped a running node
    pub was_running: bool,
    /// Whether the stop timeout expired with work still in flight
    pub timed_out: bool,
    /// Time spent in `stop`
    pub elapsed: Duration,
}

/// Tasks and handles owned by a running node
struct Running<U> {
    /// Distinguishes successive runs of a restarted node
    generation: u64,
    cancel: CancellationToken,
    queue: Arc<BoundedQueue<U>>,
    /// Shared with workers and dispatched units; released when the run ends
    processor: Arc<dyn UnitProcessor<Unit = U>>,
    producer: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    dispatched: TaskTracker,
    local_addr: SocketAddr,
}

struct NodeInner<T: Transport> {
    transport: T,
    state: Mutex<NodeState>,
    /// Serializes start/stop
    running: AsyncMutex<Option<Running<T::Unit>>>,
    /// Queue of the current run, for introspection
    queue: RwLock<Option<Arc<BoundedQueue<T::Unit>>>>,
    local_addr: RwLock<Option<SocketAddr>>,
    exception_handler: RwLock<Option<ExceptionHandler>>,
    stats: Arc<NodeStats>,
    generations: AtomicU64,
}

/// A TCP or UDP server instance driven by a [`Transport`]
pub struct Node<T: Transport> {
    inner: Arc<NodeInner<T>>,
}

impl<T: Transport> Node<T> {
    /// Create a stopped node
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                transport,
                state: Mutex::new(NodeState::Created),
                running: AsyncMutex::new(None),
                queue: RwLock::new(None),
                local_addr: RwLock::new(None),
                exception_handler: RwLock::new(None),
                stats: Arc::new(NodeStats::new()),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Set the exception callback (builder form)
    #[must_use]
    pub fn with_exception_handler(self, handler: ExceptionHandler) -> Self {
        self.set_exception_handler(handler);
        self
    }

    /// Set the exception callback. Takes effect on the next `start`.
    pub fn set_exception_handler(&self, handler: ExceptionHandler) {
        *self.inner.exception_handler.write() = Some(handler);
    }

    /// Bind and start serving.
    ///
    /// No-op if the node is already running or has been disposed.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Bind`] if the socket cannot be bound.
    pub async fn start(&self) -> Result<(), NodeError> {
        NodeInner::start(&self.inner, CancellationToken::new()).await
    }

    /// Like [`start`](Self::start), with the node's cancellation linked to
    /// `parent`: cancelling `parent` shuts the node's tasks down.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Bind`] if the socket cannot be bound.
    pub async fn start_with(&self, parent: &CancellationToken) -> Result<(), NodeError> {
        NodeInner::start(&self.inner, parent.child_token()).await
    }

    /// Stop serving. Idempotent.
    pub async fn stop(&self) -> StopReport {
        self.inner.stop(None).await
    }

    /// Stop and refuse further starts. Idempotent.
    pub async fn dispose(&self) {
        self.inner.stop(None).await;
        let previous = std::mem::replace(&mut *self.inner.state.lock(), NodeState::Disposed);
        if previous != NodeState::Disposed {
            info!(node = T::NAME, "Node disposed");
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> NodeState {
        *self.inner.state.lock()
    }

    /// Whether the node is serving
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == NodeState::Running
    }

    /// Bound address while running
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.read()
    }

    /// Units waiting in the queue
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.queue.read().as_ref().map_or(0, |q| q.len())
    }

    /// Statistics snapshot
    #[must_use]
    pub fn stats(&self) -> NodeStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// The transport strategy
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }
}

impl<T: Transport + fmt::Debug> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("transport", &self.inner.transport)
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> NodeInner<T> {
    fn set_state(&self, next: NodeState) {
        let mut state = self.state.lock();
        // Disposal is final
        if *state != NodeState::Disposed {
            *state = next;
        }
    }

    async fn start(this: &Arc<Self>, cancel: CancellationToken) -> Result<(), NodeError> {
        let mut running = this.running.lock().await;

        let previous = *this.state.lock();
        if previous == NodeState::Disposed {
            debug!(node = T::NAME, "Start ignored, node is disposed");
            return Ok(());
        }
        if running.is_some() {
            debug!(node = T::NAME, "Start ignored, node is already running");
            return Ok(());
        }

        this.set_state(NodeState::Starting);
        let Bound {
            source,
            processor,
            local_addr,
        } = match this.transport.bind() {
            Ok(bound) => bound,
            Err(e) => {
                error!(node = T::NAME, addr = %this.transport.address(), error = %e, "Failed to start node");
                this.set_state(previous);
                return Err(e);
            }
        };

        let queue = Arc::new(BoundedQueue::new(
            this.transport.queue_capacity(),
            this.transport.full_mode(),
        ));
        let processor = Arc::new(processor);
        let dispatched = TaskTracker::new();
        let ctx = Arc::new(WorkerContext {
            node: T::NAME,
            local_addr,
            queue: Arc::clone(&queue),
            processor: Arc::clone(&processor),
            cancel: cancel.clone(),
            stats: Arc::clone(&this.stats),
            exception_handler: this.exception_handler.read().clone(),
            dispatch: this.transport.dispatch_limit().map(|limit| Dispatch {
                permits: Arc::new(Semaphore::new(limit)),
                tracker: dispatched.clone(),
            }),
        });

        let worker_count = this.transport.worker_count();
        let workers = (0..worker_count)
            .map(|id| tokio::spawn(Self::guard_loop("worker", Arc::clone(&ctx).run(id))))
            .collect();

        let producer = Producer {
            node: T::NAME,
            source,
            queue: Arc::clone(&queue),
            cancel: cancel.clone(),
            stats: Arc::clone(&this.stats),
        };
        let generation = this.generations.fetch_add(1, Ordering::Relaxed);
        let producer = tokio::spawn(Self::run_producer(Arc::downgrade(this), producer, generation));

        *running = Some(Running {
            generation,
            cancel,
            queue: Arc::clone(&queue),
            processor,
            producer,
            workers,
            dispatched,
            local_addr,
        });
        *this.queue.write() = Some(queue);
        *this.local_addr.write() = Some(local_addr);
        this.set_state(NodeState::Running);

        info!(
            node = T::NAME,
            addr = %local_addr,
            workers = worker_count,
            queue_capacity = this.transport.queue_capacity(),
            "Node started"
        );
        Ok(())
    }

    /// Outer panic boundary for a long-running loop
    async fn guard_loop(name: &'static str, task: impl std::future::Future<Output = ()>) {
        if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
            error!(
                node = T::NAME,
                task = name,
                critical = true,
                panic = %HandlerError::from_panic(panic.as_ref()),
                "Loop panicked"
            );
        }
    }

    async fn run_producer(node: Weak<Self>, producer: Producer<T::Source>, generation: u64) {
        let exit = match AssertUnwindSafe(producer.run()).catch_unwind().await {
            Ok(exit) => exit,
            Err(panic) => {
                error!(
                    node = T::NAME,
                    task = "producer",
                    critical = true,
                    panic = %HandlerError::from_panic(panic.as_ref()),
                    "Loop panicked"
                );
                ProducerExit::Critical
            }
        };

        debug!(node = T::NAME, generation, exit = ?exit, "Producer task finished");

        // Without a producer the run is over. stop() awaits this task, so it
        // has to run elsewhere; it is a no-op if a stop already took this run.
        if let Some(node) = node.upgrade() {
            tokio::spawn(async move {
                node.stop(Some(generation)).await;
            });
        }
    }

    /// Stop the current run, or only run `generation` if given
    async fn stop(&self, generation: Option<u64>) -> StopReport {
        let started = Instant::now();
        let mut running = self.running.lock().await;

        let current = running.as_ref().map(|run| run.generation);
        let run = match (current, generation) {
            (Some(current), Some(wanted)) if current != wanted => None,
            _ => running.take(),
        };
        let Some(run) = run else {
            return StopReport {
                was_running: false,
                timed_out: false,
                elapsed: started.elapsed(),
            };
        };

        self.set_state(NodeState::Stopping);
        info!(node = T::NAME, addr = %run.local_addr, "Stopping node");

        let Running {
            generation: _,
            cancel,
            queue,
            processor,
            producer,
            workers,
            dispatched,
            local_addr,
        } = run;
        let producer_abort = producer.abort_handle();

        cancel.cancel();

        let discarded = queue.drain();
        if !discarded.is_empty() {
            debug!(node = T::NAME, count = discarded.len(), "Discarding queued units");
            self.stats.record_dropped(discarded.len() as u64);
        }
        drop(discarded);

        dispatched.close();
        let stop_timeout = self.transport.stop_timeout();
        let drained = tokio::time::timeout(stop_timeout, async move {
            log_join_error("producer", producer.await);
            for result in join_all(workers).await {
                log_join_error("worker", result);
            }
            dispatched.wait().await;
        })
        .await;

        let timed_out = drained.is_err();
        // The socket must be gone when stop returns, whatever is still running
        producer_abort.abort();
        processor.release();
        if timed_out {
            warn!(
                node = T::NAME,
                addr = %local_addr,
                timeout_ms = u64::try_from(stop_timeout.as_millis()).unwrap_or(u64::MAX),
                active = self.stats.active(),
                "Stop timed out, abandoning in-flight work"
            );
        }

        *self.queue.write() = None;
        *self.local_addr.write() = None;
        self.set_state(NodeState::Stopped);

        let elapsed = started.elapsed();
        info!(
            node = T::NAME,
            addr = %local_addr,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "Node stopped"
        );

        StopReport {
            was_running: true,
            timed_out,
            elapsed,
        }
    }
}

impl<T: Transport> Drop for NodeInner<T> {
    fn drop(&mut self) {
        if let Some(run) = self.running.get_mut().take() {
            debug!(node = T::NAME, "Node dropped while running, cancelling");
            run.cancel.cancel();
            drop(run.queue.drain());
            run.producer.abort();
            run.processor.release();
        }
    }
}

fn log_join_error(task: &'static str, result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(task, critical = true, error = %e, "Task panicked");
        } else {
            debug!(task, error = %e, "Task cancelled");
        }
    }
}
