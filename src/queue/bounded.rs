//! Capacity-limited async FIFO
//!
//! [`BoundedQueue`] sits between a node's producer and its workers. Its length
//! never exceeds the configured capacity; what happens when a push meets a full
//! queue is chosen by [`FullMode`]:
//!
//! - [`FullMode::Wait`]: the producer suspends until a slot frees up. Used for
//!   TCP, where stalling `accept()` pushes pressure back onto the OS backlog.
//! - [`FullMode::DropOldest`]: the oldest queued item is evicted and handed back
//!   to the caller. Used for UDP, where the receiver must never stall.
//!
//! Items are never silently lost: an evicted item is returned from
//! [`push`](BoundedQueue::push), and items still queued at shutdown are
//! returned from [`drain`](BoundedQueue::drain), so their owned resources are
//! released by the caller.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Behavior of [`BoundedQueue::push`] when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullMode {
    /// Suspend the producer until space is available
    Wait,
    /// Evict the oldest item to make room
    DropOldest,
}

/// Error returned when pushing to a closed queue. Carries the rejected item.
#[derive(Debug, PartialEq, Eq)]
pub struct QueueClosed<T>(pub T);

impl<T> fmt::Display for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue is closed")
    }
}

impl<T: fmt::Debug> std::error::Error for QueueClosed<T> {}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded multi-producer multi-consumer async queue.
pub struct BoundedQueue<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    mode: FullMode,
    /// Signalled on push and close
    not_empty: Notify,
    /// Signalled on pop and close
    not_full: Notify,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// A zero capacity is treated as one.
    #[must_use]
    pub fn new(capacity: usize, mode: FullMode) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            mode,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Enqueue an item.
    ///
    /// Returns `Ok(Some(evicted))` when a `DropOldest` queue was full and its
    /// oldest item was removed to make room, `Ok(None)` otherwise. In `Wait`
    /// mode this suspends while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] with the item if the queue has been closed.
    pub async fn push(&self, item: T) -> Result<Option<T>, QueueClosed<T>> {
        match self.mode {
            FullMode::DropOldest => self.push_evicting(item),
            FullMode::Wait => self.push_waiting(item).await,
        }
    }

    fn push_evicting(&self, item: T) -> Result<Option<T>, QueueClosed<T>> {
        let evicted = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(QueueClosed(item));
            }
            let evicted = if state.items.len() >= self.capacity {
                state.items.pop_front()
            } else {
                None
            };
            state.items.push_back(item);
            evicted
        };
        self.not_empty.notify_one();
        Ok(evicted)
    }

    async fn push_waiting(&self, item: T) -> Result<Option<T>, QueueClosed<T>> {
        let mut item = Some(item);
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            // Register before checking so a pop between the check and the
            // await is not missed.
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(value) = item.take() {
                    if state.closed {
                        return Err(QueueClosed(value));
                    }
                    if state.items.len() < self.capacity {
                        state.items.push_back(value);
                        drop(state);
                        self.not_empty.notify_one();
                        return Ok(None);
                    }
                    item = Some(value);
                }
            }

            notified.await;
        }
    }

    /// Dequeue the oldest item, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and empty. Dropping the returned
    /// future before it completes never loses an item.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    drop(state);
                    self.not_full.notify_one();
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Dequeue the oldest item without waiting
    pub fn try_pop(&self) -> Option<T> {
        let item = self.state.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Close the queue. Pending pushes fail, pops drain what is left.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Close the queue and take every item still in it
    pub fn drain(&self) -> Vec<T> {
        let items: Vec<T> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.items.drain(..).collect()
        };
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
        items
    }

    /// Whether [`close`](Self::close) has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Current number of queued items
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued items
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Full-queue policy
    #[must_use]
    pub const fn mode(&self) -> FullMode {
        self.mode
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BoundedQueue")
            .field("len", &state.items.len())
            .field("capacity", &self.capacity)
            .field("mode", &self.mode)
            .field("closed", &state.closed)
            .finish()
    }
}
