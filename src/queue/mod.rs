//! Bounded work queue shared by a node's producer and its workers.

mod bounded;

pub use bounded::{BoundedQueue, FullMode, QueueClosed};
