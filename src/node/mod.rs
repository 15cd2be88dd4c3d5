//! Connection-handling nodes
//!
//! A node binds one socket and services it with a producer/consumer pipeline:
//!
//! ```text
//! accept / recv_from ──► BoundedQueue ──► N workers ──► processor ──► handler
//!    (producer)          (backpressure)                  (per unit)
//! ```
//!
//! The same [`Node`] drives both socket flavors through the [`Transport`]
//! trait:
//!
//! | | [`TcpNode`] | [`UdpNode`] |
//! |---|---|---|
//! | unit | accepted connection | pooled datagram buffer |
//! | full queue | producer waits | oldest unit evicted |
//! | concurrency | `max_concurrent_connections` workers | `max_concurrency` permits |
//! | replies | write half of the connection | [`Responder`] |
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use node_runtime::config::UdpNodeConfig;
//! use node_runtime::handlers::EchoDatagramHandler;
//! use node_runtime::node::UdpNode;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let node = UdpNode::udp(
//!     UdpNodeConfig::new("127.0.0.1:7001".parse()?),
//!     EchoDatagramHandler::factory(),
//! )?
//! .with_exception_handler(Arc::new(|err, peer| {
//!     eprintln!("datagram from {peer:?} failed: {err}");
//! }));
//!
//! node.start().await?;
//! let report = node.stop().await;
//! assert!(!report.timed_out);
//! # Ok(())
//! # }
//! ```

mod handler;
mod lifecycle;
mod producer;
mod socket;
mod stats;
mod tcp;
mod transport;
mod udp;
mod worker;

pub use handler::{
    ConnectionContext, DatagramHandler, DatagramHandlerFactory, ExceptionHandler, StreamHandler,
    StreamHandlerFactory,
};
pub use lifecycle::{Node, NodeState, StopReport};
pub use socket::{bind_tcp_listener, bind_udp_socket};
pub use stats::{NodeStats, NodeStatsSnapshot};
pub use tcp::{ConnectionProcessor, TcpAcceptor, TcpConnection, TcpNode, TcpTransport};
pub use transport::{Bound, Transport, UnitProcessor, UnitSource, WorkUnit};
pub use udp::{Datagram, DatagramProcessor, Responder, UdpNode, UdpReceiver, UdpTransport};
