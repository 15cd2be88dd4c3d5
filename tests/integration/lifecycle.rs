//! Start/stop/dispose semantics shared by both node kinds

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;

use node_runtime::config::{TcpNodeConfig, UdpNodeConfig};
use node_runtime::error::HandlerError;
use node_runtime::handlers::{EchoDatagramHandler, EchoStreamHandler};
use node_runtime::node::{
    ConnectionContext, NodeState, StreamHandler, StreamHandlerFactory, TcpNode, UdpNode,
};

use super::support::{localhost, wait_until, within, LogCapture};

const SETTLE: Duration = Duration::from_secs(5);

async fn echo_once(addr: std::net::SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(payload).await.unwrap();
    client.shutdown().await.unwrap();
    let mut reply = Vec::new();
    client.read_to_end(&mut reply).await.unwrap();
    reply
}

fn echo_node() -> TcpNode {
    TcpNode::tcp(
        TcpNodeConfig::new(localhost()).with_max_concurrent_connections(2),
        EchoStreamHandler::factory(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_stop_and_dispose_are_idempotent() {
    let node = echo_node();
    assert_eq!(node.state(), NodeState::Created);

    // Stopping a node that never ran is a no-op
    assert!(!node.stop().await.was_running);
    assert_eq!(node.state(), NodeState::Created);

    node.start().await.unwrap();
    let addr = node.local_addr().unwrap();
    // A second start keeps the running instance
    node.start().await.unwrap();
    assert_eq!(node.local_addr(), Some(addr));

    assert!(node.stop().await.was_running);
    assert_eq!(node.state(), NodeState::Stopped);
    assert!(node.local_addr().is_none());
    assert!(!node.stop().await.was_running);

    node.dispose().await;
    node.dispose().await;
    assert_eq!(node.state(), NodeState::Disposed);

    // Start after dispose is ignored
    node.start().await.unwrap();
    assert_eq!(node.state(), NodeState::Disposed);
    assert!(node.local_addr().is_none());
}

#[tokio::test]
async fn test_restart_after_stop() {
    let node = echo_node();

    node.start().await.unwrap();
    let first = node.local_addr().unwrap();
    assert_eq!(echo_once(first, b"one").await, b"one");
    node.stop().await;

    node.start().await.unwrap();
    assert!(node.is_running());
    let second = node.local_addr().unwrap();
    assert_eq!(echo_once(second, b"two").await, b"two");

    // Statistics accumulate across runs
    assert!(wait_until(SETTLE, || node.stats().processed == 2).await);
    assert_eq!(node.stats().accepted, 2);

    node.dispose().await;
}

#[tokio::test]
async fn test_parent_cancellation_stops_node() {
    let parent = CancellationToken::new();
    let tcp = echo_node();
    let udp = UdpNode::udp(
        UdpNodeConfig::new(localhost()).with_workers(1),
        EchoDatagramHandler::factory(),
    )
    .unwrap();

    tcp.start_with(&parent).await.unwrap();
    udp.start_with(&parent).await.unwrap();
    let udp_addr = udp.local_addr().unwrap();

    parent.cancel();

    assert!(wait_until(SETTLE, || tcp.state() == NodeState::Stopped).await);
    assert!(wait_until(SETTLE, || udp.state() == NodeState::Stopped).await);
    assert!(tcp.local_addr().is_none());

    // The UDP port was released
    let rebound = UdpSocket::bind(udp_addr).await;
    assert!(rebound.is_ok());

    // An explicit stop afterwards finds nothing to do
    assert!(!tcp.stop().await.was_running);
}

#[tokio::test]
async fn test_stop_after_linked_stop_then_restart() {
    let parent = CancellationToken::new();
    let node = echo_node();

    node.start_with(&parent).await.unwrap();
    parent.cancel();
    assert!(wait_until(SETTLE, || node.state() == NodeState::Stopped).await);

    // A fresh run is not tied to the cancelled parent
    node.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(node.is_running());
    let addr = node.local_addr().unwrap();
    assert_eq!(echo_once(addr, b"again").await, b"again");

    node.dispose().await;
}

struct AlwaysFails;

#[async_trait]
impl StreamHandler for AlwaysFails {
    async fn handle(
        &mut self,
        _reader: &mut OwnedReadHalf,
        _writer: &mut OwnedWriteHalf,
        _ctx: &ConnectionContext,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        Err(HandlerError::failed("refused"))
    }
}

#[tokio::test]
async fn test_panicking_exception_handler_is_contained() {
    let logs = LogCapture::default();
    let _guard = logs.install();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let factory: StreamHandlerFactory = Arc::new(|| Box::new(AlwaysFails));
    let node = TcpNode::tcp(TcpNodeConfig::new(localhost()), factory)
        .unwrap()
        .with_exception_handler(Arc::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            panic!("exception handler blew up");
        }));
    node.start().await.unwrap();
    let addr = node.local_addr().unwrap();

    for _ in 0..3 {
        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut reply = Vec::new();
        let _ = within(SETTLE, "connection close", client.read_to_end(&mut reply)).await;
        assert!(reply.is_empty());
    }

    assert!(wait_until(SETTLE, || calls.load(Ordering::SeqCst) == 3).await);
    assert!(wait_until(SETTLE, || node.stats().failed == 3).await);
    assert!(node.is_running());
    assert!(logs.has("ERROR", "Exception handler panicked"));

    let report = node.stop().await;
    assert!(!report.timed_out);
}
