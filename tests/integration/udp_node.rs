//! UDP node behavior against real loopback clients

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use node_runtime::config::UdpNodeConfig;
use node_runtime::error::HandlerError;
use node_runtime::handlers::EchoDatagramHandler;
use node_runtime::io::BufferPool;
use node_runtime::node::{
    DatagramHandler, DatagramHandlerFactory, NodeState, Responder, UdpNode, UdpTransport,
};

use super::support::{localhost, wait_until, within, LogCapture, TrackingPool};

const SETTLE: Duration = Duration::from_secs(10);
const BUFFER_SIZE: usize = 2048;

/// Fails datagrams carrying an odd sequence number
struct OddFails;

#[async_trait]
impl DatagramHandler for OddFails {
    async fn handle(
        &mut self,
        datagram: &[u8],
        _peer: SocketAddr,
        _responder: &Responder,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let bytes: [u8; 4] = datagram
            .try_into()
            .map_err(|_| HandlerError::failed("short datagram"))?;
        let seq = u32::from_le_bytes(bytes);
        if seq % 2 == 1 {
            return Err(HandlerError::failed(format!("odd sequence {seq}")));
        }
        Ok(())
    }
}

/// Holds every datagram until `gate` opens
struct Gated {
    gate: CancellationToken,
}

#[async_trait]
impl DatagramHandler for Gated {
    async fn handle(
        &mut self,
        _datagram: &[u8],
        _peer: SocketAddr,
        _responder: &Responder,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.gate.cancelled().await;
        Ok(())
    }
}

fn tracked_node(
    config: UdpNodeConfig,
    factory: DatagramHandlerFactory,
) -> (UdpNode, Arc<TrackingPool>) {
    let pool = TrackingPool::new(BUFFER_SIZE);
    let transport = UdpTransport::with_buffer_pool(
        config.with_receive_buffer_size(BUFFER_SIZE),
        factory,
        pool.shared(),
    )
    .unwrap();
    (UdpNode::new(transport), pool)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_buffer_returned_once() {
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reported);

    let (node, pool) = tracked_node(
        UdpNodeConfig::new(localhost())
            .with_workers(4)
            .with_max_concurrency(32),
        Arc::new(|| Box::new(OddFails)),
    );
    node.set_exception_handler(Arc::new(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    node.start().await.unwrap();
    let addr = node.local_addr().unwrap();

    let client = UdpSocket::bind(localhost()).await.unwrap();
    for seq in 0u32..1000 {
        client.send_to(&seq.to_le_bytes(), addr).await.unwrap();
        // Pace the sender so the socket receive buffer never overflows
        if seq % 10 == 9 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    assert!(
        wait_until(SETTLE, || {
            node.stats().processed == 1000 && reported.load(Ordering::SeqCst) == 500
        })
        .await
    );
    let stats = node.stats();
    assert_eq!(stats.accepted, 1000);
    assert_eq!(stats.failed, 500);
    assert_eq!(stats.dropped, 0);

    let report = node.stop().await;
    assert!(!report.timed_out);

    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.rents(), pool.returns());
    // Every datagram plus the receive cancelled by stop
    assert_eq!(pool.rents(), 1001);
}

#[tokio::test]
async fn test_full_queue_drops_oldest() {
    let logs = LogCapture::default();
    let _guard = logs.install();

    let gate = CancellationToken::new();
    let factory: DatagramHandlerFactory = {
        let gate = gate.clone();
        Arc::new(move || Box::new(Gated { gate: gate.clone() }))
    };
    let (node, pool) = tracked_node(
        UdpNodeConfig::new(localhost())
            .with_workers(1)
            .with_max_concurrency(1)
            .with_queue_capacity(4),
        factory,
    );
    node.start().await.unwrap();
    let addr = node.local_addr().unwrap();

    let client = UdpSocket::bind(localhost()).await.unwrap();

    // Occupy the only permit, then park a second datagram on the worker so
    // nothing leaves the queue while it overflows
    client.send_to(&[0], addr).await.unwrap();
    assert!(wait_until(SETTLE, || node.stats().active == 1).await);
    client.send_to(&[1], addr).await.unwrap();
    assert!(wait_until(SETTLE, || node.stats().accepted == 2 && node.queue_len() == 0).await);

    let capacity = 4;
    let overflow = 6;
    for i in 0..(capacity + overflow) {
        client.send_to(&[2 + i], addr).await.unwrap();
    }

    let in_flight = 2;
    assert!(
        wait_until(SETTLE, || {
            let stats = node.stats();
            stats.accepted == 12 && stats.dropped == u64::from(overflow)
        })
        .await
    );
    let stats = node.stats();
    assert_eq!(node.queue_len(), usize::from(capacity));
    assert_eq!(stats.dropped, u64::from(overflow));
    assert_eq!(stats.dropped, stats.accepted - u64::from(capacity) - in_flight);
    assert_eq!(stats.active, 1);
    // Queued and in-flight datagrams plus the buffer rented for the pending receive
    assert_eq!(pool.outstanding(), u64::from(capacity) + in_flight + 1);
    assert!(logs.has("WARN", "dropped oldest unit"));

    gate.cancel();
    assert!(wait_until(SETTLE, || node.stats().processed == 6).await);
    assert_eq!(node.queue_len(), 0);
    assert_eq!(node.stats().failed, 0);

    let report = node.stop().await;
    assert!(!report.timed_out);
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.rents(), pool.returns());
}

#[tokio::test]
async fn test_stop_returns_queued_buffers() {
    let gate = CancellationToken::new();
    let factory: DatagramHandlerFactory = {
        let gate = gate.clone();
        Arc::new(move || Box::new(Gated { gate: gate.clone() }))
    };
    let (node, pool) = tracked_node(
        UdpNodeConfig::new(localhost())
            .with_workers(1)
            .with_max_concurrency(1)
            .with_queue_capacity(16)
            .with_stop_timeout(Duration::from_millis(100)),
        factory,
    );
    node.start().await.unwrap();
    let addr = node.local_addr().unwrap();

    let client = UdpSocket::bind(localhost()).await.unwrap();
    for i in 0u8..6 {
        client.send_to(&[i], addr).await.unwrap();
    }
    assert!(
        wait_until(SETTLE, || {
            let stats = node.stats();
            stats.accepted == 6 && stats.active == 1 && node.queue_len() == 4
        })
        .await
    );

    // The gated handler ignores cancellation, so stop gives up on it
    let report = node.stop().await;
    assert!(report.timed_out);
    assert_eq!(node.state(), NodeState::Stopped);
    // Queued units and the unit awaiting a permit are discarded
    assert_eq!(node.stats().dropped, 5);
    assert_eq!(pool.outstanding(), 1);

    // The abandoned handler still returns its buffer when it finishes
    gate.cancel();
    assert!(wait_until(SETTLE, || pool.outstanding() == 0 && node.stats().processed == 1).await);
}

/// Replies once `gate` opens and records how the send went
struct GatedReply {
    gate: CancellationToken,
    send_errors: Arc<parking_lot::Mutex<Vec<std::io::ErrorKind>>>,
}

#[async_trait]
impl DatagramHandler for GatedReply {
    async fn handle(
        &mut self,
        datagram: &[u8],
        peer: SocketAddr,
        responder: &Responder,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.gate.cancelled().await;
        if let Err(e) = responder.send_to(datagram, peer).await {
            self.send_errors.lock().push(e.kind());
            return Err(e.into());
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_timed_out_stop_releases_port() {
    let gate = CancellationToken::new();
    let send_errors = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let factory: DatagramHandlerFactory = {
        let gate = gate.clone();
        let send_errors = Arc::clone(&send_errors);
        Arc::new(move || {
            Box::new(GatedReply {
                gate: gate.clone(),
                send_errors: Arc::clone(&send_errors),
            })
        })
    };
    let (node, pool) = tracked_node(
        UdpNodeConfig::new(localhost()).with_stop_timeout(Duration::from_millis(100)),
        factory,
    );
    node.start().await.unwrap();
    let addr = node.local_addr().unwrap();

    let client = UdpSocket::bind(localhost()).await.unwrap();
    client.send_to(b"stuck", addr).await.unwrap();
    assert!(wait_until(SETTLE, || node.stats().active == 1).await);

    let report = node.stop().await;
    assert!(report.timed_out);

    // The handler is still running, yet the address is free
    let rebound = UdpSocket::bind(addr).await.unwrap();
    drop(rebound);

    // A fresh node can take the address over
    let replacement = UdpNode::udp(
        UdpNodeConfig::new(addr).with_workers(1),
        EchoDatagramHandler::factory(),
    )
    .unwrap();
    replacement.start().await.unwrap();
    assert_eq!(replacement.local_addr(), Some(addr));

    // The abandoned handler cannot reply through the closed socket
    gate.cancel();
    assert!(wait_until(SETTLE, || node.stats().failed == 1).await);
    assert_eq!(*send_errors.lock(), vec![std::io::ErrorKind::NotConnected]);
    assert!(wait_until(SETTLE, || pool.outstanding() == 0).await);

    node.dispose().await;
    replacement.dispose().await;
}

#[tokio::test]
async fn test_replies_reach_each_peer() {
    let node = UdpNode::udp(
        UdpNodeConfig::new(localhost()).with_workers(2),
        EchoDatagramHandler::factory(),
    )
    .unwrap();
    node.start().await.unwrap();
    let addr = node.local_addr().unwrap();

    let mut peers = Vec::new();
    for p in 0u8..3 {
        peers.push(tokio::spawn(async move {
            let client = UdpSocket::bind(localhost()).await.unwrap();
            let mut buf = [0u8; 16];
            for i in 0u8..10 {
                client.send_to(&[p, i], addr).await.unwrap();
                let (n, from) = client.recv_from(&mut buf).await.unwrap();
                assert_eq!(from, addr);
                assert_eq!(&buf[..n], &[p, i]);
            }
        }));
    }
    for peer in peers {
        within(SETTLE, "peer replies", peer).await.unwrap();
    }

    assert!(wait_until(SETTLE, || node.stats().processed == 30).await);
    node.dispose().await;
}
