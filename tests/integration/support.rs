//! Shared helpers for node integration tests

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

use node_runtime::io::BufferPool;

/// Loopback address with an ephemeral port
pub fn localhost() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Poll `condition` every 5ms until it holds or `timeout` expires.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Run `future` with a deadline, panicking with `what` if it expires
pub async fn within<F: Future>(timeout: Duration, what: &str, future: F) -> F::Output {
    tokio::time::timeout(timeout, future)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

// ============================================================================
// Log capture
// ============================================================================

/// Collects formatted log output of the current thread.
///
/// Only events emitted on the installing thread are captured, so tests using
/// it run on the default current-thread test runtime.
#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Install as the thread's default subscriber until the guard drops
    pub fn install(&self) -> DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Everything logged so far
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }

    /// Whether any line contains both `level` and `needle`
    pub fn has(&self, level: &str, needle: &str) -> bool {
        self.contents()
            .lines()
            .any(|line| line.contains(level) && line.contains(needle))
    }
}

pub struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for CaptureWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter(Arc::clone(&self.buf))
    }
}

// ============================================================================
// Tracking buffer pool
// ============================================================================

/// Buffer pool that records every loan and return
pub struct TrackingPool {
    buffer_size: usize,
    rents: AtomicU64,
    returns: AtomicU64,
}

impl TrackingPool {
    pub fn new(buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            buffer_size,
            rents: AtomicU64::new(0),
            returns: AtomicU64::new(0),
        })
    }

    pub fn rents(&self) -> u64 {
        self.rents.load(Ordering::SeqCst)
    }

    pub fn returns(&self) -> u64 {
        self.returns.load(Ordering::SeqCst)
    }

    pub fn shared(self: &Arc<Self>) -> Arc<dyn BufferPool> {
        Arc::clone(self) as Arc<dyn BufferPool>
    }
}

impl fmt::Debug for TrackingPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingPool")
            .field("rents", &self.rents())
            .field("returns", &self.returns())
            .finish()
    }
}

impl BufferPool for TrackingPool {
    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn rent_vec(&self) -> Vec<u8> {
        self.rents.fetch_add(1, Ordering::SeqCst);
        vec![0u8; self.buffer_size]
    }

    fn return_vec(&self, buffer: Vec<u8>) {
        assert_eq!(buffer.len(), self.buffer_size, "foreign buffer returned");
        let returns = self.returns.fetch_add(1, Ordering::SeqCst) + 1;
        assert!(returns <= self.rents(), "buffer returned more than once");
    }

    fn outstanding(&self) -> u64 {
        let returns = self.returns();
        self.rents().saturating_sub(returns)
    }
}
