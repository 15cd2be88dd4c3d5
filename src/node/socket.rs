//! Socket creation helpers
//!
//! Sockets are built with `socket2` so options can be set before `bind`, then
//! handed to tokio.

use std::io;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, UdpSocket};
use tracing::{debug, warn};

/// Create a non-blocking TCP listener bound to `addr`.
///
/// `SO_REUSEADDR` is best-effort: a failure to set it is logged and binding
/// proceeds.
///
/// # Errors
///
/// Returns the underlying I/O error if socket creation, bind or listen fails.
pub fn bind_tcp_listener(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    if let Err(e) = socket.set_reuse_address(true) {
        warn!(addr = %addr, error = %e, "Failed to set SO_REUSEADDR; continuing without it");
    }

    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;
    socket.set_nonblocking(true)?;

    debug!(addr = %addr, backlog, "Created TCP listener");
    TcpListener::from_std(socket.into())
}

/// Create a non-blocking UDP socket bound to `addr`.
///
/// Address reuse is left off: on Linux it would let a second UDP socket share
/// the port and split the traffic.
///
/// # Errors
///
/// Returns the underlying I/O error if socket creation or bind fails.
pub fn bind_udp_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;

    debug!(addr = %addr, "Created UDP socket");
    UdpSocket::from_std(socket.into())
}
