//! Listening socket setup and accept error handling.

use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Create a TCP listener registered with the current tokio runtime.
pub fn bind_listener(addr: SocketAddr, backlog: u32, reuse_port: bool) -> io::Result<TcpListener> {
    TcpListener::from_std(bind_std_listener(addr, backlog, reuse_port)?)
}

/// Create a non-blocking std listener, not yet tied to any runtime.
///
/// `SO_REUSEADDR` is always set so the server can restart while old
/// connections sit in TIME_WAIT. `SO_REUSEPORT` lets several listeners, in
/// this process or others, share the port with kernel load balancing.
pub fn bind_std_listener(
    addr: SocketAddr,
    backlog: u32,
    reuse_port: bool,
) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    if reuse_port {
        socket.set_reuse_port(true)?;
    }
    #[cfg(not(unix))]
    let _ = reuse_port;

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;

    Ok(socket.into())
}

/// Accept failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptError {
    /// The pending connection failed before we got it. Retry immediately.
    Connection,
    /// Out of descriptors or memory. Retrying at once would spin.
    Resources,
    /// Anything else.
    Other,
}

impl AcceptError {
    /// Whether the accept loop should pause before the next attempt.
    pub fn needs_backoff(self) -> bool {
        !matches!(self, AcceptError::Connection)
    }
}

/// Sort an error returned by `accept` into an [`AcceptError`].
pub fn classify_accept_error(err: &io::Error) -> AcceptError {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted => return AcceptError::Connection,
        io::ErrorKind::OutOfMemory => return AcceptError::Resources,
        _ => {}
    }

    match err.raw_os_error() {
        Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOBUFS) | Some(libc::ENOMEM) => {
            AcceptError::Resources
        }
        #[cfg(target_os = "linux")]
        Some(libc::EPROTO) => AcceptError::Connection,
        _ => AcceptError::Other,
    }
}
