//! Raw TCP plumbing
//!
//! This module opens the blocking TCP connections the TLS engine and the
//! plain route run over. Connect failures are classified into socket
//! creation, host resolution and connect failures so callers can pick a
//! retry strategy per kind.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Default send/receive timeout applied to transport sockets
pub const DEFAULT_SEND_RECV_TIMEOUT_MS: u64 = 5000;

/// Result type for network operations
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Socket creation failed: {0}")]
    SocketFailed(#[source] io::Error),

    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("Connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether an immediate reconnect attempt is reasonable.
    ///
    /// A refused connect may succeed on the next try; a resolution failure
    /// or socket exhaustion wants a backoff first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConnectFailed { .. })
    }
}

/// Server endpoint: a borrowed host name and a TCP port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerEndpoint<'a> {
    host: &'a str,
    port: u16,
}

impl<'a> ServerEndpoint<'a> {
    /// Create an endpoint, rejecting an empty host or port 0
    pub fn new(host: &'a str, port: u16) -> Result<Self> {
        if host.is_empty() {
            return Err(Error::InvalidEndpoint("empty host name".to_string()));
        }
        if port == 0 {
            return Err(Error::InvalidEndpoint(format!("{}: port 0", host)));
        }
        Ok(ServerEndpoint { host, port })
    }

    pub fn host(&self) -> &'a str {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Socket-level timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect timeout (per resolved address)
    pub connect: Duration,
    /// Write timeout; for TLS sends also the stall limit
    pub send: Duration,
    /// Read timeout; a read that waits this long reports "no data"
    pub recv: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        let default = Duration::from_millis(DEFAULT_SEND_RECV_TIMEOUT_MS);
        Timeouts {
            connect: default,
            send: default,
            recv: default,
        }
    }
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
}

/// Byte-stream transport underneath a session.
///
/// Implemented for [`TcpStream`]; tests wrap it to inject short writes and
/// would-block conditions.
pub trait Transport: Read + Write {
    /// Set the timeout after which a blocked read returns `WouldBlock`
    fn set_recv_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Wait until the transport is ready for `events`.
    ///
    /// Returns false if the timeout expired first.
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> io::Result<bool>;

    /// Shut down both directions of the underlying connection
    fn close(&self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_recv_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)
    }

    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> io::Result<bool> {
        use libc::{poll, pollfd, POLLIN, POLLOUT};

        let mut pfd = pollfd {
            fd: self.as_raw_fd(),
            events: match events {
                PollEvents::Read => POLLIN,
                PollEvents::Write => POLLOUT,
            },
            revents: 0,
        };

        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            let timeout_ms = match deadline {
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .as_millis()
                    .min(i32::MAX as u128) as i32,
                None => -1,
            };

            let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };
            if result >= 0 {
                return Ok(result > 0);
            }

            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn close(&self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            // Peer already went away
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// Map a zero duration to "no timeout" for the socket setters
pub(crate) fn nonzero(timeout: Duration) -> Option<Duration> {
    if timeout.is_zero() {
        None
    } else {
        Some(timeout)
    }
}

/// Open a blocking TCP connection to `endpoint`.
///
/// Every resolved address is tried in order. The returned stream has
/// `TCP_NODELAY` set and its read/write timeouts applied.
pub fn connect(endpoint: &ServerEndpoint<'_>, timeouts: &Timeouts) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = match (endpoint.host(), endpoint.port()).to_socket_addrs() {
        Ok(addrs) => addrs.collect(),
        Err(e) => {
            error!(host = endpoint.host(), error = %e, "host resolution failed");
            return Err(Error::UnknownHost(endpoint.host().to_string()));
        }
    };
    if addrs.is_empty() {
        error!(host = endpoint.host(), "host resolved to no addresses");
        return Err(Error::UnknownHost(endpoint.host().to_string()));
    }

    let mut last_failure = None;
    for addr in addrs {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| {
                error!(%addr, error = %e, "socket creation failed");
                Error::SocketFailed(e)
            })?;

        let attempt = if timeouts.connect.is_zero() {
            socket.connect(&SockAddr::from(addr))
        } else {
            socket.connect_timeout(&SockAddr::from(addr), timeouts.connect)
        };

        match attempt {
            Ok(()) => {
                socket.set_nodelay(true)?;
                socket.set_read_timeout(nonzero(timeouts.recv))?;
                socket.set_write_timeout(nonzero(timeouts.send))?;
                debug!(%addr, "TCP connection established");
                return Ok(socket.into());
            }
            Err(e) => {
                debug!(%addr, error = %e, "connect attempt failed");
                last_failure = Some((addr, e));
            }
        }
    }

    let (addr, source) = match last_failure {
        Some(failure) => failure,
        None => return Err(Error::UnknownHost(endpoint.host().to_string())),
    };
    error!(%addr, error = %source, "connect failed");
    Err(Error::ConnectFailed {
        addr: addr.to_string(),
        source,
    })
}
