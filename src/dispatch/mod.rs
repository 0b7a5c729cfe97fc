//! Transport dispatch
//!
//! Lets protocol clients (WebSocket, MQTT, HTTP) open, write, read and
//! close a connection without knowing whether TLS is in use. The URI
//! scheme picks the route once, in [`open_client`]; the returned
//! [`Connection`] handle carries it from then on.
//!
//! # Examples
//!
//! ```no_run
//! use halow_transport::dispatch::{open_client, ClientOptions, Scheme};
//! use halow_transport::tls::Credentials;
//!
//! let credentials = Credentials::new()
//!     .root_ca(std::fs::read_to_string("root-ca.pem").unwrap());
//! let options = ClientOptions::new(credentials);
//!
//! let mut conn = open_client(Scheme::Wss, "echo.example.com", 443, &options).unwrap();
//! conn.write(b"GET / HTTP/1.1\r\nHost: echo.example.com\r\n\r\n").unwrap();
//!
//! // Feed whatever arrived to the protocol parser
//! let mut parser = |data: &[u8]| {
//!     println!("{} bytes", data.len());
//!     data.len()
//! };
//! while conn.recv(&mut parser).unwrap() {}
//! conn.close().unwrap();
//! ```

pub mod plain;
pub mod session;

pub use plain::PlainSession;
pub use session::{Route, SessionOps};

use crate::net::{self, ServerEndpoint, Timeouts};
use crate::tls::{AlpnPolicy, Credentials, TlsConfig, TlsError, TlsSession};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Size of the per-connection receive buffer
pub const RECV_BUFFER_SIZE: usize = 1000;

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Dispatch errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("Network error: {0}")]
    Network(#[from] net::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Parser consumed {consumed} of {remaining} buffered bytes")]
    ParserStalled { consumed: usize, remaining: usize },

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Connection already closed")]
    Closed,
}

/// URI scheme of a connection request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
    Ws,
    Wss,
}

impl Scheme {
    /// Whether the scheme runs over TLS
    pub fn is_secure(&self) -> bool {
        matches!(self, Scheme::Https | Scheme::Wss)
    }

    /// Port used when the URI does not name one
    pub fn default_port(&self) -> u16 {
        if self.is_secure() {
            443
        } else {
            80
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            "ws" => Ok(Scheme::Ws),
            "wss" => Ok(Scheme::Wss),
            _ => Err(Error::UnsupportedScheme(s.to_string())),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for opening a client connection
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Credentials for secure schemes; ignored for plain ones
    pub credentials: Credentials,
    pub timeouts: Timeouts,
    pub handshake_timeout: Duration,
    pub alpn_policy: AlpnPolicy,
}

impl ClientOptions {
    pub fn new(credentials: Credentials) -> Self {
        ClientOptions {
            credentials,
            ..Default::default()
        }
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn alpn_policy(mut self, policy: AlpnPolicy) -> Self {
        self.alpn_policy = policy;
        self
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            credentials: Credentials::new(),
            timeouts: Timeouts::default(),
            handshake_timeout: Duration::from_secs(crate::tls::handshake::DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            alpn_policy: AlpnPolicy::default(),
        }
    }
}

/// Incremental protocol parser fed by [`Connection::recv`].
///
/// `parse` returns how many bytes of `data` it consumed.
pub trait StreamParser {
    fn parse(&mut self, data: &[u8]) -> usize;
}

impl<F: FnMut(&[u8]) -> usize> StreamParser for F {
    fn parse(&mut self, data: &[u8]) -> usize {
        self(data)
    }
}

/// Open a connection to `host:port`, over TLS if `scheme` is secure.
///
/// Credentials are only parsed on the secure route, and before any socket
/// is opened.
pub fn open_client(scheme: Scheme, host: &str, port: u16, options: &ClientOptions) -> Result<Connection> {
    let endpoint = ServerEndpoint::new(host, port)?;

    let ops: Box<dyn SessionOps + Send> = if scheme.is_secure() {
        let config = TlsConfig::client(&options.credentials)
            .timeouts(options.timeouts)
            .handshake_timeout(options.handshake_timeout)
            .alpn_policy(options.alpn_policy)
            .build()?;
        Box::new(TlsSession::connect(&config, &endpoint)?)
    } else {
        Box::new(PlainSession::connect(&endpoint, &options.timeouts)?)
    };

    info!(%scheme, host, port, "connection opened");
    Ok(Connection::new(scheme, ops))
}

/// An open client connection
pub struct Connection {
    scheme: Scheme,
    ops: Box<dyn SessionOps + Send>,
    buffer: Box<[u8]>,
    closed: bool,
}

impl Connection {
    /// Wrap an already opened session
    pub fn new(scheme: Scheme, ops: Box<dyn SessionOps + Send>) -> Self {
        Connection {
            scheme,
            ops,
            buffer: vec![0u8; RECV_BUFFER_SIZE].into_boxed_slice(),
            closed: false,
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn route(&self) -> Route {
        self.ops.route()
    }

    pub fn is_open(&self) -> bool {
        !self.closed
    }

    /// Write `data`, returning the number of bytes written
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.ops.write(data)
    }

    /// Read once and feed everything received to `parser`.
    ///
    /// Returns whether any bytes arrived. Zero bytes is not treated as a
    /// dead connection; that decision is left to the caller.
    pub fn recv<P: StreamParser + ?Sized>(&mut self, parser: &mut P) -> Result<bool> {
        if self.closed {
            return Err(Error::Closed);
        }

        let received = self.ops.read(&mut self.buffer)?;
        let mut pos = 0;
        while pos < received {
            let remaining = received - pos;
            let consumed = parser.parse(&self.buffer[pos..received]);
            if consumed == 0 || consumed > remaining {
                warn!(consumed, remaining, "parser made no progress");
                return Err(Error::ParserStalled { consumed, remaining });
            }
            pos += consumed;
        }

        if received > 0 {
            debug!(received, "bytes delivered to parser");
        }
        Ok(received > 0)
    }

    /// Close the connection; repeated calls are no-ops
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.ops.close()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("scheme", &self.scheme)
            .field("route", &self.route())
            .field("closed", &self.closed)
            .finish()
    }
}
