//! TLS session engine
//!
//! This module secures a TCP connection for MQTT, HTTPS and WebSocket
//! clients on the modem. It runs the client side of a TLS 1.2/1.3
//! connection over OpenSSL and exposes a byte-stream send/receive contract
//! suited to an event-driven main loop.
//!
//! # Architecture
//!
//! 1. `Credentials` carry the PEM trust anchors, the optional client
//!    identity, the ALPN list and the server-verification switch
//! 2. `TlsConfig::client(..).build()` parses all of it up front, so a bad
//!    credential never costs a network round trip
//! 3. `TlsSession::connect` opens the socket, runs the handshake with a
//!    deadline, and enforces the verification result
//! 4. `send` retries partial and would-block writes; `receive` is a single
//!    attempt where `Ok(0)` means "no data yet"
//! 5. `disconnect` (or drop) sends close-notify with a bounded number of
//!    retries and releases everything
//!
//! # Example
//!
//! ```no_run
//! use halow_transport::net::ServerEndpoint;
//! use halow_transport::tls::{Credentials, TlsConfig, TlsSession};
//!
//! let credentials = Credentials::new()
//!     .root_ca(std::fs::read_to_string("root-ca.pem").unwrap())
//!     .alpn(&["x-amzn-mqtt-ca"]);
//! let config = TlsConfig::client(&credentials).build().unwrap();
//!
//! let endpoint = ServerEndpoint::new("broker.example.com", 443).unwrap();
//! let mut session = TlsSession::connect(&config, &endpoint).unwrap();
//! session.send(b"\x10\x0c\x00\x04MQTT\x04\x02\x00\x3c").unwrap();
//!
//! let mut buf = [0u8; 256];
//! let n = session.receive(&mut buf).unwrap();
//! # let _ = n;
//! session.disconnect();
//! ```

pub mod cert;
pub mod config;
pub mod credentials;
pub mod error;
pub mod handshake;
pub mod info;
pub mod session;
pub mod verify;

pub use cert::CertInfo;
pub use config::{AlpnPolicy, ClientConfigBuilder, TlsConfig, TlsVersion, HTTPS_PORT};
pub use credentials::Credentials;
pub use error::{ErrorKind, TlsError};
pub use info::SessionInfo;
pub use session::{SessionState, TlsSession};
pub use verify::VerifyFlags;

use crate::net::{ServerEndpoint, Timeouts};
use std::net::TcpStream;
use std::time::Duration;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;

/// Connect to `endpoint` with `credentials` and the given socket timeouts,
/// using defaults for everything else.
pub fn connect(
    endpoint: &ServerEndpoint<'_>,
    credentials: &Credentials,
    send_timeout: Duration,
    recv_timeout: Duration,
) -> Result<TlsSession<TcpStream>> {
    let timeouts = Timeouts {
        send: send_timeout,
        recv: recv_timeout,
        ..Timeouts::default()
    };
    let config = TlsConfig::client(credentials).timeouts(timeouts).build()?;
    TlsSession::connect(&config, endpoint)
}
