//! halow-transport - secured byte-stream transport for HaLow modem clients
//!
//! This crate provides the transport layer that MQTT, HTTPS and WebSocket
//! clients on the modem run over. It has three layers:
//!
//! - [`net`]: blocking TCP connect with classified failures, and the
//!   [`net::Transport`] trait the TLS engine runs on top of
//! - [`tls`]: the TLS session engine (credential loading, handshake,
//!   record send/receive, close-notify and teardown)
//! - [`dispatch`]: a per-connection router that picks plain or TLS I/O
//!   from the URI scheme and feeds received bytes to a protocol parser

pub mod dispatch;
pub mod net;
pub mod tls;
