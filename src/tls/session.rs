//! TLS session engine
//!
//! A `TlsSession` owns one established TLS connection: the transport, the
//! OpenSSL record state, and the diagnostics captured at handshake time.
//! Resources are released by `disconnect()` or on drop, whichever comes
//! first; a failed `connect()` releases everything it acquired.

use super::config::TlsConfig;
use super::error::TlsError;
use super::handshake;
use super::info::SessionInfo;
use super::verify::{self, VerifyFlags, VerifyRecorder};
use crate::net::{self, nonzero, PollEvents, ServerEndpoint, Timeouts, Transport};
use openssl::ssl::{ErrorCode, Ssl, SslStream, SslVerifyMode};
use std::io;
use std::mem;
use std::net::{IpAddr, TcpStream};
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Maximum plaintext carried by one TLS record
pub const MAX_RECORD_PLAINTEXT: usize = 16 * 1024;

/// Close-notify attempts before the socket is closed without it
pub const CLOSE_NOTIFY_ATTEMPTS: u32 = 8;

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake complete; records may be sent and received
    Established,
    /// A fatal send/receive error occurred; only teardown is possible
    Failed,
    /// All resources released
    TornDown,
}

enum State<S> {
    Established(SslStream<S>),
    Failed(SslStream<S>),
    TornDown,
}

/// One TLS connection over a transport `S`
pub struct TlsSession<S: Transport> {
    state: State<S>,
    info: SessionInfo,
    timeouts: Timeouts,
}

impl TlsSession<TcpStream> {
    /// Open a TCP connection to `endpoint` and run the TLS handshake on it
    pub fn connect(config: &TlsConfig, endpoint: &ServerEndpoint<'_>) -> Result<Self, TlsError> {
        debug!(host = endpoint.host(), port = endpoint.port(), "connecting");
        let stream = net::connect(endpoint, &config.timeouts)?;
        Self::establish(stream, config, endpoint)
    }
}

impl<S: Transport> TlsSession<S> {
    /// Run the TLS handshake over an already connected transport.
    ///
    /// On error the transport is dropped (and so closed) before returning.
    pub fn establish(stream: S, config: &TlsConfig, endpoint: &ServerEndpoint<'_>) -> Result<Self, TlsError> {
        let host = endpoint.host();

        let mut ssl = Ssl::new(&config.ctx)?;

        let recorder = VerifyRecorder::default();
        ssl.set_verify_callback(SslVerifyMode::PEER, recorder.callback(config.verify_server));

        if config.offers_alpn(endpoint.port()) {
            debug!(port = endpoint.port(), "offering ALPN");
            ssl.set_alpn_protos(&config.alpn_wire)?;
        }

        // SNI only carries DNS names; IP literals are verified against IP SANs
        match host.parse::<IpAddr>() {
            Ok(ip) => ssl.param_mut().set_ip(ip)?,
            Err(_) => {
                ssl.set_hostname(host)?;
                ssl.param_mut().set_host(host)?;
            }
        }

        debug!(host, "performing the TLS handshake");
        let deadline = Instant::now() + config.handshake_timeout;
        let stream = handshake::drive(ssl, stream, deadline, &recorder, config.verify_server)?;

        let flags = recorder.flags() | VerifyFlags::from_verify_result(stream.ssl().verify_result());
        let info = SessionInfo::from_ssl(stream.ssl(), flags);
        info!(
            version = %info.version,
            cipher = %info.cipher,
            alpn = ?info.alpn,
            "TLS session established"
        );

        verify::enforce(config.verify_server, flags)?;

        // The handshake narrowed the read timeout to its deadline
        stream.get_ref().set_recv_timeout(nonzero(config.timeouts.recv))?;

        Ok(TlsSession {
            state: State::Established(stream),
            info,
            timeouts: config.timeouts,
        })
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        match self.state {
            State::Established(_) => SessionState::Established,
            State::Failed(_) => SessionState::Failed,
            State::TornDown => SessionState::TornDown,
        }
    }

    /// Parameters negotiated during the handshake
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Verification failures recorded during the handshake
    pub fn verify_flags(&self) -> VerifyFlags {
        self.info.verify_flags
    }

    /// Get reference to the underlying transport, if not torn down
    pub fn get_ref(&self) -> Option<&S> {
        match &self.state {
            State::Established(stream) | State::Failed(stream) => Some(stream.get_ref()),
            State::TornDown => None,
        }
    }

    /// Write all of `buf` as TLS records.
    ///
    /// Would-block results are retried; the call only fails with
    /// `SendTimeout` if no progress is made for the send timeout. Any other
    /// error means the connection needs to be reset and moves the session
    /// to `Failed`.
    pub fn send(&mut self, buf: &[u8]) -> Result<usize, TlsError> {
        let stall_limit = self.timeouts.send;
        let stream = match &mut self.state {
            State::Established(stream) => stream,
            _ => return Err(TlsError::NotEstablished),
        };

        let result = write_records(stream, buf, stall_limit);
        if result.is_err() {
            self.mark_failed();
        }
        result
    }

    /// Single read attempt.
    ///
    /// `Ok(0)` means no data arrived before the receive timeout; call again
    /// later. An error means the connection is broken.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TlsError> {
        let stream = match &mut self.state {
            State::Established(stream) => stream,
            _ => return Err(TlsError::NotEstablished),
        };
        if buf.is_empty() {
            return Ok(0);
        }

        let err = match stream.ssl_read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if is_would_block(&e) => {
                trace!("no data before receive timeout");
                return Ok(0);
            }
            Err(e) => e,
        };

        self.mark_failed();
        if err.code() == ErrorCode::ZERO_RETURN {
            info!("peer sent close-notify");
            Err(TlsError::ConnectionClosed)
        } else {
            error!(error = %err, "TLS read failed");
            Err(TlsError::ReceiveFailed(err.to_string()))
        }
    }

    /// Send close-notify and release the connection.
    ///
    /// Safe to call any number of times; later calls do nothing.
    pub fn disconnect(&mut self) {
        match mem::replace(&mut self.state, State::TornDown) {
            State::Established(mut stream) => {
                send_close_notify(&mut stream, self.timeouts.send);
                close_transport(stream);
            }
            State::Failed(stream) => close_transport(stream),
            State::TornDown => trace!("session already torn down"),
        }
    }

    fn mark_failed(&mut self) {
        if let State::Established(stream) = mem::replace(&mut self.state, State::TornDown) {
            self.state = State::Failed(stream);
        }
    }
}

impl<S: Transport> Drop for TlsSession<S> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl<S: Transport> std::fmt::Debug for TlsSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSession")
            .field("state", &self.state())
            .field("info", &self.info)
            .finish()
    }
}

fn write_records<S: Transport>(
    stream: &mut SslStream<S>,
    buf: &[u8],
    stall_limit: std::time::Duration,
) -> Result<usize, TlsError> {
    let mut sent = 0;
    let mut retries = 0u32;
    let mut last_progress = Instant::now();

    while sent < buf.len() {
        let end = (sent + MAX_RECORD_PLAINTEXT).min(buf.len());
        match stream.ssl_write(&buf[sent..end]) {
            Ok(n) if n > 0 => {
                sent += n;
                last_progress = Instant::now();
            }
            Ok(_) => retries += 1,
            Err(e) if is_would_block(&e) => {
                retries += 1;
                let stalled = last_progress.elapsed();
                if !stall_limit.is_zero() && stalled >= stall_limit {
                    error!(sent, retries, "TLS write stalled");
                    return Err(TlsError::SendTimeout { sent });
                }
                let events = match e.code() {
                    ErrorCode::WANT_READ => PollEvents::Read,
                    _ => PollEvents::Write,
                };
                let remaining = nonzero(stall_limit.saturating_sub(stalled));
                stream.get_ref().poll(events, remaining)?;
            }
            Err(e) => {
                // The caller's keep-alive logic handles the reconnect
                error!(error = %e, sent, "TLS write failed; connection needs reset");
                return Err(TlsError::ConnectionReset(e.to_string()));
            }
        }
    }

    if retries > 0 {
        debug!(sent, retries, "send completed after retries");
    }
    Ok(sent)
}

fn send_close_notify<S: Transport>(stream: &mut SslStream<S>, limit: std::time::Duration) {
    let deadline = Instant::now() + limit;
    for attempt in 1..=CLOSE_NOTIFY_ATTEMPTS {
        match stream.shutdown() {
            Ok(_) => {
                debug!(attempt, "close-notify sent");
                return;
            }
            Err(e) if is_would_block(&e) => {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                if let Err(e) = stream.get_ref().poll(PollEvents::Write, Some(deadline - now)) {
                    debug!(error = %e, "poll failed during close-notify");
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "close-notify failed; forcing close");
                return;
            }
        }
    }
    warn!("close-notify not flushed; forcing socket close");
}

fn close_transport<S: Transport>(stream: SslStream<S>) {
    if let Err(e) = stream.get_ref().close() {
        debug!(error = %e, "transport shutdown failed");
    }
    debug!("session torn down");
}

/// Would-block or timeout: not an error, try again later
fn is_would_block(e: &openssl::ssl::Error) -> bool {
    match e.code() {
        ErrorCode::WANT_READ | ErrorCode::WANT_WRITE => true,
        ErrorCode::SYSCALL => e.io_error().is_some_and(|io| {
            matches!(
                io.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
            )
        }),
        _ => false,
    }
}
