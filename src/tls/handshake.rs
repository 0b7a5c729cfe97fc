//! TLS handshake driver
//!
//! Steps the OpenSSL client handshake to completion. Would-block results
//! are retried after waiting for the transport to become ready; everything
//! else is fatal. The loop is bounded by an explicit deadline so a silent
//! or misbehaving peer cannot hold the caller forever.

use super::error::TlsError;
use super::verify::{VerifyFlags, VerifyRecorder};
use crate::net::{PollEvents, Transport};
use openssl::ssl::{ErrorCode, HandshakeError, MidHandshakeSslStream, Ssl, SslStream};
use std::time::Instant;
use tracing::{debug, error};

/// Default handshake timeout
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Run the client handshake on `stream` until it completes, fails or the
/// deadline passes.
pub(crate) fn drive<S: Transport>(
    ssl: Ssl,
    stream: S,
    deadline: Instant,
    recorder: &VerifyRecorder,
    enforce_verification: bool,
) -> Result<SslStream<S>, TlsError> {
    // Reads inside a handshake step block for the socket's read timeout,
    // so it must never outlast the deadline
    bound_reads(&stream, deadline)?;
    let mut attempt = ssl.connect(stream);
    let mut rounds = 0u32;

    loop {
        match attempt {
            Ok(stream) => {
                debug!(rounds, "handshake complete");
                return Ok(stream);
            }
            Err(HandshakeError::SetupFailure(stack)) => {
                error!(error = %stack, "TLS setup failed");
                return Err(TlsError::Setup(stack.to_string()));
            }
            Err(HandshakeError::Failure(mid)) => {
                return Err(classify_failure(&mid, recorder, enforce_verification));
            }
            Err(HandshakeError::WouldBlock(mid)) => {
                let now = Instant::now();
                if now >= deadline {
                    error!(rounds, "handshake timed out");
                    return Err(TlsError::HandshakeTimeout);
                }

                let events = match mid.error().code() {
                    ErrorCode::WANT_WRITE => PollEvents::Write,
                    _ => PollEvents::Read,
                };
                mid.get_ref().poll(events, Some(deadline - now))?;
                bound_reads(mid.get_ref(), deadline)?;

                rounds += 1;
                attempt = mid.handshake();
            }
        }
    }
}

/// Cap the transport's read timeout at the time left before `deadline`
fn bound_reads<S: Transport>(stream: &S, deadline: Instant) -> Result<(), TlsError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        error!("handshake timed out");
        return Err(TlsError::HandshakeTimeout);
    }
    stream.set_recv_timeout(Some(remaining))?;
    Ok(())
}

fn classify_failure<S>(
    mid: &MidHandshakeSslStream<S>,
    recorder: &VerifyRecorder,
    enforce_verification: bool,
) -> TlsError {
    let result = mid.ssl().verify_result();
    let flags = recorder.flags() | VerifyFlags::from_verify_result(result);

    if enforce_verification && result.as_raw() != 0 {
        error!(
            error = %mid.error(),
            %flags,
            "unable to verify the server's certificate; either it is invalid or the \
             root CA does not match. Disable server verification only for testing"
        );
        return TlsError::CertVerifyFailed(flags);
    }

    error!(error = %mid.error(), "handshake failed");
    TlsError::Handshake(mid.error().to_string())
}
