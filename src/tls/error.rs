//! TLS error types

use super::verify::VerifyFlags;

/// Broad failure classes, used by callers to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or inconsistent parameter; never retried
    Configuration,
    /// RNG or credential parsing failure; retry with a fresh session only
    Resource,
    /// Socket creation, host resolution or TCP connect failure
    Network,
    /// Handshake or peer verification failure
    Handshake,
    /// Steady-state send/receive failure; the connection is broken
    Io,
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("RNG seeding failed: {0}")]
    RngSeed(openssl::error::ErrorStack),

    #[error("Failed to parse root CA certificate: {0}")]
    RootCertParse(String),

    #[error("Failed to parse client certificate: {0}")]
    ClientCertParse(String),

    #[error("Failed to parse private key: {0}")]
    PrivateKeyParse(String),

    #[error("Client certificate and key rejected: {0}")]
    OwnCertConfig(String),

    #[error("Network error: {0}")]
    Network(#[from] crate::net::Error),

    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("TLS setup failed: {0}")]
    Setup(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The server certificate was rejected during the handshake
    #[error("Server certificate verification failed: {0}")]
    CertVerifyFailed(VerifyFlags),

    #[error("Handshake did not complete before the deadline")]
    HandshakeTimeout,

    /// The handshake completed but left verification flags behind while
    /// verification was required.
    ///
    /// OpenSSL normally aborts the handshake itself in that situation, which
    /// surfaces as `CertVerifyFailed`. Match both with
    /// [`TlsError::is_verification_failure`].
    #[error("Peer verification failed after handshake: {0}")]
    PeerVerificationFailed(VerifyFlags),

    #[error("Session is not established")]
    NotEstablished,

    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    #[error("Send stalled after {sent} bytes")]
    SendTimeout { sent: usize },

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Peer closed the connection")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TlsError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            TlsError::InvalidParameter(_) | TlsError::NotEstablished => ErrorKind::Configuration,
            TlsError::RngSeed(_)
            | TlsError::RootCertParse(_)
            | TlsError::ClientCertParse(_)
            | TlsError::PrivateKeyParse(_)
            | TlsError::OwnCertConfig(_) => ErrorKind::Resource,
            TlsError::Network(_) => ErrorKind::Network,
            TlsError::OpenSsl(_)
            | TlsError::Setup(_)
            | TlsError::Handshake(_)
            | TlsError::CertVerifyFailed(_)
            | TlsError::HandshakeTimeout
            | TlsError::PeerVerificationFailed(_) => ErrorKind::Handshake,
            TlsError::ConnectionReset(_)
            | TlsError::SendTimeout { .. }
            | TlsError::ReceiveFailed(_)
            | TlsError::ConnectionClosed
            | TlsError::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether the peer certificate was rejected, during or after the handshake
    pub fn is_verification_failure(&self) -> bool {
        self.verify_flags().is_some()
    }

    /// Verification bitmask carried by a verification failure
    pub fn verify_flags(&self) -> Option<VerifyFlags> {
        match self {
            TlsError::CertVerifyFailed(flags) | TlsError::PeerVerificationFailed(flags) => {
                Some(*flags)
            }
            _ => None,
        }
    }
}
