//! Negotiated session parameters
//!
//! Captured once the handshake completes and kept on the session for
//! diagnostics.

use super::cert::{peer_chain, CertInfo};
use super::verify::VerifyFlags;
use openssl::ssl::{NameType, SslRef};

/// Session parameters available after the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Negotiated TLS version (e.g., "TLSv1.3")
    pub version: String,

    /// Negotiated cipher suite
    pub cipher: String,

    /// SNI server name sent in the ClientHello
    pub servername: Option<String>,

    /// ALPN protocol selected by the server
    pub alpn: Option<String>,

    /// Peer certificate chain (index 0 is the leaf)
    pub peer_chain: Vec<CertInfo>,

    /// Verification failures recorded during the handshake
    pub verify_flags: VerifyFlags,
}

impl SessionInfo {
    pub(crate) fn from_ssl(ssl: &SslRef, verify_flags: VerifyFlags) -> Self {
        SessionInfo {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| "<undef>".to_string()),
            servername: ssl.servername(NameType::HOST_NAME).map(|s| s.to_string()),
            alpn: ssl
                .selected_alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
            peer_chain: peer_chain(ssl),
            verify_flags,
        }
    }

    /// Leaf certificate presented by the peer
    pub fn peer_certificate(&self) -> Option<&CertInfo> {
        self.peer_chain.first()
    }
}

impl Default for SessionInfo {
    fn default() -> Self {
        SessionInfo {
            version: "<undef>".to_string(),
            cipher: "<undef>".to_string(),
            servername: None,
            alpn: None,
            peer_chain: Vec::new(),
            verify_flags: VerifyFlags::empty(),
        }
    }
}
