//! Connection credentials
//!
//! PEM-encoded trust anchors and client identity, plus the ALPN list and
//! the server-verification switch. The engine only ever borrows these.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// Credentials for one TLS connection
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Trusted root CA chain (PEM, one or more certificates)
    pub root_ca: Option<String>,
    /// Client certificate (PEM)
    pub client_cert: Option<String>,
    /// Client private key (PEM, unencrypted)
    pub private_key: Option<String>,
    /// ALPN protocols to offer, in preference order
    pub alpn_protocols: Vec<String>,
    /// Fail the connection if the server certificate does not verify
    pub server_verification: bool,
}

impl Credentials {
    /// Empty credentials with server verification enabled
    pub fn new() -> Self {
        Credentials {
            server_verification: true,
            ..Default::default()
        }
    }

    /// Set the trusted root CA chain
    pub fn root_ca(mut self, pem: impl Into<String>) -> Self {
        self.root_ca = Some(pem.into());
        self
    }

    /// Set the client certificate and its private key
    pub fn client_identity(mut self, cert_pem: impl Into<String>, key_pem: impl Into<String>) -> Self {
        self.client_cert = Some(cert_pem.into());
        self.private_key = Some(key_pem.into());
        self
    }

    /// Set the ALPN protocol list
    pub fn alpn(mut self, protocols: &[&str]) -> Self {
        self.alpn_protocols = protocols.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Enable/disable server certificate verification
    pub fn server_verification(mut self, verify: bool) -> Self {
        self.server_verification = verify;
        self
    }

    /// Load the root CA, client certificate and private key from PEM files
    pub fn from_pem_files<P: AsRef<Path>>(root_ca: P, client_cert: P, private_key: P) -> io::Result<Self> {
        Ok(Credentials::new()
            .root_ca(fs::read_to_string(root_ca)?)
            .client_identity(fs::read_to_string(client_cert)?, fs::read_to_string(private_key)?))
    }

    /// Whether a client certificate or key was supplied
    pub fn has_client_identity(&self) -> bool {
        self.client_cert.is_some() || self.private_key.is_some()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("root_ca", &self.root_ca.as_ref().map(|pem| pem.len()))
            .field("client_cert", &self.client_cert.as_ref().map(|pem| pem.len()))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("alpn_protocols", &self.alpn_protocols)
            .field("server_verification", &self.server_verification)
            .finish()
    }
}
