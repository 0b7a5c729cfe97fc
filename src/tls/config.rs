//! TLS client configuration
//!
//! `ClientConfigBuilder::build` performs every step of session setup that
//! does not need the network: RNG check, trust store and client identity
//! parsing, and the key/certificate pairing check. A malformed credential
//! therefore fails before any socket is opened.

use super::credentials::Credentials;
use super::error::TlsError;
use super::handshake::DEFAULT_HANDSHAKE_TIMEOUT_SECS;
use crate::net::Timeouts;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{SslContext, SslContextBuilder, SslMethod, SslMode, SslVerifyMode};
use openssl::x509::X509;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error};

/// Well-known HTTPS port; ALPN is offered here by default
pub const HTTPS_PORT: u16 = 443;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Parse TLS version from string (case-insensitive)
    pub fn parse(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidParameter(format!("unsupported TLS version: {}", s))),
        }
    }

    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

/// When the ALPN protocol list is offered to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlpnPolicy {
    /// Only when connecting to port 443 (MQTT over 443 needs ALPN to be routed)
    #[default]
    HttpsPortOnly,
    /// On every connection
    Always,
}

/// TLS client configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: SslContext,
    pub(crate) verify_server: bool,
    pub(crate) alpn_wire: Vec<u8>,
    pub(crate) alpn_policy: AlpnPolicy,
    pub(crate) timeouts: Timeouts,
    pub(crate) handshake_timeout: Duration,
}

impl TlsConfig {
    /// Create a client configuration builder over `credentials`
    pub fn client(credentials: &Credentials) -> ClientConfigBuilder<'_> {
        ClientConfigBuilder::new(credentials)
    }

    /// Whether ALPN is offered when connecting to `port`
    pub fn offers_alpn(&self, port: u16) -> bool {
        if self.alpn_wire.is_empty() {
            return false;
        }
        match self.alpn_policy {
            AlpnPolicy::Always => true,
            AlpnPolicy::HttpsPortOnly => port == HTTPS_PORT,
        }
    }

    pub fn verify_server(&self) -> bool {
        self.verify_server
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("verify_server", &self.verify_server)
            .field("alpn_wire", &self.alpn_wire)
            .field("alpn_policy", &self.alpn_policy)
            .field("timeouts", &self.timeouts)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

/// Client configuration builder
#[derive(Debug)]
pub struct ClientConfigBuilder<'a> {
    credentials: &'a Credentials,
    min_version: TlsVersion,
    max_version: TlsVersion,
    cipher_list: Option<String>,
    alpn_policy: AlpnPolicy,
    timeouts: Timeouts,
    handshake_timeout: Duration,
}

impl<'a> ClientConfigBuilder<'a> {
    fn new(credentials: &'a Credentials) -> Self {
        ClientConfigBuilder {
            credentials,
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
            cipher_list: None,
            alpn_policy: AlpnPolicy::default(),
            timeouts: Timeouts::default(),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
        }
    }

    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.min_version = min;
        self.max_version = max;
        self
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: impl Into<String>) -> Self {
        self.cipher_list = Some(ciphers.into());
        self
    }

    /// Set when ALPN is offered
    pub fn alpn_policy(mut self, policy: AlpnPolicy) -> Self {
        self.alpn_policy = policy;
        self
    }

    /// Set socket timeouts
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the deadline for the whole handshake
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        let creds = self.credentials;

        if self.min_version > self.max_version {
            return Err(TlsError::InvalidParameter(format!(
                "empty version range {}..{}",
                self.min_version.as_str(),
                self.max_version.as_str()
            )));
        }
        if creds.server_verification && creds.root_ca.is_none() {
            error!("server verification requested without a root CA");
            return Err(TlsError::InvalidParameter(
                "server verification requires a root CA".to_string(),
            ));
        }
        if creds.client_cert.is_some() != creds.private_key.is_some() {
            error!("client certificate and private key must be supplied together");
            return Err(TlsError::InvalidParameter(
                "client certificate and private key must be supplied together".to_string(),
            ));
        }
        let alpn_wire = encode_alpn(&creds.alpn_protocols)?;

        debug!("seeding the random number generator");
        seed_rng()?;

        let trust_store = match creds.root_ca.as_deref() {
            Some(pem) => {
                debug!("loading the CA root certificate");
                parse_root_ca(pem)?
            }
            None => Vec::new(),
        };

        let identity = match (creds.client_cert.as_deref(), creds.private_key.as_deref()) {
            (Some(cert_pem), Some(key_pem)) => {
                debug!("loading the client certificate and key");
                Some((parse_client_cert(cert_pem)?, parse_private_key(key_pem)?))
            }
            _ => None,
        };

        debug!("setting up the TLS structure");
        let mut ctx = SslContextBuilder::new(SslMethod::tls_client())?;
        ctx.set_min_proto_version(Some(self.min_version.to_openssl_version()))?;
        ctx.set_max_proto_version(Some(self.max_version.to_openssl_version()))?;
        ctx.set_mode(SslMode::ENABLE_PARTIAL_WRITE | SslMode::ACCEPT_MOVING_WRITE_BUFFER);
        ctx.set_verify(SslVerifyMode::PEER);

        if let Some(ciphers) = &self.cipher_list {
            ctx.set_cipher_list(ciphers)?;
        }

        for cert in trust_store {
            ctx.cert_store_mut()
                .add_cert(cert)
                .map_err(|e| TlsError::RootCertParse(e.to_string()))?;
        }

        if let Some((cert, key)) = &identity {
            install_identity(&mut ctx, cert, key)?;
        }

        Ok(TlsConfig {
            ctx: ctx.build(),
            verify_server: creds.server_verification,
            alpn_wire,
            alpn_policy: self.alpn_policy,
            timeouts: self.timeouts,
            handshake_timeout: self.handshake_timeout,
        })
    }
}

/// Confirm the DRBG is seeded and producing output.
///
/// OpenSSL seeds its generator from the OS entropy source on first use;
/// drawing a probe surfaces a seeding failure here instead of mid-handshake.
fn seed_rng() -> Result<(), TlsError> {
    let mut probe = [0u8; 16];
    openssl::rand::rand_bytes(&mut probe).map_err(|e| {
        error!(error = %e, "RNG seeding failed");
        TlsError::RngSeed(e)
    })
}

fn parse_root_ca(pem: &str) -> Result<Vec<X509>, TlsError> {
    let chain = X509::stack_from_pem(pem.as_bytes()).map_err(|e| {
        error!(error = %e, "failed to parse root CA certificate");
        TlsError::RootCertParse(e.to_string())
    })?;

    if chain.is_empty() {
        error!("root CA PEM contains no certificates");
        return Err(TlsError::RootCertParse("no certificates found".to_string()));
    }
    debug!(count = chain.len(), "root CA chain loaded");
    Ok(chain)
}

fn parse_client_cert(pem: &str) -> Result<X509, TlsError> {
    X509::from_pem(pem.as_bytes()).map_err(|e| {
        error!(error = %e, "failed to parse client certificate");
        TlsError::ClientCertParse(e.to_string())
    })
}

fn parse_private_key(pem: &str) -> Result<PKey<Private>, TlsError> {
    // Never log the key material itself
    PKey::private_key_from_pem(pem.as_bytes()).map_err(|e| {
        error!(error = %e, "failed to parse private key");
        TlsError::PrivateKeyParse(e.to_string())
    })
}

fn install_identity(
    ctx: &mut SslContextBuilder,
    cert: &X509,
    key: &PKey<Private>,
) -> Result<(), TlsError> {
    let rejected = |e: openssl::error::ErrorStack| {
        error!(error = %e, "client certificate and key rejected");
        TlsError::OwnCertConfig(e.to_string())
    };

    ctx.set_certificate(cert).map_err(rejected)?;
    ctx.set_private_key(key).map_err(rejected)?;
    ctx.check_private_key().map_err(rejected)
}

/// Encode ALPN protocols (length-prefixed)
fn encode_alpn(protocols: &[String]) -> Result<Vec<u8>, TlsError> {
    let mut alpn_bytes = Vec::new();
    for proto in protocols {
        if proto.is_empty() || proto.len() > u8::MAX as usize {
            return Err(TlsError::InvalidParameter(format!(
                "ALPN protocol name must be 1..=255 bytes: {:?}",
                proto
            )));
        }
        alpn_bytes.push(proto.len() as u8);
        alpn_bytes.extend_from_slice(proto.as_bytes());
    }
    Ok(alpn_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::x509::{X509Builder, X509NameBuilder};

    struct Identity {
        cert_pem: String,
        key_pem: String,
    }

    fn identity(cn: &str) -> Identity {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        builder.set_not_after(&Asn1Time::days_from_now(30).unwrap()).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        Identity {
            cert_pem: String::from_utf8(builder.build().to_pem().unwrap()).unwrap(),
            key_pem: String::from_utf8(key.private_key_to_pem_pkcs8().unwrap()).unwrap(),
        }
    }

    #[test]
    fn test_tls_version_parsing() {
        assert_eq!(TlsVersion::parse("TLSv1.2").unwrap(), TlsVersion::Tls12);
        assert_eq!(TlsVersion::parse("tlsv1.3").unwrap(), TlsVersion::Tls13);
        assert!(TlsVersion::parse("SSLv3").is_err());
        assert!(TlsVersion::Tls12 < TlsVersion::Tls13);
    }

    #[test]
    fn test_encode_alpn() {
        let wire = encode_alpn(&["h2".to_string(), "http/1.1".to_string()]).unwrap();
        assert_eq!(wire, b"\x02h2\x08http/1.1");
        assert!(encode_alpn(&[]).unwrap().is_empty());
        assert!(encode_alpn(&[String::new()]).is_err());
        assert!(encode_alpn(&["x".repeat(256)]).is_err());
    }

    #[test]
    fn test_server_auth_only_config() {
        let ca = identity("Test Root");
        let creds = Credentials::new().root_ca(ca.cert_pem);
        let config = TlsConfig::client(&creds).build().unwrap();

        assert!(config.verify_server());
        assert!(!config.offers_alpn(HTTPS_PORT));
    }

    #[test]
    fn test_mutual_auth_config() {
        let ca = identity("Test Root");
        let device = identity("device-01");
        let creds = Credentials::new()
            .root_ca(ca.cert_pem)
            .client_identity(device.cert_pem, device.key_pem);

        assert!(TlsConfig::client(&creds).build().is_ok());
    }

    #[test]
    fn test_verification_requires_root_ca() {
        let creds = Credentials::new();
        let err = TlsConfig::client(&creds).build().unwrap_err();
        assert!(matches!(err, TlsError::InvalidParameter(_)));
    }

    #[test]
    fn test_no_verification_without_root_ca() {
        let creds = Credentials::new().server_verification(false);
        assert!(TlsConfig::client(&creds).build().is_ok());
    }

    #[test]
    fn test_malformed_root_ca() {
        let creds = Credentials::new().root_ca("not a certificate");
        let err = TlsConfig::client(&creds).build().unwrap_err();
        assert!(matches!(err, TlsError::RootCertParse(_)));
    }

    #[test]
    fn test_corrupt_root_ca_body() {
        let pem = "-----BEGIN CERTIFICATE-----\nMIIB!!!!\n-----END CERTIFICATE-----\n";
        let creds = Credentials::new().root_ca(pem);
        let err = TlsConfig::client(&creds).build().unwrap_err();
        assert!(matches!(err, TlsError::RootCertParse(_)));
    }

    #[test]
    fn test_malformed_client_cert() {
        let ca = identity("Test Root");
        let device = identity("device-01");
        let creds = Credentials::new()
            .root_ca(ca.cert_pem)
            .client_identity("garbage", device.key_pem);

        let err = TlsConfig::client(&creds).build().unwrap_err();
        assert!(matches!(err, TlsError::ClientCertParse(_)));
    }

    #[test]
    fn test_malformed_private_key() {
        let ca = identity("Test Root");
        let device = identity("device-01");
        let creds = Credentials::new()
            .root_ca(ca.cert_pem)
            .client_identity(device.cert_pem, "garbage");

        let err = TlsConfig::client(&creds).build().unwrap_err();
        assert!(matches!(err, TlsError::PrivateKeyParse(_)));
    }

    #[test]
    fn test_mismatched_identity() {
        let ca = identity("Test Root");
        let device = identity("device-01");
        let other = identity("device-02");
        let creds = Credentials::new()
            .root_ca(ca.cert_pem)
            .client_identity(device.cert_pem, other.key_pem);

        let err = TlsConfig::client(&creds).build().unwrap_err();
        assert!(matches!(err, TlsError::OwnCertConfig(_)));
    }

    #[test]
    fn test_half_identity_rejected() {
        let mut creds = Credentials::new().server_verification(false);
        creds.client_cert = Some(identity("device-01").cert_pem);

        let err = TlsConfig::client(&creds).build().unwrap_err();
        assert!(matches!(err, TlsError::InvalidParameter(_)));
    }

    #[test]
    fn test_alpn_policy() {
        let creds = Credentials::new()
            .server_verification(false)
            .alpn(&["x-amzn-mqtt-ca"]);

        let config = TlsConfig::client(&creds).build().unwrap();
        assert!(config.offers_alpn(HTTPS_PORT));
        assert!(!config.offers_alpn(8883));

        let config = TlsConfig::client(&creds)
            .alpn_policy(AlpnPolicy::Always)
            .build()
            .unwrap();
        assert!(config.offers_alpn(8883));
    }

    #[test]
    fn test_version_range() {
        let creds = Credentials::new().server_verification(false);

        assert!(TlsConfig::client(&creds)
            .version_range(TlsVersion::Tls12, TlsVersion::Tls13)
            .build()
            .is_ok());

        let err = TlsConfig::client(&creds)
            .version_range(TlsVersion::Tls13, TlsVersion::Tls12)
            .build()
            .unwrap_err();
        assert!(matches!(err, TlsError::InvalidParameter(_)));
    }
}
