//! Certificate summaries
//!
//! Condensed X.509 details for verification logs and session diagnostics.

use openssl::nid::Nid;
use openssl::ssl::SslRef;
use openssl::x509::{X509NameRef, X509Ref};
use std::net::IpAddr;

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Certificate subject (Common Name)
    pub subject: String,
    /// Certificate issuer (Common Name)
    pub issuer: String,
    /// Subject Alternative Names (DNS names and IP addresses)
    pub subject_alt_names: Vec<String>,
    /// End of the validity period
    pub not_after: String,
}

impl CertInfo {
    /// Extract certificate information from an X.509 certificate reference
    pub fn from_x509_ref(cert: &X509Ref) -> Self {
        CertInfo {
            subject: common_name(cert.subject_name()),
            issuer: common_name(cert.issuer_name()),
            subject_alt_names: subject_alt_names(cert),
            not_after: cert.not_after().to_string(),
        }
    }

    /// Whether the certificate is self-issued
    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }
}

fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .map(|entry| String::from_utf8_lossy(entry.data().as_slice()).into_owned())
        .unwrap_or_else(|| "<undef>".to_string())
}

fn subject_alt_names(cert: &X509Ref) -> Vec<String> {
    let Some(sans) = cert.subject_alt_names() else {
        return Vec::new();
    };

    sans.iter()
        .filter_map(|name| {
            if let Some(dns) = name.dnsname() {
                return Some(format!("DNS:{}", dns));
            }
            let ip = match name.ipaddress()? {
                [a, b, c, d] => IpAddr::from([*a, *b, *c, *d]),
                octets if octets.len() == 16 => {
                    let mut v6 = [0u8; 16];
                    v6.copy_from_slice(octets);
                    IpAddr::from(v6)
                }
                _ => return None,
            };
            Some(format!("IP:{}", ip))
        })
        .collect()
}

/// Peer certificate chain of an established connection (index 0 is the leaf)
pub fn peer_chain(ssl: &SslRef) -> Vec<CertInfo> {
    match ssl.peer_cert_chain() {
        Some(chain) if chain.len() > 0 => chain.iter().map(CertInfo::from_x509_ref).collect(),
        _ => ssl
            .peer_certificate()
            .map(|leaf| vec![CertInfo::from_x509_ref(&leaf)])
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::hash::MessageDigest;
    use openssl::pkey::PKey;
    use openssl::x509::extension::SubjectAlternativeName;
    use openssl::x509::{X509Builder, X509NameBuilder, X509};

    fn self_signed(cn: &str) -> X509 {
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
        let san = SubjectAlternativeName::new()
            .dns(cn)
            .ip("10.0.0.1")
            .ip("::1")
            .build(&builder.x509v3_context(None, None))
            .unwrap();
        builder.append_extension(san).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    #[test]
    fn test_cert_info_from_self_signed() {
        let cert = self_signed("broker.example.com");
        let info = CertInfo::from_x509_ref(&cert);

        assert_eq!(info.subject, "broker.example.com");
        assert_eq!(info.issuer, "broker.example.com");
        assert!(info.is_self_issued());
        assert!(!info.not_after.is_empty());
    }

    #[test]
    fn test_subject_alt_names() {
        let cert = self_signed("broker.example.com");
        let sans = subject_alt_names(&cert);

        assert_eq!(sans.len(), 3);
        assert!(sans.contains(&"DNS:broker.example.com".to_string()));
        assert!(sans.contains(&"IP:10.0.0.1".to_string()));
        assert!(sans.contains(&"IP:::1".to_string()));
    }

    #[test]
    fn test_missing_common_name() {
        let name = X509NameBuilder::new().unwrap().build();
        assert_eq!(common_name(&name), "<undef>");
    }

    #[test]
    fn test_non_ascii_common_name() {
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, "capteur-é").unwrap();
        assert_eq!(common_name(&name.build()), "capteur-é");
    }
}
