//! Peer certificate verification
//!
//! OpenSSL reports one verification error at a time through the verify
//! callback. The engine folds every error seen across the chain into a
//! [`VerifyFlags`] bitmask so an operator gets the full picture (expired
//! *and* untrusted, say) rather than the last error only.

use super::cert::CertInfo;
use super::error::TlsError;
use openssl::x509::{X509StoreContextRef, X509VerifyResult};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

// X509_V_ERR_* codes from OpenSSL's x509_vfy.h
const X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT: i32 = 2;
const X509_V_ERR_UNABLE_TO_DECRYPT_CERT_SIGNATURE: i32 = 4;
const X509_V_ERR_CERT_SIGNATURE_FAILURE: i32 = 7;
const X509_V_ERR_CERT_NOT_YET_VALID: i32 = 9;
const X509_V_ERR_CERT_HAS_EXPIRED: i32 = 10;
const X509_V_ERR_DEPTH_ZERO_SELF_SIGNED_CERT: i32 = 18;
const X509_V_ERR_SELF_SIGNED_CERT_IN_CHAIN: i32 = 19;
const X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT_LOCALLY: i32 = 20;
const X509_V_ERR_UNABLE_TO_VERIFY_LEAF_SIGNATURE: i32 = 21;
const X509_V_ERR_CERT_REVOKED: i32 = 23;
const X509_V_ERR_INVALID_CA: i32 = 24;
const X509_V_ERR_INVALID_PURPOSE: i32 = 26;
const X509_V_ERR_CERT_UNTRUSTED: i32 = 27;
const X509_V_ERR_CERT_REJECTED: i32 = 28;
const X509_V_ERR_HOSTNAME_MISMATCH: i32 = 62;
const X509_V_ERR_IP_ADDRESS_MISMATCH: i32 = 64;

/// Bitmask of certificate verification failures
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct VerifyFlags(u32);

impl VerifyFlags {
    /// Validity period has ended
    pub const EXPIRED: VerifyFlags = VerifyFlags(0x0001);
    /// Certificate has been revoked
    pub const REVOKED: VerifyFlags = VerifyFlags(0x0002);
    /// Host name or IP does not match the certificate
    pub const CN_MISMATCH: VerifyFlags = VerifyFlags(0x0004);
    /// Chain does not lead to a trusted root
    pub const NOT_TRUSTED: VerifyFlags = VerifyFlags(0x0008);
    /// Validity period has not started
    pub const FUTURE: VerifyFlags = VerifyFlags(0x0200);
    /// Certificate not allowed for this purpose
    pub const KEY_USAGE: VerifyFlags = VerifyFlags(0x0800);
    /// Signature on the certificate does not check out
    pub const BAD_SIGNATURE: VerifyFlags = VerifyFlags(0x4000);
    /// Any other verification failure
    pub const OTHER: VerifyFlags = VerifyFlags(0x0100);

    const NAMED: [(VerifyFlags, &'static str); 8] = [
        (VerifyFlags::EXPIRED, "certificate validity has expired"),
        (VerifyFlags::REVOKED, "certificate has been revoked"),
        (VerifyFlags::CN_MISMATCH, "certificate name does not match the expected host"),
        (VerifyFlags::NOT_TRUSTED, "certificate is not correctly signed by the trusted CA"),
        (VerifyFlags::OTHER, "other verification failure"),
        (VerifyFlags::FUTURE, "certificate validity starts in the future"),
        (VerifyFlags::KEY_USAGE, "certificate usage does not match"),
        (VerifyFlags::BAD_SIGNATURE, "certificate signature is invalid"),
    ];

    pub const fn empty() -> Self {
        VerifyFlags(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        VerifyFlags(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn contains(&self, other: VerifyFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Map an OpenSSL verification result to flags
    pub fn from_verify_result(result: X509VerifyResult) -> Self {
        match result.as_raw() {
            0 => VerifyFlags::empty(),
            X509_V_ERR_CERT_HAS_EXPIRED => VerifyFlags::EXPIRED,
            X509_V_ERR_CERT_NOT_YET_VALID => VerifyFlags::FUTURE,
            X509_V_ERR_CERT_REVOKED => VerifyFlags::REVOKED,
            X509_V_ERR_HOSTNAME_MISMATCH | X509_V_ERR_IP_ADDRESS_MISMATCH => VerifyFlags::CN_MISMATCH,
            X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT
            | X509_V_ERR_DEPTH_ZERO_SELF_SIGNED_CERT
            | X509_V_ERR_SELF_SIGNED_CERT_IN_CHAIN
            | X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT_LOCALLY
            | X509_V_ERR_UNABLE_TO_VERIFY_LEAF_SIGNATURE
            | X509_V_ERR_INVALID_CA
            | X509_V_ERR_CERT_UNTRUSTED
            | X509_V_ERR_CERT_REJECTED => VerifyFlags::NOT_TRUSTED,
            X509_V_ERR_INVALID_PURPOSE => VerifyFlags::KEY_USAGE,
            X509_V_ERR_UNABLE_TO_DECRYPT_CERT_SIGNATURE | X509_V_ERR_CERT_SIGNATURE_FAILURE => {
                VerifyFlags::BAD_SIGNATURE
            }
            _ => VerifyFlags::OTHER,
        }
    }

    /// Human-readable reasons for every set flag
    pub fn reasons(&self) -> impl Iterator<Item = &'static str> + '_ {
        Self::NAMED
            .iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, reason)| *reason)
    }
}

impl BitOr for VerifyFlags {
    type Output = VerifyFlags;

    fn bitor(self, rhs: VerifyFlags) -> VerifyFlags {
        VerifyFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for VerifyFlags {
    fn bitor_assign(&mut self, rhs: VerifyFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for VerifyFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifyFlags({:#06x})", self.0)
    }
}

impl fmt::Display for VerifyFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("no flags");
        }
        write!(f, "{:#06x}", self.0)?;
        for reason in self.reasons() {
            write!(f, "; {}", reason)?;
        }
        Ok(())
    }
}

/// Accumulates verification flags reported by the verify callback.
///
/// One recorder per session; clones share the same bitmask.
#[derive(Debug, Clone, Default)]
pub(crate) struct VerifyRecorder {
    flags: Arc<AtomicU32>,
}

impl VerifyRecorder {
    pub(crate) fn flags(&self) -> VerifyFlags {
        VerifyFlags(self.flags.load(Ordering::Acquire))
    }

    /// Build the OpenSSL verify callback.
    ///
    /// Every chain element is logged. With `enforce` the callback keeps
    /// OpenSSL's verdict so a bad chain aborts the handshake; without it
    /// the failure is recorded and the handshake continues.
    pub(crate) fn callback(
        &self,
        enforce: bool,
    ) -> impl Fn(bool, &mut X509StoreContextRef) -> bool + Send + Sync + 'static {
        let flags = Arc::clone(&self.flags);
        move |preverify_ok, ctx| {
            let depth = ctx.error_depth();
            if let Some(cert) = ctx.current_cert() {
                let info = CertInfo::from_x509_ref(cert);
                debug!(
                    depth,
                    subject = %info.subject,
                    issuer = %info.issuer,
                    not_after = %info.not_after,
                    "verify requested"
                );
            }

            if preverify_ok {
                debug!(depth, "certificate has no flags");
                return true;
            }

            let result = ctx.error();
            let observed = VerifyFlags::from_verify_result(result);
            flags.fetch_or(observed.bits(), Ordering::AcqRel);
            warn!(
                depth,
                code = result.as_raw(),
                reason = result.error_string(),
                flags = %observed,
                "certificate verification flagged"
            );

            !enforce
        }
    }
}

/// Apply the post-handshake verification rule.
///
/// A completed handshake is not enough when verification is required: any
/// recorded flag fails the session.
pub fn enforce(required: bool, flags: VerifyFlags) -> Result<(), TlsError> {
    if !required {
        debug!(%flags, "server verification skipped");
        return Ok(());
    }
    if flags.is_empty() {
        debug!("peer certificate verified");
        return Ok(());
    }

    error!(%flags, "peer certificate verification failed");
    Err(TlsError::PeerVerificationFailed(flags))
}
