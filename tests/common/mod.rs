//! Shared fixtures for the integration tests: a throwaway PKI and a
//! loopback TLS server running on its own thread.

#![allow(dead_code)]

use halow_transport::net::{PollEvents, Transport};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{select_next_proto, AlpnError, Ssl, SslContext, SslMethod, SslStream, SslVerifyMode};
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectAlternativeName};
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A certificate together with its private key
pub struct Identity {
    pub cert: X509,
    pub key: PKey<Private>,
}

impl Identity {
    pub fn cert_pem(&self) -> String {
        String::from_utf8(self.cert.to_pem().unwrap()).unwrap()
    }

    pub fn key_pem(&self) -> String {
        String::from_utf8(self.key.private_key_to_pem_pkcs8().unwrap()).unwrap()
    }
}

/// Root CA plus a server leaf issued by it
pub struct Pki {
    pub ca: Identity,
    pub server: Identity,
}

impl Pki {
    /// CA and a leaf valid for `localhost` and `127.0.0.1`
    pub fn new() -> Self {
        Self::with_server_names("Test Root CA", &["localhost", "127.0.0.1"])
    }

    /// CA and a leaf carrying only the given SAN entries
    pub fn with_server_names(ca_name: &str, names: &[&str]) -> Self {
        let ca = issue(ca_name, None, true, &[]);
        let server = issue("test-server", Some(&ca), false, names);
        Pki { ca, server }
    }

    pub fn ca_pem(&self) -> String {
        self.ca.cert_pem()
    }

    /// Client identity issued by this CA
    pub fn client_identity(&self, cn: &str) -> Identity {
        issue(cn, Some(&self.ca), false, &[])
    }
}

fn generate_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn issue(cn: &str, issuer: Option<&Identity>, is_ca: bool, names: &[&str]) -> Identity {
    let key = generate_key();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    let name = name.build();

    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder.set_serial_number(&serial.to_asn1_integer().unwrap()).unwrap();
    builder.set_subject_name(&name).unwrap();
    match issuer {
        Some(ca) => builder.set_issuer_name(ca.cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&name).unwrap(),
    }
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(30).unwrap()).unwrap();

    if is_ca {
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder
            .append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().build().unwrap())
            .unwrap();
    } else {
        builder.append_extension(BasicConstraints::new().build().unwrap()).unwrap();
        builder
            .append_extension(KeyUsage::new().digital_signature().build().unwrap())
            .unwrap();
    }

    if !names.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for entry in names {
            if entry.parse::<std::net::IpAddr>().is_ok() {
                san.ip(entry);
            } else {
                san.dns(entry);
            }
        }
        let ext = san
            .build(&builder.x509v3_context(issuer.map(|ca| &*ca.cert), None))
            .unwrap();
        builder.append_extension(ext).unwrap();
    }

    let signing_key = issuer.map(|ca| &ca.key).unwrap_or(&key);
    builder.sign(signing_key, MessageDigest::sha256()).unwrap();

    Identity {
        cert: builder.build(),
        key,
    }
}

/// Knobs for the loopback server
#[derive(Default)]
pub struct ServerOptions {
    /// Protocols the server is willing to select, in wire format
    pub alpn: Option<Vec<u8>>,
    /// Require and verify a client certificate issued by the server's CA
    pub require_client_cert: bool,
}

fn server_context(pki: &Pki, options: &ServerOptions) -> SslContext {
    let mut ctx = SslContext::builder(SslMethod::tls_server()).unwrap();
    ctx.set_certificate(&pki.server.cert).unwrap();
    ctx.set_private_key(&pki.server.key).unwrap();
    ctx.check_private_key().unwrap();

    if let Some(protos) = options.alpn.clone() {
        let protos: &'static [u8] = Box::leak(protos.into_boxed_slice());
        ctx.set_alpn_select_callback(move |_, client| {
            select_next_proto(protos, client).ok_or(AlpnError::NOACK)
        });
    }

    if options.require_client_cert {
        ctx.cert_store_mut().add_cert(pki.ca.cert.clone()).unwrap();
        ctx.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT);
    }

    ctx.build()
}

/// Accept one connection, run the TLS handshake and hand the stream to
/// `handler`. The join handle yields `None` if the handshake failed.
pub fn spawn_tls_server<F, T>(pki: &Pki, options: ServerOptions, handler: F) -> (u16, JoinHandle<Option<T>>)
where
    F: FnOnce(SslStream<TcpStream>) -> T + Send + 'static,
    T: Send + 'static,
{
    let ctx = server_context(pki, &options);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (tcp, _) = listener.accept().unwrap();
        tcp.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        let ssl = Ssl::new(&ctx).unwrap();
        ssl.accept(tcp).ok().map(handler)
    });

    (port, handle)
}

/// Accept one connection and hand the raw socket to `handler`
pub fn spawn_tcp_server<F, T>(handler: F) -> (u16, JoinHandle<T>)
where
    F: FnOnce(TcpStream) -> T + Send + 'static,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (tcp, _) = listener.accept().unwrap();
        handler(tcp)
    });

    (port, handle)
}

/// Read exactly `len` bytes from the server side
pub fn read_exact_len<S: Read>(stream: &mut S, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    stream.read_exact(&mut data).unwrap();
    data
}

/// Deterministic test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Transport wrapper that simulates a constrained link.
///
/// Writes accept at most `max_write` bytes, every `block_every`-th write
/// reports would-block, and reads report would-block while `starve_reads`
/// is set.
pub struct ThrottledTransport {
    inner: TcpStream,
    max_write: usize,
    block_every: usize,
    writes: Arc<AtomicUsize>,
    starve_reads: Arc<AtomicBool>,
}

impl ThrottledTransport {
    pub fn new(inner: TcpStream, max_write: usize, block_every: usize) -> Self {
        ThrottledTransport {
            inner,
            max_write,
            block_every,
            writes: Arc::new(AtomicUsize::new(0)),
            starve_reads: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Count of write calls that reached the transport
    pub fn write_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.writes)
    }

    /// Switch that makes every read report would-block while set
    pub fn starve_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.starve_reads)
    }
}

impl Read for ThrottledTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.starve_reads.load(Ordering::Acquire) {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.inner.read(buf)
    }
}

impl Write for ThrottledTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let call = self.writes.fetch_add(1, Ordering::AcqRel) + 1;
        if self.block_every > 0 && call % self.block_every == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let len = buf.len().min(self.max_write);
        self.inner.write(&buf[..len])
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Transport for ThrottledTransport {
    fn set_recv_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.set_recv_timeout(timeout)
    }

    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> io::Result<bool> {
        if events == PollEvents::Read && self.starve_reads.load(Ordering::Acquire) {
            if let Some(timeout) = timeout {
                thread::sleep(timeout.min(Duration::from_millis(10)));
            }
            return Ok(false);
        }
        self.inner.poll(events, timeout)
    }

    fn close(&self) -> io::Result<()> {
        self.inner.close()
    }
}
