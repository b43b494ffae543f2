//! Local TCP-to-TLS tunnel forwarder with trust-on-first-use certificate
//! fingerprint pinning.
//!
//! The forwarder never validates the remote's certificate chain against a
//! CA store: trust is established once, by an operator-confirmed
//! fingerprint, and enforced forever after by byte-for-byte comparison.
//! Bypassing chain validation is the whole point of pinning, not a
//! shortcut around it.

use crate::error::{ProxyError, Result};
use crate::proxy::relay;
use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme, StreamOwned};
use socket2::{SockRef, TcpKeepalive};
use std::io::{self, BufRead, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);
/// Deadline used to wake a peer's blocking read once the other direction
/// of the relay has finished — mirrors `proxy::relay::WAKE_DEADLINE`.
const WAKE_DEADLINE: Duration = Duration::from_secs(1);
/// Short read timeout held on the TLS socket throughout the relay, not
/// just at teardown: without it, a blocking read on the `Mutex`-guarded
/// `StreamOwned` would hold the lock for as long as the remote stays
/// silent, starving the writer side of the same duplex connection.
const TLS_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

fn client_config() -> Arc<ClientConfig> {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    Arc::new(config)
}

/// Everything before the first `:` — the host portion of a `host:port`
/// remote address, used as the TLS SNI value.
fn trim_port(addr: &str) -> &str {
    match addr.find(':') {
        Some(idx) if idx > 0 => &addr[..idx],
        _ => addr,
    }
}

fn fingerprint(der: &CertificateDer<'_>) -> String {
    let mut hasher = Blake2bVar::new(32).expect("32-byte blake2b output is valid");
    hasher.update(der.as_ref());
    let mut out = [0u8; 32];
    hasher.finalize_variable(&mut out).expect("fixed-size output buffer");
    out.iter().map(|b| format!("{b:02x}")).collect()
}

fn describe_connection_state(server_name: &str, conn: &ClientConnection, leaf: &CertificateDer<'_>, pinned: &str) {
    let version = conn
        .protocol_version()
        .map(|v| format!("{v:?}"))
        .unwrap_or_else(|| "unknown".to_string());
    let cipher = conn
        .negotiated_cipher_suite()
        .map(|c| format!("{:?}", c.suite()))
        .unwrap_or_else(|| "unknown".to_string());

    log::info!("TLS details:");
    log::info!("ServerName:     {server_name}");
    log::info!("Version:        {version}");
    log::info!("CipherSuite:    {cipher}");
    log::info!("LeafCertBytes:  {}", leaf.as_ref().len());
    log::info!("Fingerprint:    {pinned}");
}

/// `check()` phase: dial once, handshake, print details, optionally
/// block for operator confirmation, and return the pinned fingerprint.
pub fn check(remote: &str, skip_confirmation: bool) -> Result<String> {
    let server_name_str = trim_port(remote).to_string();
    let config = client_config();

    let tcp = TcpStream::connect(remote)
        .map_err(|e| ProxyError::DialFailed { addr: remote.to_string(), source: e })?;

    let server_name = ServerName::try_from(server_name_str.clone())
        .map_err(|_| ProxyError::TlsHandshakeFailed(format!("invalid server name {server_name_str}")))?;
    let conn = ClientConnection::new(config, server_name)
        .map_err(|e| ProxyError::TlsHandshakeFailed(e.to_string()))?;
    let mut tls = StreamOwned::new(conn, tcp);
    tls.flush().map_err(ProxyError::Io)?;

    let leaf = tls
        .conn
        .peer_certificates()
        .and_then(|certs| certs.first())
        .cloned()
        .ok_or_else(|| ProxyError::TlsHandshakeFailed("no peer certificate presented".into()))?;

    let pinned = fingerprint(&leaf);
    describe_connection_state(&server_name_str, &tls.conn, &leaf, &pinned);

    if !skip_confirmation {
        log::info!("Press ENTER to confirm and pin this fingerprint.");
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).map_err(ProxyError::Io)?;
    }

    Ok(pinned)
}

/// Steady-state loop: listen locally, and for each accepted connection,
/// dial the remote, TLS-handshake, verify the fingerprint, then relay.
/// A fingerprint mismatch terminates the process — it is the security
/// contract, not a connection-scoped error.
pub fn run(listen: &str, remote: &str, pinned: &str) -> Result<()> {
    let listener = TcpListener::bind(listen).map_err(ProxyError::Io)?;
    log::info!("Listening on {listen}");

    for incoming in listener.incoming() {
        let local = match incoming {
            Ok(s) => s,
            Err(e) if relay::is_ignorable_error(&e) => continue,
            Err(e) => {
                log::error!("could not accept: {e}");
                continue;
            }
        };

        let remote = remote.to_string();
        let pinned = pinned.to_string();
        std::thread::spawn(move || {
            if let Err(e) = handle_connection(local, &remote, &pinned) {
                log::error!("forwarder connection failed: {e}");
            }
        });
    }
    Ok(())
}

/// Compares a freshly observed leaf-certificate fingerprint against the
/// pinned one from the check phase. Split out from `handle_connection` so
/// the match and mismatch paths are independently testable.
fn verify_fingerprint(actual: &str, pinned: &str) -> Result<()> {
    if actual != pinned {
        return Err(ProxyError::FingerprintMismatch {
            expected: pinned.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

fn set_keepalive(stream: &TcpStream) -> io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_IDLE))
}

fn handle_connection(local: TcpStream, remote: &str, pinned: &str) -> Result<()> {
    let _ = set_keepalive(&local);

    let remote_tcp = TcpStream::connect(remote)
        .map_err(|e| ProxyError::DialFailed { addr: remote.to_string(), source: e })?;
    let _ = set_keepalive(&remote_tcp);

    let server_name_str = trim_port(remote).to_string();
    let server_name = ServerName::try_from(server_name_str.clone())
        .map_err(|_| ProxyError::TlsHandshakeFailed(format!("invalid server name {server_name_str}")))?;
    let config = client_config();
    let conn = ClientConnection::new(config, server_name)
        .map_err(|e| ProxyError::TlsHandshakeFailed(e.to_string()))?;
    let mut tls = StreamOwned::new(conn, remote_tcp);
    tls.flush().map_err(ProxyError::Io)?;

    let leaf = tls
        .conn
        .peer_certificates()
        .and_then(|certs| certs.first())
        .cloned()
        .ok_or_else(|| ProxyError::TlsHandshakeFailed("no peer certificate presented".into()))?;

    let actual = fingerprint(&leaf);
    if let Err(err) = verify_fingerprint(&actual, pinned) {
        log::error!("{err} — terminating");
        std::process::exit(1);
    }

    log::info!("Forwarding to {server_name_str} (fingerprint pinned)");
    relay_through_tls(local, tls)
}

/// Relays bytes between the plaintext local connection and the TLS
/// session to the remote proxy. `StreamOwned` is not split into
/// independent half-duplex handles the way a raw `TcpStream` is, so both
/// directions share one `Mutex`-guarded stream. The TLS socket carries a
/// short, always-on read timeout (`TLS_POLL_INTERVAL`) so a read that
/// finds nothing waiting releases the lock quickly instead of blocking
/// the writer for as long as the remote stays silent — the two
/// directions make independent progress rather than serializing on one
/// one-second-or-forever read. Once either direction finishes, the other
/// is woken within `WAKE_DEADLINE`, the same contract `proxy::relay::
/// relay` gives a plain `TcpStream` pipe.
fn relay_through_tls(
    local: TcpStream,
    mut tls: StreamOwned<ClientConnection, TcpStream>,
) -> Result<()> {
    tls.sock
        .set_read_timeout(Some(TLS_POLL_INTERVAL))
        .map_err(ProxyError::Io)?;
    let remote_wake = tls.sock.try_clone().map_err(ProxyError::Io)?;

    let tls = Arc::new(Mutex::new(tls));
    let tls_writer = Arc::clone(&tls);
    let local_closed = Arc::new(AtomicBool::new(false));
    let local_closed_writer = Arc::clone(&local_closed);

    let mut local_writer = local.try_clone().map_err(ProxyError::Io)?;
    let local_wake = local.try_clone().map_err(ProxyError::Io)?;
    let local_reader = local;

    let forward = std::thread::spawn(move || -> io::Result<()> {
        let mut reader = local_reader;
        let mut buf = [0u8; 4096];
        let result = loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) => break Err(e),
            };
            if let Err(e) = tls_writer.lock().unwrap().write_all(&buf[..n]) {
                break Err(e);
            }
        };
        local_closed_writer.store(true, Ordering::Release);
        let _ = remote_wake.set_read_timeout(Some(WAKE_DEADLINE));
        result
    });

    let mut buf = [0u8; 4096];
    let reverse_result: io::Result<()> = loop {
        match tls.lock().unwrap().read(&mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => {
                if let Err(e) = local_writer.write_all(&buf[..n]) {
                    break Err(e);
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                if local_closed.load(Ordering::Acquire) {
                    break Ok(());
                }
            }
            Err(e) => break Err(e),
        }
    };
    let _ = local_wake.set_read_timeout(Some(WAKE_DEADLINE));

    let forward_result = forward
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("relay thread panicked")));

    forward_result.or(reverse_result).map_err(ProxyError::Io)
}
