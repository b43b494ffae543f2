//! Crate-wide error kinds for the proxy core.
//!
//! Each variant corresponds to one of the error kinds named in the design:
//! header parsing, denylist syntax, filtering, resolution, dialing, client
//! auth, TLS handshake/pinning, and generic I/O/timeout failures.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("malformed HTTP request: {0}")]
    MalformedRequest(String),

    #[error("syntax error in block rule at line {line}")]
    SyntaxError { line: usize },

    #[error("rejected host: {reason}")]
    HostRejected { reason: String },

    #[error("failed to resolve host {host}: {source}")]
    ResolveFailed { host: String, source: io::Error },

    #[error("failed to dial {addr}: {source}")]
    DialFailed { addr: String, source: io::Error },

    #[error("no proxy authorization provided")]
    AuthMissing,

    #[error("invalid proxy authorization")]
    AuthInvalid,

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),

    #[error("certificate fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("operation timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, ProxyError>;
