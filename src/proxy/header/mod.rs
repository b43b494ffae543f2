//! HTTP/1.1 request-line and header parsing for the forwarding proxy.
//!
//! This is deliberately not a general-purpose HTTP parser: it understands
//! just enough of the wire format to route and rewrite one request before
//! handing the connection off to the relay.

use crate::error::{ProxyError, Result};
use crate::proxy::reader::PeekableReader;
use base64::Engine as _;
use std::io::Read;

/// Header names stripped before forwarding a request upstream, since they
/// describe the hop between client and proxy rather than the end-to-end
/// request.
pub const HOP_BY_HOP: &[&str] = &[
    "accept-encoding",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "proxy-connection",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub method: String,
    pub uri: String,
    pub version: String,
    fields: Vec<(String, String)>,
}

impl Header {
    pub fn parse<R: Read>(reader: &mut PeekableReader<R>) -> Result<Self> {
        let line = reader.read_line()?;
        let line = String::from_utf8_lossy(&line).into_owned();
        let (method, uri, version) = parse_request_line(&line)?;

        let mut fields = Vec::new();
        loop {
            let raw = reader.read_line()?;
            if raw.is_empty() {
                break;
            }
            let raw = String::from_utf8_lossy(&raw).into_owned();
            let idx = raw
                .find(':')
                .ok_or_else(|| ProxyError::MalformedRequest(format!("missing ':' in {raw:?}")))?;
            let name = raw[..idx].trim().to_string();
            let value = raw[idx + 1..].trim().to_string();
            fields.push((name, value));
        }

        Ok(Header {
            method,
            uri,
            version,
            fields,
        })
    }

    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The raw `Host` header value, required on every request form
    /// (absolute-form, relative-form, and `CONNECT`) since the proxy
    /// never falls back to the request-target authority.
    fn raw_host(&self) -> Result<&str> {
        self.get("host")
            .ok_or_else(|| ProxyError::MalformedRequest("no Host header".into()))
    }

    /// Host without port — the name the resolver and deny engine operate
    /// on.
    pub fn domain(&self) -> Result<String> {
        let host = self.raw_host()?;
        Ok(host.split(':').next().unwrap_or(host).to_string())
    }

    /// Host with `:80` appended when the `Host` header carried no port.
    pub fn host(&self) -> Result<String> {
        let host = self.raw_host()?;
        if host.contains(':') {
            Ok(host.to_string())
        } else {
            Ok(format!("{host}:80"))
        }
    }

    /// Port, defaulting to 80 when the `Host` header carried none.
    pub fn port(&self) -> Result<u16> {
        let host = self.raw_host()?;
        match host.rsplit_once(':') {
            Some((_, p)) => p
                .parse()
                .map_err(|_| ProxyError::MalformedRequest(format!("bad port in {host:?}"))),
            None => Ok(80),
        }
    }

    /// Decodes `Proxy-Authorization: Basic <b64>` into `(user, pass)`.
    pub fn proxy_basic_auth(&self) -> Result<(String, String)> {
        let raw = self
            .get("proxy-authorization")
            .ok_or(ProxyError::AuthMissing)?;
        let b64 = raw
            .strip_prefix("Basic ")
            .ok_or(ProxyError::AuthInvalid)?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|_| ProxyError::AuthInvalid)?;
        let decoded = String::from_utf8(decoded).map_err(|_| ProxyError::AuthInvalid)?;
        let (user, pass) = decoded.split_once(':').ok_or(ProxyError::AuthInvalid)?;
        Ok((user.to_string(), pass.to_string()))
    }

    /// Strips the hop-by-hop headers named in `drop` and serializes back
    /// to wire form, request line first.
    pub fn format(&self, drop: &[&str]) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.method, self.uri, self.version).into_bytes();
        for (k, v) in &self.fields {
            if drop.iter().any(|d| k.eq_ignore_ascii_case(d)) {
                continue;
            }
            out.extend_from_slice(format!("{k}: {v}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

fn parse_request_line(line: &str) -> Result<(String, String, String)> {
    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| ProxyError::MalformedRequest("empty request line".into()))?
        .to_string();
    let uri = parts
        .next()
        .ok_or_else(|| ProxyError::MalformedRequest("missing request target".into()))?
        .to_string();
    let version = parts
        .next()
        .ok_or_else(|| ProxyError::MalformedRequest("missing protocol version".into()))?
        .to_string();
    Ok((method, uri, version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header_of(raw: &str) -> Header {
        let mut r = PeekableReader::new(Cursor::new(raw.as_bytes().to_vec()));
        Header::parse(&mut r).unwrap()
    }

    #[test]
    fn parses_absolute_form_get() {
        let h = header_of("GET http://example.com/path HTTP/1.1\r\nHost: example.com\r\n\r\n");
        assert_eq!(h.method, "GET");
        assert_eq!(h.domain().unwrap(), "example.com");
        assert_eq!(h.port().unwrap(), 80);
    }

    #[test]
    fn parses_connect_target() {
        let h = header_of("CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n");
        assert!(h.is_connect());
        assert_eq!(h.domain().unwrap(), "example.com");
        assert_eq!(h.host().unwrap(), "example.com:443");
        assert_eq!(h.port().unwrap(), 443);
    }

    #[test]
    fn missing_host_header_fails_domain_lookup() {
        let h = header_of("CONNECT example.com:443 HTTP/1.1\r\n\r\n");
        assert!(h.domain().is_err());
    }

    #[test]
    fn host_defaults_port_when_absent() {
        let h = header_of("GET http://example.com/path HTTP/1.1\r\nHost: example.com\r\n\r\n");
        assert_eq!(h.host().unwrap(), "example.com:80");
        assert_eq!(h.port().unwrap(), 80);
    }

    #[test]
    fn missing_colon_is_malformed() {
        let mut r = PeekableReader::new(Cursor::new(
            b"GET / HTTP/1.1\r\nBadHeader\r\n\r\n".to_vec(),
        ));
        assert!(Header::parse(&mut r).is_err());
    }

    #[test]
    fn missing_version_token_is_malformed() {
        let mut r = PeekableReader::new(Cursor::new(b"GET /\r\nHost: x\r\n\r\n".to_vec()));
        assert!(Header::parse(&mut r).is_err());
    }

    #[test]
    fn decodes_proxy_basic_auth() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("alice:secret");
        let raw = format!(
            "GET / HTTP/1.1\r\nHost: x\r\nProxy-Authorization: Basic {encoded}\r\n\r\n"
        );
        let h = header_of(&raw);
        let (user, pass) = h.proxy_basic_auth().unwrap();
        assert_eq!(user, "alice");
        assert_eq!(pass, "secret");
    }

    #[test]
    fn format_strips_hop_by_hop() {
        let h = header_of(
            "GET / HTTP/1.1\r\nHost: x\r\nProxy-Connection: keep-alive\r\nAccept-Encoding: gzip\r\nX-Custom: y\r\n\r\n",
        );
        let out = String::from_utf8(h.format(HOP_BY_HOP)).unwrap();
        assert!(out.contains("X-Custom: y"));
        assert!(!out.contains("Proxy-Connection"));
        assert!(!out.contains("Accept-Encoding"));
    }

    #[test]
    fn format_round_trips_non_hop_headers() {
        let h = header_of("GET http://example.test/x HTTP/1.1\r\nHost: example.test\r\nProxy-Connection: keep-alive\r\nAccept-Encoding: gzip\r\n\r\n");
        let out = h.format(HOP_BY_HOP);
        assert_eq!(
            out,
            b"GET http://example.test/x HTTP/1.1\r\nHost: example.test\r\n\r\n".to_vec()
        );
    }
}
