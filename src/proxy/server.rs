//! Accept loop for the plaintext HTTP(S)-forwarding proxy: handshake,
//! optional basic auth, resolve + deny, dial, and relay.

use crate::error::{ProxyError, Result};
use crate::proxy::handshake::handshake;
use crate::proxy::reader::PeekableReader;
use crate::proxy::relay::{self, Pipe};
use crate::proxy::resolver::NameResolver;
use socket2::{SockRef, TcpKeepalive};
use std::io::{self, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);
const AUTH_REQUIRED: &[u8] =
    b"HTTP/1.1 407 Proxy Authentication Required\r\nProxy-Authenticate: Basic realm=\"Access to internal site\"\r\n\r\n";
const FORBIDDEN: &[u8] = b"HTTP/1.1 403 Forbidden\r\n\r\n";
const CONNECT_OK: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

pub struct ProxyServer {
    resolver: Arc<NameResolver>,
    authorization: String,
}

impl ProxyServer {
    pub fn new(resolver: NameResolver, authorization: String) -> Self {
        Self {
            resolver: Arc::new(resolver),
            authorization,
        }
    }

    pub fn run(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).map_err(ProxyError::Io)?;
        log::info!("Listening on {addr}");

        for incoming in listener.incoming() {
            let client = match incoming {
                Ok(s) => s,
                Err(e) if relay::is_ignorable_error(&e) => continue,
                Err(e) => {
                    log::error!("could not accept: {e}");
                    continue;
                }
            };

            let resolver = Arc::clone(&self.resolver);
            let authorization = self.authorization.clone();
            std::thread::spawn(move || {
                if let Err(e) = handle_connection(client, &resolver, &authorization) {
                    log::error!("{e}");
                }
            });
        }
        Ok(())
    }
}

fn set_keepalive(stream: &TcpStream) -> io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_IDLE))
}

fn handle_connection(
    client: TcpStream,
    resolver: &NameResolver,
    authorization: &str,
) -> Result<()> {
    let _ = set_keepalive(&client);
    let mut client = client;

    let reader = PeekableReader::new(client.try_clone().map_err(ProxyError::Io)?);
    let (reader, header) = match handshake(reader) {
        Ok(v) => v,
        Err(e) => {
            log::error!("{e}");
            return Ok(());
        }
    };

    if !authorization.is_empty() {
        let ok = header
            .proxy_basic_auth()
            .map(|(user, pass)| format!("{user}:{pass}") == authorization)
            .unwrap_or(false);
        if !ok {
            log::warn!("no or invalid proxy authorization provided for {}", header.uri);
            let _ = client.write_all(AUTH_REQUIRED);
            return Ok(());
        }
    }

    let host = header.domain()?;
    let port = header.port()?;
    let ip = match resolver.resolve(&host) {
        Ok(ip) => ip,
        Err(ProxyError::HostRejected { reason }) => {
            log::warn!("rejected by rule: {reason}");
            let _ = client.write_all(FORBIDDEN);
            return Ok(());
        }
        Err(e) => {
            log::warn!("resolve failed for {host}: {e}");
            let _ = client.write_all(FORBIDDEN);
            return Ok(());
        }
    };

    let origin_addr = format!("{ip}:{port}");
    let origin = match TcpStream::connect(&origin_addr) {
        Ok(s) => s,
        Err(e) => {
            if !relay::is_ignorable_error(&e) {
                log::error!("failed to dial {origin_addr}: {e}");
            }
            return Ok(());
        }
    };
    let _ = set_keepalive(&origin);

    let (client_raw, leftover) = reader.into_parts();
    let mut origin = origin;

    if header.is_connect() {
        client.write_all(CONNECT_OK).map_err(ProxyError::Io)?;
    } else if !leftover.is_empty() {
        origin.write_all(&leftover).map_err(ProxyError::Io)?;
    }

    log::info!(
        "local={}/{} remote={}/{} {} {}",
        client_raw.local_addr().map(|a| a.to_string()).unwrap_or_default(),
        client_raw.peer_addr().map(|a| a.to_string()).unwrap_or_default(),
        origin.local_addr().map(|a| a.to_string()).unwrap_or_default(),
        origin.peer_addr().map(|a| a.to_string()).unwrap_or_default(),
        header.method,
        host,
    );

    let pipe = Pipe::new(client_raw, origin);
    match pipe.relay() {
        Ok(()) => Ok(()),
        Err(e) if relay::is_ignorable_error(&e) => Ok(()),
        Err(e) => {
            log::error!("pipe failure: {e}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::pattern::PatternMatcher;
    use std::io::Read;
    use std::net::TcpListener as StdListener;

    fn spawn_echo_origin() -> String {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        std::thread::spawn(move || {
            if let Ok((mut s, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                if let Ok(n) = s.read(&mut buf) {
                    let _ = s.write_all(&buf[..n]);
                }
            }
        });
        addr
    }

    #[test]
    fn connect_flow_writes_200_then_relays() {
        let origin_addr = spawn_echo_origin();
        let (origin_host, origin_port) = origin_addr.rsplit_once(':').unwrap();

        let mut resolver = NameResolver::new(PatternMatcher::new(), None);
        resolver.override_host(origin_host, origin_host.parse().unwrap());
        let server = ProxyServer::new(resolver, String::new());

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let proxy_addr = listener.local_addr().unwrap();

        let request = format!("CONNECT {origin_host}:{origin_port} HTTP/1.1\r\nHost: {origin_host}:{origin_port}\r\n\r\n");

        let client_thread = std::thread::spawn(move || {
            let mut client = TcpStream::connect(proxy_addr).unwrap();
            client.write_all(request.as_bytes()).unwrap();

            let mut resp = [0u8; 19];
            client.read_exact(&mut resp).unwrap();
            assert_eq!(&resp, b"HTTP/1.1 200 OK\r\n\r\n");

            client.write_all(b"hello").unwrap();
            let mut echoed = [0u8; 5];
            client.read_exact(&mut echoed).unwrap();
            assert_eq!(&echoed, b"hello");
        });

        let (conn, _) = listener.accept().unwrap();
        handle_connection(conn, &server.resolver, &server.authorization).unwrap();
        client_thread.join().unwrap();
    }
}
