//! Bidirectional byte relay between a client connection and an origin
//! connection, with deadline-based wake-up of whichever direction is
//! still blocked once the other finishes.

use std::io;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

const WAKE_DEADLINE: Duration = Duration::from_secs(1);

pub struct Pipe {
    local: TcpStream,
    remote: TcpStream,
}

impl Pipe {
    pub fn new(local: TcpStream, remote: TcpStream) -> Self {
        Self { local, remote }
    }

    /// Relays until one side closes, then lets the other unblock and
    /// drain. Consumes the pipe; both sockets are closed on return.
    pub fn relay(self) -> io::Result<()> {
        relay(&self.local, &self.remote)
    }
}

/// Copies `local <-> remote` concurrently. Returns the local→remote error
/// if any, else the remote→local one, matching the original's preference
/// for the client-facing direction's error.
pub fn relay(local: &TcpStream, remote: &TcpStream) -> io::Result<()> {
    let mut l2r_read = local.try_clone()?;
    let mut l2r_write = remote.try_clone()?;
    let remote_wake = remote.try_clone()?;

    let forward: thread::JoinHandle<io::Result<()>> = thread::spawn(move || {
        let result = io::copy(&mut l2r_read, &mut l2r_write).map(|_| ());
        let _ = remote_wake.set_read_timeout(Some(WAKE_DEADLINE));
        result
    });

    let mut r2l_read = remote.try_clone()?;
    let mut r2l_write = local.try_clone()?;
    let reverse_result = io::copy(&mut r2l_read, &mut r2l_write).map(|_| ());
    let _ = local.set_read_timeout(Some(WAKE_DEADLINE));

    let forward_result = forward
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("relay thread panicked")));

    if let Err(e) = forward_result {
        return Err(e);
    }
    reverse_result
}

/// Classifies an I/O error as safe to drop without logging: a closed or
/// reset peer, a missing host, or a read-timeout wake-up fired by the
/// other direction of the same relay.
pub fn is_ignorable_error(err: &io::Error) -> bool {
    use io::ErrorKind::*;
    if matches!(
        err.kind(),
        ConnectionReset | ConnectionRefused | ConnectionAborted | TimedOut | UnexpectedEof
    ) {
        return true;
    }

    let msg = err.to_string();
    msg.ends_with("no such host")
        || msg.ends_with("connection reset by peer")
        || msg.ends_with("connection refused")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn relay_copies_both_directions_until_close() {
        let (client_a, server_a) = connected_pair();
        let (client_b, server_b) = connected_pair();

        let mut client_a_w = client_a.try_clone().unwrap();
        let mut client_b_w = client_b.try_clone().unwrap();

        let relay_thread = thread::spawn(move || relay(&server_a, &server_b));

        client_a_w.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        client_b_w.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        client_b_w.write_all(b"pong").unwrap();
        let mut buf2 = [0u8; 4];
        client_a_w.read_exact(&mut buf2).unwrap();
        assert_eq!(&buf2, b"pong");

        drop(client_a_w);
        drop(client_b_w);
        let _ = relay_thread.join().unwrap();
    }

    #[test]
    fn connection_reset_is_ignorable() {
        let err = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(is_ignorable_error(&err));
    }

    #[test]
    fn generic_other_error_is_not_ignorable() {
        let err = io::Error::other("boom");
        assert!(!is_ignorable_error(&err));
    }
}
