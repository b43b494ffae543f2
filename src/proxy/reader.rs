//! Line-oriented peekable reader with rewind/prepend support.
//!
//! A connection is handed off to the relay once header parsing is done, but
//! the last `fill` may have over-read into the request body (or, for
//! `CONNECT`, into client bytes that must simply be dropped). `prepend`
//! lets the header parser push the rewritten request back in front of
//! whatever is still buffered so the relay sees a clean stream.

use std::io::{self, Read};

const FILL_BLOCK: usize = 512;

pub struct PeekableReader<R> {
    source: R,
    buf: Vec<u8>,
    offset: usize,
    all_drained: bool,
}

impl<R: Read> PeekableReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            buf: Vec::new(),
            offset: 0,
            all_drained: false,
        }
    }

    /// Reads the next line, stripping the trailing `\r`. `\n` bytes are
    /// skipped rather than treated as terminators (the wire is CRLF).
    pub fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            if self.offset >= self.buf.len() {
                self.fill()?;
            }

            let b = self.buf[self.offset];
            self.offset += 1;

            if b == b'\n' {
                continue;
            }
            if b == b'\r' {
                return Ok(line);
            }
            line.push(b);
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let start = self.buf.len();
        self.buf.resize(start + FILL_BLOCK, 0);
        let n = self.source.read(&mut self.buf[start..])?;
        self.buf.truncate(start + n);
        self.all_drained = n < FILL_BLOCK;

        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "EOF"));
        }
        Ok(())
    }

    /// Pushes `p` back so that it precedes whatever remains unread.
    pub fn prepend(&mut self, p: &[u8]) {
        if p.is_empty() {
            return;
        }

        let l = p.len().saturating_sub(1);
        if l <= self.offset {
            // Enough consumed room behind the cursor to splice in place.
            self.offset -= l;
            self.buf[self.offset..self.offset + p.len()].copy_from_slice(p);
            return;
        }

        let remaining = &self.buf[self.offset..];
        let mut rebuilt = Vec::with_capacity(p.len() + remaining.len());
        rebuilt.extend_from_slice(p);
        rebuilt.extend_from_slice(remaining);

        self.buf = rebuilt;
        self.offset = 0;
    }

    /// True once the most recent fill read fewer bytes than the block
    /// size — a heuristic signal that the source has no more to give
    /// immediately (used to know when a CONNECT drain is complete).
    pub fn is_all_drained(&self) -> bool {
        self.all_drained
    }

    /// Discards the buffer and offset without touching the source.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.offset = 0;
    }

    /// Drains up to 512-byte blocks from the buffered+source stream until
    /// a short read signals the client has stopped sending (used after a
    /// CONNECT request to discard any pipelined bytes before relaying).
    pub fn drain(&mut self) -> io::Result<()> {
        self.reset();
        if self.is_all_drained() {
            return Ok(());
        }

        let mut p = [0u8; FILL_BLOCK];
        loop {
            let n = self.read(&mut p)?;
            if n < FILL_BLOCK {
                return Ok(());
            }
        }
    }

    /// Splits off the still-unread bytes and the underlying source, so a
    /// caller can hand the raw source to something that wants sole
    /// ownership (the relay) after replaying the unread prefix itself.
    pub fn into_parts(self) -> (R, Vec<u8>) {
        let remaining = self.buf[self.offset..].to_vec();
        (self.source, remaining)
    }
}

impl<R: Read> Read for PeekableReader<R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if self.offset < self.buf.len() {
            let n = {
                let remaining = &self.buf[self.offset..];
                let n = remaining.len().min(dst.len());
                dst[..n].copy_from_slice(&remaining[..n]);
                n
            };
            self.offset += n;
            if self.offset >= self.buf.len() {
                self.reset();
            }
            return Ok(n);
        }

        self.source.read(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_line_strips_crlf() {
        let mut r = PeekableReader::new(Cursor::new(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n".to_vec()));
        assert_eq!(r.read_line().unwrap(), b"GET / HTTP/1.1");
        assert_eq!(r.read_line().unwrap(), b"Host: x");
        assert_eq!(r.read_line().unwrap(), b"");
    }

    #[test]
    fn read_line_eof_mid_line_fails() {
        let mut r = PeekableReader::new(Cursor::new(b"GET / HTTP".to_vec()));
        assert!(r.read_line().is_err());
    }

    #[test]
    fn prepend_reuses_consumed_space() {
        let mut r = PeekableReader::new(Cursor::new(b"world".to_vec()));
        let mut buf = [0u8; 5];
        r.read(&mut buf).unwrap();
        assert_eq!(&buf, b"world");

        // Buffer is now fully consumed; prepend should rebuild from source.
        r.prepend(b"hello ");
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello ");
    }

    #[test]
    fn prepend_splices_ahead_of_unread_remainder() {
        let mut r = PeekableReader::new(Cursor::new(b"ABCDEFGH".to_vec()));
        let mut one = [0u8; 1];
        r.read(&mut one).unwrap(); // consume 'A', offset=1, buf len 512-ish after fill
        r.prepend(b"XY");
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"XYBCDEFGH");
    }

    #[test]
    fn is_all_drained_reflects_short_read() {
        let mut r = PeekableReader::new(Cursor::new(b"short".to_vec()));
        let mut buf = [0u8; 5];
        r.read(&mut buf).unwrap();
        assert!(r.is_all_drained());
    }
}
