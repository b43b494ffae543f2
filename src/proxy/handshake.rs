//! The first step of handling an accepted connection: parse the request
//! line, then either drain a CONNECT's trailing bytes or rewrite the
//! request for forwarding and prepend it back onto the stream.

use crate::error::Result;
use crate::proxy::header::{Header, HOP_BY_HOP};
use crate::proxy::reader::PeekableReader;
use std::io::Read;

pub fn handshake<R: Read>(
    mut reader: PeekableReader<R>,
) -> Result<(PeekableReader<R>, Header)> {
    let header = Header::parse(&mut reader)?;

    if header.is_connect() {
        reader.drain()?;
    } else {
        let rewritten = header.format(HOP_BY_HOP);
        reader.prepend(&rewritten);
    }

    Ok((reader, header))
}
