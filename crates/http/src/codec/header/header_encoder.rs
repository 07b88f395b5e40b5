//! Encoder for the status line and header section of a response.
//!
//! Framing headers set by a handler are ignored: `Content-Length` or
//! `Transfer-Encoding: chunked` is always derived from the [`PayloadSize`]
//! the body actually has, so the head can never disagree with the body.

use std::io::{self, Write};

use bytes::{BufMut, BytesMut};
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use tokio_util::codec::Encoder;

use crate::protocol::{PayloadSize, ResponseHead, SendError};

/// Initial buffer size reserved for a response head
const INIT_HEADER_SIZE: usize = 1024;

/// Encodes a [`ResponseHead`] together with the framing of its body.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderEncoder;

impl Encoder<(ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (head, payload_size) = item;
        let status = head.status();

        dst.reserve(INIT_HEADER_SIZE);
        write!(FastWrite(dst), "HTTP/1.1 {} {}\r\n", status.code(), status.reason())?;

        for (name, value) in head.headers() {
            if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
                continue;
            }
            put_header(dst, name.as_ref(), value.as_ref());
        }

        // 1xx, 204 and 304 never carry framing headers
        if !status.is_bodiless() {
            match payload_size {
                PayloadSize::Length(n) => write!(FastWrite(dst), "content-length: {n}\r\n")?,
                PayloadSize::Chunked => put_header(dst, b"transfer-encoding", b"chunked"),
                PayloadSize::Empty => put_header(dst, b"content-length", b"0"),
            }
        }

        dst.put_slice(b"\r\n");
        Ok(())
    }
}

fn put_header(dst: &mut BytesMut, name: &[u8], value: &[u8]) {
    dst.put_slice(name);
    dst.put_slice(b": ");
    dst.put_slice(value);
    dst.put_slice(b"\r\n");
}

/// `io::Write` over a `BytesMut` so `write!` can format straight into it.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
