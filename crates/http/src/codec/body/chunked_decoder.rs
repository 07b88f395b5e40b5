//! Decoder for `Transfer-Encoding: chunked` request bodies.
//!
//! refer: <https://www.rfc-editor.org/rfc/rfc9112.html#name-chunked-transfer-coding>
//!
//! The body is consumed byte by byte through a small state machine, except
//! for chunk data which is split off the buffer in one piece. Chunk
//! extensions and trailer fields are read and dropped.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{ParseError, PayloadItem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: State,
    chunk_remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// hex digits of the chunk size
    Size,
    /// whitespace between size and extension or CR
    SizeWhitespace,
    /// `;name=value` after the size
    Extension,
    SizeLf,
    Data,
    DataCr,
    DataLf,
    /// a trailer field line after the last chunk
    Trailer,
    TrailerLf,
    EndCr,
    EndLf,
    Done,
}

/// Outcome of feeding bytes to the state machine.
enum Step {
    Next(State),
    Data(State, Bytes),
    NeedMore,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: State::Size, chunk_remaining: 0 }
    }

    fn step(&mut self, src: &mut BytesMut) -> Result<Step, ParseError> {
        if self.state == State::Data {
            return Ok(self.read_data(src));
        }

        if !src.has_remaining() {
            return Ok(Step::NeedMore);
        }
        let byte = src.get_u8();

        let next = match (self.state, byte) {
            (State::Size, b) if b.is_ascii_hexdigit() => {
                let digit = u64::from(hex_value(b));
                self.chunk_remaining = self
                    .chunk_remaining
                    .checked_mul(16)
                    .and_then(|size| size.checked_add(digit))
                    .ok_or_else(|| ParseError::invalid_body("chunk size overflow"))?;
                State::Size
            }
            (State::Size | State::SizeWhitespace, b'\t' | b' ') => State::SizeWhitespace,
            (State::Size | State::SizeWhitespace, b';') => State::Extension,
            (State::Size | State::SizeWhitespace | State::Extension, b'\r') => State::SizeLf,
            (State::Size | State::SizeWhitespace, b) => {
                return Err(ParseError::invalid_body(format!("invalid byte {b:#04x} in chunk size line")));
            }

            (State::Extension, b'\n') => return Err(ParseError::invalid_body("bare LF in chunk extension")),
            (State::Extension, _) => State::Extension,

            (State::SizeLf, b'\n') if self.chunk_remaining == 0 => State::EndCr,
            (State::SizeLf, b'\n') => State::Data,

            (State::DataCr, b'\r') => State::DataLf,
            (State::DataLf, b'\n') => State::Size,

            (State::EndCr, b'\r') => State::EndLf,
            (State::Trailer, b'\r') => State::TrailerLf,
            (State::EndCr | State::Trailer, _) => State::Trailer,
            (State::TrailerLf, b'\n') => State::EndCr,
            (State::EndLf, b'\n') => State::Done,

            (state, b) => return Err(ParseError::invalid_body(format!("unexpected byte {b:#04x} in state {state:?}"))),
        };

        Ok(Step::Next(next))
    }

    fn read_data(&mut self, src: &mut BytesMut) -> Step {
        if src.is_empty() {
            return Step::NeedMore;
        }

        let len = usize::try_from(self.chunk_remaining).unwrap_or(usize::MAX).min(src.len());
        let bytes = src.split_to(len).freeze();
        self.chunk_remaining -= len as u64;

        let next = if self.chunk_remaining == 0 { State::DataCr } else { State::Data };
        Step::Data(next, bytes)
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.state == State::Done {
                trace!("finished reading chunked body");
                return Ok(Some(PayloadItem::Eof));
            }

            match self.step(src)? {
                Step::NeedMore => return Ok(None),
                Step::Next(state) => self.state = state,
                Step::Data(state, bytes) => {
                    self.state = state;
                    trace!(len = bytes.len(), "read chunk data");
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(item: Option<PayloadItem>) -> Bytes {
        item.and_then(PayloadItem::into_bytes).unwrap()
    }

    #[test]
    fn single_chunk() {
        let mut buffer = BytesMut::from(&b"10\r\n1234567890abcdef\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        assert_eq!(chunk(decoder.decode(&mut buffer).unwrap()), "1234567890abcdef");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
        assert!(buffer.is_empty());
    }

    #[test]
    fn multiple_chunks() {
        let mut buffer = BytesMut::from(&b"5\r\nhello\r\n7\r\n, world\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        assert_eq!(chunk(decoder.decode(&mut buffer).unwrap()), "hello");
        assert_eq!(chunk(decoder.decode(&mut buffer).unwrap()), ", world");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn extensions_and_trailers_are_skipped() {
        let mut buffer = BytesMut::from(&b"5;name=value\r\nhello\r\n0\r\nExpires: never\r\n\r\nGET"[..]);
        let mut decoder = ChunkedDecoder::new();

        assert_eq!(chunk(decoder.decode(&mut buffer).unwrap()), "hello");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
        assert_eq!(&buffer[..], b"GET");
    }

    #[test]
    fn partial_input_resumes() {
        let mut buffer = BytesMut::from(&b"5\r\nhel"[..]);
        let mut decoder = ChunkedDecoder::new();

        assert_eq!(chunk(decoder.decode(&mut buffer).unwrap()), "hel");
        assert!(decoder.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"lo\r\n0\r");
        assert_eq!(chunk(decoder.decode(&mut buffer).unwrap()), "lo");
        assert!(decoder.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"\n\r\n");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn uppercase_hex_size() {
        let data = format!("1A\r\n{}\r\n0\r\n\r\n", "x".repeat(26));
        let mut buffer = BytesMut::from(data.as_str());
        let mut decoder = ChunkedDecoder::new();
        assert_eq!(chunk(decoder.decode(&mut buffer).unwrap()).len(), 26);
    }

    #[test]
    fn malformed_input() {
        let mut decoder = ChunkedDecoder::new();
        assert!(decoder.decode(&mut BytesMut::from(&b"xyz\r\n"[..])).is_err());

        let mut decoder = ChunkedDecoder::new();
        let mut buffer = BytesMut::from(&b"5\r\nhelloBad"[..]);
        assert_eq!(chunk(decoder.decode(&mut buffer).unwrap()), "hello");
        assert!(decoder.decode(&mut buffer).is_err());

        let mut decoder = ChunkedDecoder::new();
        assert!(decoder.decode(&mut BytesMut::from(&b"ffffffffffffffffff\r\n"[..])).is_err());
    }

    #[test]
    fn large_chunk() {
        let size = 1024 * 1024;
        let mut data = format!("{size:x}\r\n").into_bytes();
        data.extend(vec![b'A'; size]);
        data.extend(b"\r\n0\r\n\r\n");

        let mut buffer = BytesMut::from(&data[..]);
        let mut decoder = ChunkedDecoder::new();

        let bytes = chunk(decoder.decode(&mut buffer).unwrap());
        assert_eq!(bytes.len(), size);
        assert!(bytes.iter().all(|&b| b == b'A'));
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }
}
