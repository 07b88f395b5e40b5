//! Decoder for request bodies.
//!
//! The framing announced by the request head picks one of three strategies:
//! - `Content-Length`: exactly that many bytes follow
//! - `Transfer-Encoding: chunked`: size-prefixed chunks up to a zero-size chunk
//! - no body: the end of the body is reported at once

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::chunked_decoder::ChunkedDecoder;
use crate::codec::body::length_decoder::LengthDecoder;
use crate::protocol::{ParseError, PayloadItem, PayloadSize};

/// Decodes a request body according to its [`PayloadSize`].
///
/// Every strategy finishes with exactly one [`PayloadItem::Eof`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDecoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    /// content-length payload
    Length(LengthDecoder),

    /// transfer-encoding chunked payload
    Chunked(ChunkedDecoder),

    /// no body with the request
    NoBody,
}

impl PayloadDecoder {
    /// Creates a decoder for a request without a body.
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    /// Creates a decoder for a chunked body.
    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(ChunkedDecoder::new()) }
    }

    /// Creates a decoder for a body of `size` bytes.
    ///
    /// # Arguments
    /// * `size` - the value of the `Content-Length` header
    pub fn fix_length(size: u64) -> Self {
        Self { kind: Kind::Length(LengthDecoder::new(size)) }
    }

    /// Returns whether this decoder reads a chunked body.
    pub fn is_chunked(&self) -> bool {
        matches!(self.kind, Kind::Chunked(_))
    }

    /// Returns whether this decoder stands for a missing body.
    pub fn is_empty(&self) -> bool {
        matches!(self.kind, Kind::NoBody)
    }
}

impl From<PayloadSize> for PayloadDecoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(size) => PayloadDecoder::fix_length(size),
            PayloadSize::Chunked => PayloadDecoder::chunked(),
            PayloadSize::Empty => PayloadDecoder::empty(),
        }
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    /// Delegates to the strategy picked for this body.
    ///
    /// # Returns
    /// * `Ok(Some(item))` - a chunk, or `Eof` once the body is complete
    /// * `Ok(None)` - more bytes are needed
    /// * `Err(_)` - the body is malformed
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match &mut self.kind {
            Kind::Length(decoder) => decoder.decode(src),
            Kind::Chunked(decoder) => decoder.decode(src),
            Kind::NoBody => Ok(Some(PayloadItem::Eof)),
        }
    }
}
