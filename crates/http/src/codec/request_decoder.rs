//! Streaming decoder for whole requests.
//!
//! A request comes out as one [`Message::Header`] followed by
//! [`Message::Payload`] items up to [`PayloadItem::Eof`]. Bodies larger than
//! the configured maximum are rejected: a `Content-Length` as soon as the head
//! is decoded, a chunked body once the received bytes pass the limit.

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::body::PayloadDecoder;
use crate::codec::header::HeaderDecoder;
use crate::config::SessionConfig;
use crate::ensure;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

/// Decodes requests, one after another, from a connection's read buffer.
///
/// While `payload_decoder` is `None` the decoder waits for a request head,
/// otherwise it is inside the body of the current request.
#[derive(Debug)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
    max_body_size: u64,
    received: u64,
}

impl RequestDecoder {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            header_decoder: HeaderDecoder::new(config.max_header_bytes(), config.max_headers()),
            payload_decoder: None,
            max_body_size: config.max_body_size(),
            received: 0,
        }
    }

    /// Whether the decoder is in the middle of a request body.
    pub fn in_payload(&self) -> bool {
        self.payload_decoder.is_some()
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(PayloadItem::Chunk(bytes)) => {
                    self.received += bytes.len() as u64;
                    ensure!(
                        self.received <= self.max_body_size,
                        ParseError::too_large_body(self.received, self.max_body_size)
                    );
                    Some(Message::Payload(PayloadItem::Chunk(bytes)))
                }
                Some(PayloadItem::Eof) => {
                    trace!(body_size = self.received, "finished reading request body");
                    self.payload_decoder = None;
                    Some(Message::Payload(PayloadItem::Eof))
                }
                None => None,
            };

            return Ok(message);
        }

        let Some((header, payload_size)) = self.header_decoder.decode(src)? else {
            return Ok(None);
        };

        if let PayloadSize::Length(length) = payload_size {
            ensure!(length <= self.max_body_size, ParseError::too_large_body(length, self.max_body_size));
        }

        self.received = 0;
        self.payload_decoder = Some(payload_size.into());
        Ok(Some(Message::Header((header, payload_size))))
    }
}
