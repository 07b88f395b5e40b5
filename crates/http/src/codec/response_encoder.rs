use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;
use tracing::error;

use crate::codec::body::PayloadEncoder;
use crate::codec::header::HeaderEncoder;
use crate::protocol::{Message, PayloadSize, ResponseHead, SendError};

/// Encodes a response head followed by its payload items.
///
/// A head must be followed by its complete payload before the next head is
/// accepted, unless the payload is dropped with [`skip_payload`](Self::skip_payload).
#[derive(Debug, Default)]
pub struct ResponseEncoder {
    header_encoder: HeaderEncoder,
    payload_encoder: Option<PayloadEncoder>,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the payload announced by the last head, as for `HEAD` requests.
    pub fn skip_payload(&mut self) {
        self.payload_encoder = None;
    }

    /// Whether the payload of the last head is still being written.
    pub fn in_payload(&self) -> bool {
        self.payload_encoder.is_some()
    }
}

impl<D: Buf> Encoder<Message<(ResponseHead, PayloadSize), D>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Message<(ResponseHead, PayloadSize), D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Header((head, payload_size)) => {
                if self.payload_encoder.is_some() {
                    error!("expect payload item but receive response head");
                    return Err(SendError::io(io::Error::from(io::ErrorKind::InvalidInput)));
                }

                self.header_encoder.encode((head, payload_size), dst)?;
                if !payload_size.is_empty() {
                    self.payload_encoder = Some(payload_size.into());
                }
                Ok(())
            }

            Message::Payload(payload_item) => {
                let Some(payload_encoder) = &mut self.payload_encoder else {
                    // an empty body has nothing to encode, not even its end
                    if payload_item.is_eof() {
                        return Ok(());
                    }
                    error!("expect response header but receive payload item");
                    return Err(SendError::io(io::Error::from(io::ErrorKind::InvalidInput)));
                };

                let is_eof = payload_item.is_eof();
                payload_encoder.encode(payload_item, dst)?;

                if is_eof {
                    self.payload_encoder = None;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PayloadItem, StatusCode};
    use bytes::Bytes;

    type Item = Message<(ResponseHead, PayloadSize), Bytes>;

    fn head(payload_size: PayloadSize) -> Item {
        Message::Header((ResponseHead::new(StatusCode::Ok), payload_size))
    }

    #[test]
    fn fixed_length_response() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(head(PayloadSize::Length(5)), &mut dst).unwrap();
        encoder.encode(Item::from(Bytes::from_static(b"hello")), &mut dst).unwrap();
        encoder.encode(Item::Payload(PayloadItem::Eof), &mut dst).unwrap();

        assert_eq!(&dst[..], b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello");
        assert!(!encoder.in_payload());
    }

    #[test]
    fn chunked_response() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(head(PayloadSize::Chunked), &mut dst).unwrap();
        encoder.encode(Item::from(Bytes::from_static(b"abc")), &mut dst).unwrap();
        encoder.encode(Item::Payload(PayloadItem::Eof), &mut dst).unwrap();

        assert_eq!(&dst[..], b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n");
    }

    #[test]
    fn head_while_payload_pending_is_rejected() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(head(PayloadSize::Length(5)), &mut dst).unwrap();
        assert!(encoder.encode(head(PayloadSize::Empty), &mut dst).is_err());

        encoder.skip_payload();
        assert!(encoder.encode(head(PayloadSize::Empty), &mut dst).is_ok());
    }
}
