use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;
use tracing::warn;

use crate::protocol::{PayloadItem, SendError};

/// Writes exactly `length` body bytes, as announced by `Content-Length`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthEncoder {
    remaining: u64,
}

impl LengthEncoder {
    pub fn new(length: u64) -> Self {
        Self { remaining: length }
    }

    pub fn is_finish(&self) -> bool {
        self.remaining == 0
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for LengthEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            PayloadItem::Chunk(mut bytes) => {
                if !bytes.has_remaining() {
                    return Ok(());
                }

                let len = bytes.remaining() as u64;
                if len > self.remaining {
                    warn!(remaining = self.remaining, chunk = len, "payload exceeds content-length");
                    let reason = format!("{len} bytes exceed the {} bytes left", self.remaining);
                    return Err(SendError::invalid_body(reason));
                }

                while bytes.has_remaining() {
                    let chunk = bytes.chunk();
                    let n = chunk.len();
                    dst.extend_from_slice(chunk);
                    bytes.advance(n);
                }
                self.remaining -= len;
                Ok(())
            }
            PayloadItem::Eof if self.remaining > 0 => {
                Err(SendError::invalid_body(format!("body ended {} bytes short of content-length", self.remaining)))
            }
            PayloadItem::Eof => Ok(()),
        }
    }
}
