use bytes::{Buf, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Encoder;

use crate::codec::ResponseEncoder;
use crate::protocol::{ConnectionClosed, Message, PayloadSize, ResponseHead, SendError};

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Encodes responses into a buffer and writes it out on [`flush`](Self::flush).
#[derive(Debug)]
pub struct MessageWriter<W> {
    writer: W,
    buffer: BytesMut,
    encoder: ResponseEncoder,
}

impl<W> MessageWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn with_capacity(writer: W, buffer_size: usize) -> Self {
        Self { writer, buffer: BytesMut::with_capacity(buffer_size), encoder: ResponseEncoder::new() }
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    #[inline]
    pub fn write<D>(&mut self, item: Message<(ResponseHead, PayloadSize), D>) -> Result<(), SendError>
    where
        D: Buf,
    {
        self.encoder.encode(item, &mut self.buffer)
    }

    /// Drops the body announced by the last written head.
    pub fn skip_payload(&mut self) {
        self.encoder.skip_payload();
    }

    /// Queues the interim `100 Continue` response.
    pub fn write_continue(&mut self) {
        self.buffer.extend_from_slice(CONTINUE);
    }

    /// Writes out everything encoded so far.
    ///
    /// # Errors
    ///
    /// A failed write means the connection is gone, whether the peer reset it
    /// or the server force-closed it, and is reported as [`ConnectionClosed::Io`].
    pub async fn flush(&mut self) -> Result<(), ConnectionClosed> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        self.writer.write_all(&self.buffer).await.map_err(ConnectionClosed::Io)?;
        self.buffer.clear();
        self.writer.flush().await.map_err(ConnectionClosed::Io)
    }

    /// Flushes what is buffered and shuts the write half down.
    pub async fn shutdown(&mut self) -> Result<(), ConnectionClosed> {
        self.flush().await?;
        self.writer.shutdown().await.map_err(ConnectionClosed::Io)
    }
}
