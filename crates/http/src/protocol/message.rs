//! Message items exchanged between the codecs and a session.
//!
//! A request or a response travels as a stream of [`Message`]s: exactly one
//! [`Message::Header`] followed by [`Message::Payload`] items, the last of
//! which is always [`PayloadItem::Eof`]. The framing of the payload on the
//! wire is described by [`PayloadSize`].

use bytes::{Buf, Bytes};

/// One step of a streamed HTTP message: the head, then payload items up to [`PayloadItem::Eof`].
///
/// The decoder yields `Message<(RequestHeader, PayloadSize)>` and the encoder
/// accepts `Message<(ResponseHead, PayloadSize), D>`.
///
/// `T` is the head type, `Data` the payload buffer type (defaults to [`Bytes`]).
#[derive(Debug)]
pub enum Message<T, Data: Buf = Bytes> {
    /// The head of the message, produced or consumed once per message
    Header(T),
    /// A piece of the body, or its end
    Payload(PayloadItem<Data>),
}

/// A slice of a message body, or the end of it.
///
/// Body decoders produce chunks as bytes arrive and finish with `Eof`; body
/// encoders expect the same sequence and check it against the announced
/// [`PayloadSize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem<Data: Buf = Bytes> {
    /// Body bytes, in wire order
    Chunk(Data),
    /// The body is complete
    Eof,
}

/// How a message body is framed on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// `Content-Length: n`
    Length(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// no body at all
    Empty,
}

impl PayloadSize {
    /// Framing for a body of `length` bytes, where zero means no body.
    pub fn from_length(length: u64) -> Self {
        if length == 0 { PayloadSize::Empty } else { PayloadSize::Length(length) }
    }

    /// Returns true if the body uses chunked transfer encoding
    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }

    /// Returns true if there is no body to read or write
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty)
    }
}

impl<T, D: Buf> Message<T, D> {
    /// Returns true if this message carries body data or the end of the body
    #[inline]
    pub fn is_payload(&self) -> bool {
        matches!(self, Message::Payload(_))
    }

    /// Returns true if this message carries the head
    #[inline]
    pub fn is_header(&self) -> bool {
        matches!(self, Message::Header(_))
    }
}

/// Wraps bytes as a body chunk, so a payload can be written without naming the head type.
impl<T> From<Bytes> for Message<T> {
    fn from(bytes: Bytes) -> Self {
        Self::Payload(PayloadItem::Chunk(bytes))
    }
}

impl<D: Buf> PayloadItem<D> {
    /// Returns true if this item marks the end of the body
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    /// Returns true if this item carries body bytes
    #[inline]
    pub fn is_chunk(&self) -> bool {
        matches!(self, PayloadItem::Chunk(_))
    }
}

impl PayloadItem {
    /// Borrows the chunk bytes, `None` for [`PayloadItem::Eof`].
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }

    /// Takes the chunk bytes, `None` for [`PayloadItem::Eof`].
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestHeader;

    #[test]
    fn payload_size_from_length() {
        assert_eq!(PayloadSize::from_length(0), PayloadSize::Empty);
        assert_eq!(PayloadSize::from_length(12), PayloadSize::Length(12));
        assert!(PayloadSize::Chunked.is_chunked());
        assert!(!PayloadSize::Length(1).is_empty());
    }

    #[test]
    fn bytes_become_a_payload_chunk() {
        let message: Message<RequestHeader> = Bytes::from_static(b"abc").into();
        assert!(message.is_payload());
        assert!(!message.is_header());

        let Message::Payload(item) = message else { unreachable!() };
        assert!(item.is_chunk());
        assert_eq!(item.as_bytes().map(|bytes| &bytes[..]), Some(&b"abc"[..]));
        assert_eq!(item.into_bytes(), Some(Bytes::from_static(b"abc")));
        assert_eq!(PayloadItem::<Bytes>::Eof.into_bytes(), None);
    }
}
