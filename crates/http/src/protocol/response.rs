//! Responses returned by handlers.
//!
//! A [`Response`] is a status, an ordered header list, an optional MIME type
//! and a [`ResponseBody`] telling the session how the body is framed:
//! fixed length, chunked, or a byte range of a seekable source.

use std::fmt;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderName, HeaderValue};
use mime::Mime;
use tokio::io::{AsyncRead, AsyncSeek};

use crate::protocol::{PayloadSize, StatusCode};

/// A readable and seekable body source, such as a file.
pub trait SeekRead: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin + ?Sized> SeekRead for T {}

/// The body of a response and how it goes on the wire.
pub enum ResponseBody {
    Empty,
    /// In-memory bytes, sent with `Content-Length`.
    Bytes(Bytes),
    /// Exactly `length` bytes read from `reader`, sent with `Content-Length`.
    Stream { reader: Box<dyn AsyncRead + Send + Unpin>, length: u64 },
    /// Everything `reader` yields until EOF, sent with `Transfer-Encoding: chunked`.
    Chunked(Box<dyn AsyncRead + Send + Unpin>),
    /// Bytes `start..=end` of a source that is `total` bytes long.
    Partial { reader: Box<dyn SeekRead>, start: u64, end: u64, total: u64 },
}

impl ResponseBody {
    pub fn payload_size(&self) -> PayloadSize {
        match self {
            ResponseBody::Empty => PayloadSize::Empty,
            ResponseBody::Bytes(bytes) => PayloadSize::from_length(bytes.len() as u64),
            ResponseBody::Stream { length, .. } => PayloadSize::from_length(*length),
            ResponseBody::Chunked(_) => PayloadSize::Chunked,
            ResponseBody::Partial { start, end, .. } => PayloadSize::from_length(range_len(*start, *end)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.payload_size().is_empty()
    }
}

pub(crate) fn range_len(start: u64, end: u64) -> u64 {
    if end < start { 0 } else { end - start + 1 }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Empty => f.write_str("Empty"),
            ResponseBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            ResponseBody::Stream { length, .. } => {
                f.debug_struct("Stream").field("length", length).finish_non_exhaustive()
            }
            ResponseBody::Chunked(_) => f.write_str("Chunked"),
            ResponseBody::Partial { start, end, total, .. } => f
                .debug_struct("Partial")
                .field("start", start)
                .field("end", end)
                .field("total", total)
                .finish_non_exhaustive(),
        }
    }
}

/// Status and headers of a response, in the order they are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl ResponseHead {
    pub fn new(status: StatusCode) -> Self {
        Self { status, headers: Vec::new() }
    }

    pub fn status(&self) -> &StatusCode {
        &self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    /// The first value of `name`.
    pub fn header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers.iter().find(|(n, _)| n == name).map(|(_, value)| value)
    }

    pub fn contains(&self, name: &HeaderName) -> bool {
        self.header(name).is_some()
    }

    /// Appends a header line, keeping any earlier line with the same name.
    pub fn append(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.push((name, value));
    }

    /// Replaces every line named `name` with a single one.
    pub fn insert(&mut self, name: HeaderName, value: HeaderValue) {
        self.remove(&name);
        self.headers.push((name, value));
    }

    pub fn remove(&mut self, name: &HeaderName) {
        self.headers.retain(|(n, _)| n != name);
    }
}

/// What a handler answers.
#[derive(Debug)]
pub struct Response {
    head: ResponseHead,
    mime_type: Option<Mime>,
    body: ResponseBody,
    close_connection: bool,
}

impl Response {
    /// A response without a body.
    pub fn new(status: StatusCode) -> Self {
        Self { head: ResponseHead::new(status), mime_type: None, body: ResponseBody::Empty, close_connection: false }
    }

    /// A fixed-length response from in-memory bytes.
    pub fn fixed(status: StatusCode, mime_type: Mime, body: impl Into<Bytes>) -> Self {
        Self::with_body(status, Some(mime_type), ResponseBody::Bytes(body.into()))
    }

    pub fn text(status: StatusCode, text: impl Into<String>) -> Self {
        Self::fixed(status, mime::TEXT_PLAIN, text.into())
    }

    pub fn html(status: StatusCode, html: impl Into<String>) -> Self {
        Self::fixed(status, mime::TEXT_HTML, html.into())
    }

    /// A fixed-length response of `length` bytes read from `reader`.
    pub fn from_reader<R>(status: StatusCode, mime_type: Mime, reader: R, length: u64) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::with_body(status, Some(mime_type), ResponseBody::Stream { reader: Box::new(reader), length })
    }

    /// A chunked response streaming `reader` until it is exhausted.
    pub fn chunked<R>(status: StatusCode, mime_type: Mime, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::with_body(status, Some(mime_type), ResponseBody::Chunked(Box::new(reader)))
    }

    /// A response carrying bytes `start..=end` of a `total` bytes long source.
    pub fn partial<R>(status: StatusCode, mime_type: Mime, reader: R, start: u64, end: u64, total: u64) -> Self
    where
        R: SeekRead + 'static,
    {
        Self::with_body(status, Some(mime_type), ResponseBody::Partial { reader: Box::new(reader), start, end, total })
    }

    pub fn not_found() -> Self {
        Self::text(StatusCode::NotFound, "Not Found")
    }

    fn with_body(status: StatusCode, mime_type: Option<Mime>, body: ResponseBody) -> Self {
        Self { head: ResponseHead::new(status), mime_type, body, close_connection: false }
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.head.append(name, value);
        self
    }

    pub fn add_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.head.append(name, value);
    }

    /// Closes the connection once this response is written.
    #[must_use]
    pub fn with_close_connection(mut self) -> Self {
        self.close_connection = true;
        self
    }

    pub fn set_close_connection(&mut self, close: bool) {
        self.close_connection = close;
    }

    pub fn set_mime_type(&mut self, mime_type: Mime) {
        self.mime_type = Some(mime_type);
    }

    pub fn status(&self) -> &StatusCode {
        self.head.status()
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    pub fn head_mut(&mut self) -> &mut ResponseHead {
        &mut self.head
    }

    pub fn mime_type(&self) -> Option<&Mime> {
        self.mime_type.as_ref()
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn close_connection(&self) -> bool {
        self.close_connection
    }

    /// Splits into head, body and the close flag.
    ///
    /// The MIME type becomes the `Content-Type` header unless the handler set one.
    pub fn into_parts(self) -> (ResponseHead, ResponseBody, bool) {
        let mut head = self.head;
        if let Some(mime_type) = self.mime_type {
            if !head.contains(&CONTENT_TYPE) {
                if let Ok(value) = HeaderValue::from_str(mime_type.as_ref()) {
                    head.append(CONTENT_TYPE, value);
                }
            }
        }
        (head, self.body, self.close_connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{ETAG, SET_COOKIE};
    use std::io::Cursor;

    #[test]
    fn headers_keep_order_and_duplicates() {
        let response = Response::new(StatusCode::Ok)
            .with_header(SET_COOKIE, HeaderValue::from_static("a=1"))
            .with_header(ETAG, HeaderValue::from_static("\"x\""))
            .with_header(SET_COOKIE, HeaderValue::from_static("b=2"));

        let names: Vec<_> = response.head().headers().iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["set-cookie", "etag", "set-cookie"]);
        assert_eq!(response.head().header(&SET_COOKIE), Some(&HeaderValue::from_static("a=1")));
    }

    #[test]
    fn mime_type_becomes_content_type() {
        let (head, body, close) = Response::text(StatusCode::Ok, "hi").into_parts();
        assert_eq!(head.header(&CONTENT_TYPE), Some(&HeaderValue::from_static("text/plain")));
        assert_eq!(body.payload_size(), PayloadSize::Length(2));
        assert!(!close);

        let (head, _, _) = Response::text(StatusCode::Ok, "hi")
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/x-custom"))
            .into_parts();
        let content_types: Vec<_> = head.headers().iter().filter(|(name, _)| name == CONTENT_TYPE).collect();
        assert_eq!(content_types.len(), 1);
        assert_eq!(content_types[0].1, "text/x-custom");
    }

    #[test]
    fn payload_size_per_body_kind() {
        assert!(Response::new(StatusCode::NoContent).body().is_empty());
        assert_eq!(Response::text(StatusCode::Ok, "").body().payload_size(), PayloadSize::Empty);

        let stream = Response::from_reader(StatusCode::Ok, mime::TEXT_PLAIN, Cursor::new(vec![0u8; 10]), 10);
        assert_eq!(stream.body().payload_size(), PayloadSize::Length(10));

        let chunked = Response::chunked(StatusCode::Ok, mime::TEXT_PLAIN, Cursor::new(vec![0u8; 10]));
        assert_eq!(chunked.body().payload_size(), PayloadSize::Chunked);

        let source = Cursor::new(vec![0u8; 10]);
        let partial = Response::partial(StatusCode::PartialContent, mime::TEXT_PLAIN, source, 2, 5, 10);
        assert_eq!(partial.body().payload_size(), PayloadSize::Length(4));
    }

    #[test]
    fn head_insert_replaces_all() {
        let mut head = ResponseHead::new(StatusCode::Ok);
        head.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        head.append(SET_COOKIE, HeaderValue::from_static("b=2"));
        head.insert(SET_COOKIE, HeaderValue::from_static("c=3"));
        assert_eq!(head.headers().len(), 1);
        assert_eq!(head.header(&SET_COOKIE), Some(&HeaderValue::from_static("c=3")));
    }
}
