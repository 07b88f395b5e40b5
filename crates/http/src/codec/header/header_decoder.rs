//! Decoder for the request line and header section.
//!
//! Parsing is done by `httparse` directly on the read buffer. The byte ranges
//! of names and values are recorded first, then the header section is split
//! off the buffer and every value is a cheap slice of it.
//!
//! Limits come from [`SessionConfig`](crate::config::SessionConfig): a header
//! section longer than `max_header_bytes` or with more than `max_headers`
//! lines is rejected, even while it is still incomplete.

use bytes::BytesMut;
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderName, HeaderValue, Method, Request, Uri, Version};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::config::{DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_HEADERS};
use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHeader};

/// Shortest request head httparse can complete, e.g. `GET / HTTP/1.1\n\n`.
const MIN_REQUEST_HEAD: usize = 14;

/// Decodes a [`RequestHeader`] and the framing of the body that follows it.
#[derive(Debug, Clone, Copy)]
pub struct HeaderDecoder {
    max_header_bytes: usize,
    max_headers: usize,
}

impl HeaderDecoder {
    pub fn new(max_header_bytes: usize, max_headers: usize) -> Self {
        Self { max_header_bytes, max_headers }
    }
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_HEADERS)
    }
}

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    /// Returns `Ok(None)` until a complete header section is buffered, then
    /// consumes exactly that section from `src`.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MIN_REQUEST_HEAD {
            return Ok(None);
        }

        let mut headers = vec![httparse::EMPTY_HEADER; self.max_headers];
        let mut req = httparse::Request::new(&mut headers);

        let status = req.parse(src).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(self.max_headers),
            Error::Version => ParseError::InvalidVersion(None),
            e => ParseError::invalid_header(e),
        })?;

        let body_offset = match status {
            Status::Complete(body_offset) => body_offset,
            Status::Partial => {
                ensure!(
                    src.len() <= self.max_header_bytes,
                    ParseError::too_large_header(src.len(), self.max_header_bytes)
                );
                return Ok(None);
            }
        };

        trace!(header_size = body_offset, header_count = req.headers.len(), "parsed request head");
        ensure!(body_offset <= self.max_header_bytes, ParseError::too_large_header(body_offset, self.max_header_bytes));

        let version = match req.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            v => return Err(ParseError::InvalidVersion(v)),
        };

        let method = req.method.ok_or(ParseError::InvalidMethod)?;
        let method = Method::from_bytes(method.as_bytes()).map_err(|e| {
            trace!(cause = %e, "invalid request method");
            ParseError::InvalidMethod
        })?;

        let uri = req.path.ok_or(ParseError::InvalidUri)?;
        let uri = Uri::try_from(uri).map_err(|e| {
            trace!(cause = %e, "invalid request uri");
            ParseError::InvalidUri
        })?;

        let indices = HeaderIndex::record(src, req.headers);
        let header_bytes = src.split_to(body_offset).freeze();

        let mut request = Request::new(());
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.version_mut() = version;

        let headers = request.headers_mut();
        headers.reserve(indices.len());
        for index in indices {
            let name =
                HeaderName::from_bytes(&header_bytes[index.name.0..index.name.1]).map_err(ParseError::invalid_header)?;
            let value = HeaderValue::from_maybe_shared(header_bytes.slice(index.value.0..index.value.1))
                .map_err(ParseError::invalid_header)?;

            // a repeated header keeps its last value
            headers.insert(name, value);
        }

        let header = RequestHeader::from(request);
        let payload_size = parse_payload(&header)?;

        Ok(Some((header, payload_size)))
    }
}

/// Positions of one header's name and value inside the read buffer.
#[derive(Debug, Clone, Copy)]
struct HeaderIndex {
    name: (usize, usize),
    value: (usize, usize),
}

impl HeaderIndex {
    fn record(bytes: &[u8], headers: &[httparse::Header<'_>]) -> Vec<HeaderIndex> {
        let base = bytes.as_ptr() as usize;
        headers
            .iter()
            .map(|header| {
                let name_start = header.name.as_ptr() as usize - base;
                let value_start = header.value.as_ptr() as usize - base;
                HeaderIndex {
                    name: (name_start, name_start + header.name.len()),
                    value: (value_start, value_start + header.value.len()),
                }
            })
            .collect()
    }
}

/// Works out the body framing from `Transfer-Encoding` and `Content-Length`.
///
/// refer: <https://www.rfc-editor.org/rfc/rfc9112.html#name-message-body-length>
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    let te_header = header.headers().get(TRANSFER_ENCODING);
    let cl_header = header.headers().get(CONTENT_LENGTH);

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::Empty),

        (Some(te_value), None) => {
            if is_chunked(te_value) {
                Ok(PayloadSize::Chunked)
            } else {
                Err(ParseError::invalid_body(format!("unsupported transfer-encoding {te_value:?}")))
            }
        }

        (None, Some(cl_value)) => {
            let cl_str = cl_value.to_str().map_err(ParseError::invalid_content_length)?;
            let length = cl_str
                .trim()
                .parse::<u64>()
                .map_err(|e| ParseError::invalid_content_length(format!("value {cl_str} is not u64: {e}")))?;

            Ok(PayloadSize::from_length(length))
        }

        (Some(_), Some(_)) => {
            Err(ParseError::invalid_content_length("transfer-encoding and content-length both present"))
        }
    }
}

/// Whether `chunked` is the final transfer coding.
fn is_chunked(value: &HeaderValue) -> bool {
    value
        .as_bytes()
        .rsplit(|b| *b == b',')
        .next()
        .is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}
