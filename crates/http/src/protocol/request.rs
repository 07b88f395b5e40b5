//! Parsed requests.
//!
//! [`RequestHeader`] is what the decoder produces from the request line and
//! header lines. [`Request`] is the complete, decoded request handed to the
//! handlers: path, query, form fields, uploaded files and the raw body.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_TYPE, EXPECT};
use http::request::Parts;
use http::{HeaderMap, HeaderName, Method, Request as HttpRequest, Uri, Version};
use serde::de::DeserializeOwned;

use crate::config::MimeTypes;
use crate::protocol::multipart::UploadedFile;
use crate::protocol::{ParseError, Parameters, decode_path};

/// Request line and headers of a request.
///
/// Header names are case-insensitive; a header sent more than once keeps
/// only its last value.
#[derive(Debug)]
pub struct RequestHeader {
    inner: HttpRequest<()>,
}

impl AsRef<HttpRequest<()>> for RequestHeader {
    fn as_ref(&self) -> &HttpRequest<()> {
        &self.inner
    }
}

impl RequestHeader {
    pub fn into_inner(self) -> HttpRequest<()> {
        self.inner
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// The header value as a string, `None` when absent or not visible ASCII.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        let name = HeaderName::from_bytes(name.as_ref().as_bytes()).ok()?;
        self.headers().get(name).and_then(|value| value.to_str().ok())
    }

    pub fn is_head(&self) -> bool {
        *self.method() == Method::HEAD
    }

    /// Whether the client waits for `100 Continue` before sending the body.
    pub fn expects_continue(&self) -> bool {
        self.headers().get(EXPECT).is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"100-continue"))
    }

    /// Whether the connection may carry another request after this one.
    ///
    /// HTTP/1.1 is persistent unless `Connection: close` is sent, HTTP/1.0
    /// only with `Connection: keep-alive`.
    pub fn keep_alive(&self) -> bool {
        let has_token = |token: &str| {
            self.headers()
                .get_all(CONNECTION)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .flat_map(|value| value.split(','))
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        };

        match self.version() {
            Version::HTTP_11 => !has_token("close"),
            Version::HTTP_10 => has_token("keep-alive"),
            _ => false,
        }
    }
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: HttpRequest::from_parts(parts, ()) }
    }
}

impl From<HttpRequest<()>> for RequestHeader {
    #[inline]
    fn from(inner: HttpRequest<()>) -> Self {
        Self { inner }
    }
}

/// A fully read request as seen by the handlers.
///
/// It lives for one request/response cycle of a session: spilled upload
/// files it refers to are deleted once the response has been written.
#[derive(Debug)]
pub struct Request {
    header: RequestHeader,
    path: String,
    query: Parameters,
    form: Parameters,
    files: HashMap<String, UploadedFile>,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
    mime_types: Arc<MimeTypes>,
}

impl Request {
    /// Decodes path and query string of `header`.
    ///
    /// # Errors
    ///
    /// Fails with [`ParseError::InvalidUri`] when the path holds a broken percent escape.
    pub fn new(
        header: RequestHeader,
        remote_addr: Option<SocketAddr>,
        mime_types: Arc<MimeTypes>,
    ) -> Result<Self, ParseError> {
        let path = decode_path(header.uri().path()).ok_or(ParseError::InvalidUri)?.into_owned();
        let query = header.uri().query().map(Parameters::parse).unwrap_or_default();

        Ok(Self {
            header,
            path,
            query,
            form: Parameters::new(),
            files: HashMap::new(),
            body: Bytes::new(),
            remote_addr,
            mime_types,
        })
    }

    pub(crate) fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    pub(crate) fn set_form(&mut self, form: Parameters) {
        self.form = form;
    }

    pub(crate) fn set_files(&mut self, files: HashMap<String, UploadedFile>) {
        self.files = files;
    }

    pub fn header(&self) -> &RequestHeader {
        &self.header
    }

    pub fn method(&self) -> &Method {
        self.header.method()
    }

    pub fn uri(&self) -> &Uri {
        self.header.uri()
    }

    pub fn version(&self) -> Version {
        self.header.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.header.headers()
    }

    /// The percent-decoded request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw, undecoded query string.
    pub fn query_string(&self) -> Option<&str> {
        self.header.uri().query()
    }

    pub fn query(&self) -> &Parameters {
        &self.query
    }

    /// Fields of an urlencoded or multipart body.
    pub fn form(&self) -> &Parameters {
        &self.form
    }

    pub fn files(&self) -> &HashMap<String, UploadedFile> {
        &self.files
    }

    pub fn file(&self, field: &str) -> Option<&UploadedFile> {
        self.files.get(field)
    }

    /// The raw body. Empty for multipart bodies, whose content is available
    /// through [`form`](Self::form) and [`files`](Self::files).
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers().get(CONTENT_TYPE).and_then(|value| value.to_str().ok())
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn mime_types(&self) -> &MimeTypes {
        &self.mime_types
    }

    /// Deserializes the raw query string into `T`.
    ///
    /// # Errors
    ///
    /// Fails when the query does not match the shape of `T`.
    pub fn query_as<T: DeserializeOwned>(&self) -> Result<T, serde_urlencoded::de::Error> {
        serde_urlencoded::from_str(self.query_string().unwrap_or_default())
    }

    /// Deserializes the form fields into `T`.
    ///
    /// # Errors
    ///
    /// Fails when the fields do not match the shape of `T`.
    pub fn form_as<T: DeserializeOwned>(&self) -> Result<T, serde_urlencoded::de::Error> {
        self.form.deserialize()
    }
}
