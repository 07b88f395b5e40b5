use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::StatusCode;
use crate::protocol::multipart::MultipartError;

/// Failure of one request/response cycle on a connection.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },

    /// The connection went away. This is how every session normally ends.
    #[error("{source}")]
    Closed {
        #[from]
        source: ConnectionClosed,
    },
}

impl HttpError {
    pub fn is_closed(&self) -> bool {
        matches!(self, HttpError::Closed { .. })
    }
}

/// Why a connection stopped delivering requests.
#[derive(Debug, Error)]
pub enum ConnectionClosed {
    #[error("peer closed the connection")]
    Eof,

    #[error("no data received within {0:?}")]
    Timeout(Duration),

    #[error("connection aborted: {0}")]
    Io(#[source] io::Error),
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("body size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeBody { current_size: u64, max_size: u64 },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("invalid multipart body: {source}")]
    InvalidMultipart {
        #[from]
        source: MultipartError,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn too_large_body(current_size: u64, max_size: u64) -> Self {
        Self::TooLargeBody { current_size, max_size }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// The status of the error response sent back for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::TooLargeHeader { .. } | Self::TooManyHeaders { .. } => StatusCode::RequestHeaderFieldsTooLarge,
            Self::TooLargeBody { .. } => StatusCode::PayloadTooLarge,
            Self::InvalidVersion(_) => StatusCode::UnsupportedHttpVersion,
            _ => StatusCode::BadRequest,
        }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// A numeric status with no named [`StatusCode`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown status code {code}")]
pub struct UnknownStatusCode {
    code: u16,
}

impl UnknownStatusCode {
    pub fn new(code: u16) -> Self {
        Self { code }
    }

    pub fn code(&self) -> u16 {
        self.code
    }
}
