//! Response status codes.
//!
//! [`StatusCode`] is a closed set of the codes this server knows by name plus
//! an open [`StatusCode::Custom`] variant, so a response can be built for any
//! numeric code without failing.

use std::fmt;

use crate::protocol::UnknownStatusCode;

macro_rules! status_codes {
    ($( ($variant:ident, $code:literal, $reason:literal); )+) => {
        /// An HTTP response status: a known code with its reason phrase, or a custom pair.
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum StatusCode {
            $(
                #[doc = concat!("`", stringify!($code), " ", $reason, "`")]
                $variant,
            )+
            /// Any code that has no named variant.
            Custom { code: u16, description: String },
        }

        impl StatusCode {
            /// The numeric status code.
            pub fn code(&self) -> u16 {
                match self {
                    $( Self::$variant => $code, )+
                    Self::Custom { code, .. } => *code,
                }
            }

            /// The reason phrase written after the code in the status line.
            pub fn reason(&self) -> &str {
                match self {
                    $( Self::$variant => $reason, )+
                    Self::Custom { description, .. } => description,
                }
            }

            /// Looks up a named status.
            ///
            /// # Errors
            ///
            /// Returns [`UnknownStatusCode`] when `code` has no named variant.
            pub fn from_code(code: u16) -> Result<Self, UnknownStatusCode> {
                match code {
                    $( $code => Ok(Self::$variant), )+
                    _ => Err(UnknownStatusCode::new(code)),
                }
            }
        }
    };
}

status_codes! {
    (SwitchingProtocols, 101, "Switching Protocols");

    (Ok, 200, "OK");
    (Created, 201, "Created");
    (Accepted, 202, "Accepted");
    (NoContent, 204, "No Content");
    (PartialContent, 206, "Partial Content");
    (MultiStatus, 207, "Multi-Status");

    (MovedPermanently, 301, "Moved Permanently");
    (Found, 302, "Found");
    (SeeOther, 303, "See Other");
    (NotModified, 304, "Not Modified");
    (TemporaryRedirect, 307, "Temporary Redirect");

    (BadRequest, 400, "Bad Request");
    (Unauthorized, 401, "Unauthorized");
    (Forbidden, 403, "Forbidden");
    (NotFound, 404, "Not Found");
    (MethodNotAllowed, 405, "Method Not Allowed");
    (NotAcceptable, 406, "Not Acceptable");
    (RequestTimeout, 408, "Request Timeout");
    (Conflict, 409, "Conflict");
    (Gone, 410, "Gone");
    (LengthRequired, 411, "Length Required");
    (PreconditionFailed, 412, "Precondition Failed");
    (PayloadTooLarge, 413, "Payload Too Large");
    (UnsupportedMediaType, 415, "Unsupported Media Type");
    (RangeNotSatisfiable, 416, "Requested Range Not Satisfiable");
    (ExpectationFailed, 417, "Expectation Failed");
    (TooManyRequests, 429, "Too Many Requests");
    (RequestHeaderFieldsTooLarge, 431, "Request Header Fields Too Large");

    (InternalServerError, 500, "Internal Server Error");
    (NotImplemented, 501, "Not Implemented");
    (ServiceUnavailable, 503, "Service Unavailable");
    (UnsupportedHttpVersion, 505, "HTTP Version Not Supported");
}

impl StatusCode {
    /// Looks up a named status, falling back to a custom one carrying `description`.
    pub fn from_code_or(code: u16, description: impl Into<String>) -> Self {
        Self::from_code(code).unwrap_or_else(|_| Self::Custom { code, description: description.into() })
    }

    pub fn custom(code: u16, description: impl Into<String>) -> Self {
        Self::Custom { code, description: description.into() }
    }

    /// `code reason`, e.g. `404 Not Found`.
    pub fn description(&self) -> String {
        self.to_string()
    }

    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.code())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code())
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code())
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.code())
    }

    /// Whether a response with this status never carries a body.
    pub fn is_bodiless(&self) -> bool {
        self.is_informational() || matches!(self, Self::NoContent | Self::NotModified)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = UnknownStatusCode;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}
