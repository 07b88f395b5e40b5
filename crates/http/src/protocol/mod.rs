//! Protocol types shared by the codec, the sessions and the handlers.
//!
//! - `message`: streamed message items produced by the decoder
//! - `request`: the request head and the fully read [`Request`]
//! - `response`: [`Response`] and its body kinds
//! - `status`: [`StatusCode`], including custom codes
//! - `params`: percent decoding and query/form [`Parameters`]
//! - [`multipart`]: `multipart/form-data` bodies and uploaded files
//! - [`range`]: ETags, conditional requests and byte ranges for files
//! - `error`: the error taxonomy of a connection

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::Request;
pub use request::RequestHeader;

mod response;
pub(crate) use response::range_len;
pub use response::Response;
pub use response::ResponseBody;
pub use response::ResponseHead;
pub use response::SeekRead;

mod status;
pub use status::StatusCode;

mod params;
pub use params::Parameters;
pub use params::decode_path;
pub use params::decode_percent;

pub mod multipart;
pub use multipart::UploadedFile;

pub mod range;
pub use range::FileResource;

mod error;
pub use error::ConnectionClosed;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
pub use error::UnknownStatusCode;
