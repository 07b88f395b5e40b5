//! Wire format of HTTP/1.x messages.
//!
//! [`RequestDecoder`] turns the bytes read from a connection into request
//! heads and body items; [`ResponseEncoder`] turns response heads and body
//! items into bytes. Both are `tokio_util` codecs over `BytesMut` and keep
//! just enough state to frame one message after another.

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use header::{HeaderDecoder, HeaderEncoder};
pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
