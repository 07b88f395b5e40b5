//! Request head decoding and response head encoding.
//!
//! [`HeaderDecoder`] turns the request line and header lines into a
//! [`RequestHeader`](crate::protocol::RequestHeader) plus the body framing.
//! [`HeaderEncoder`] writes the status line, the headers and the framing
//! header of a response.

mod header_decoder;
mod header_encoder;

pub use header_decoder::HeaderDecoder;
pub use header_encoder::HeaderEncoder;
