//! Body framing: `Content-Length`, `Transfer-Encoding: chunked`, or no body.
//!
//! [`PayloadDecoder`] reads request bodies and [`PayloadEncoder`] writes
//! response bodies. Both pick their strategy from a
//! [`PayloadSize`](crate::protocol::PayloadSize).

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
