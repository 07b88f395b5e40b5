//! Connection handling.
//!
//! A [`Session`] drives one accepted connection from its first request to the
//! moment it closes. Responses go out through a [`MessageWriter`], which
//! buffers the encoded head and body and writes them on flush.
//!
//! # Features
//!
//! - Keep-alive and pipelined requests
//! - `Expect: 100-continue`
//! - Fixed, chunked and ranged response bodies
//! - A read timeout on every socket read

mod message_writer;
mod session;

pub use message_writer::MessageWriter;
pub use session::Session;
pub use session::SessionContext;
