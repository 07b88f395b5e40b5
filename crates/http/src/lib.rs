//! An embeddable HTTP/1.x server.
//!
//! `nano-http` serves HTTP/1.0 and HTTP/1.1 from inside another program. One
//! acceptor thread accepts connections and a bounded worker pool serves each
//! of them for its whole keep-alive lifetime, so a fixed set of threads handles
//! many persistent connections.
//!
//! # Features
//!
//! - Keep-alive, pipelining and `Expect: 100-continue`
//! - Chunked request and response bodies
//! - Query strings, urlencoded forms and `multipart/form-data` uploads, with
//!   large file parts spilled to temp files
//! - Conditional and range requests with ETags
//! - Interceptors in front of a primary handler
//! - Configurable limits, worker pool and MIME table
//!
//! # Example
//!
//! ```no_run
//! use nano_http::handler::make_handler;
//! use nano_http::protocol::{Request, Response, StatusCode};
//! use nano_http::server::Server;
//! use tracing::info;
//!
//! let server = Server::builder()
//!     .address(([127, 0, 0, 1], 8080))
//!     .handler(make_handler(|request: &Request| {
//!         let name = request.query().get("name").unwrap_or("World").to_owned();
//!         async move { Ok::<_, std::io::Error>(Response::text(StatusCode::Ok, format!("Hello {name}!\r\n"))) }
//!     }))
//!     .build();
//!
//! server.start().expect("failed to start");
//! info!(port = ?server.listening_port(), "serving");
//!
//! std::thread::park();
//! ```
//!
//! # Architecture
//!
//! - [`server`]: lifecycle, acceptor thread, worker pool and connection registry
//! - [`connection`]: the per-connection protocol engine
//! - [`codec`]: request decoding and response encoding
//! - [`protocol`]: requests, responses, status codes, ranges and errors
//! - [`handler`]: the handler capability and the dispatcher
//! - [`temp_file`]: spill files for uploads
//! - [`config`]: limits, pool sizing and the MIME table
//!
//! # Error Handling
//!
//! - [`protocol::HttpError`]: failure of a request/response cycle
//! - [`protocol::ParseError`]: malformed or oversized requests, answered with
//!   400, 413, 431 or 505
//! - [`protocol::SendError`]: failures while writing a response
//! - [`server::ServerError`]: lifecycle failures
//!
//! A closed, timed out or force-closed connection is the normal end of a
//! session and is never reported as an error.
//!
//! # Limitations
//!
//! - HTTP/1.x only
//! - No TLS (use a reverse proxy for HTTPS)

pub mod codec;
pub mod config;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod temp_file;

mod utils;
pub(crate) use utils::ensure;
