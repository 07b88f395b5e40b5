//! Server lifecycle and concurrency.
//!
//! A [`Server`] moves through [`ServerState`]s:
//! `Stopped → Starting → Listening → Stopping → Stopped`.
//!
//! Starting spawns one acceptor thread. It creates the listening socket
//! through the [`SocketFactory`], reports the outcome, and then accepts
//! connections until the server stops. Every accepted socket is registered in
//! the [`ConnectionRegistry`] and submitted to the [`WorkerPool`], where one
//! task serves it for its whole keep-alive lifetime.
//!
//! Stopping closes the listener, then force-closes every registered socket so
//! sessions blocked in a read or write end through their ordinary closed path.

mod acceptor;
mod error;
mod lifecycle;
mod pool;
mod registry;
mod socket;

pub use acceptor::ServerState;
pub use error::ServerError;
pub use error::ServerStartError;
pub use lifecycle::Server;
pub use lifecycle::ServerBuilder;
pub use pool::WorkerPool;
pub use registry::ConnectionRegistry;
pub use registry::ForceClose;
pub use registry::Registration;
pub use socket::DEFAULT_BACKLOG;
pub use socket::DefaultSocketFactory;
pub use socket::SocketFactory;
