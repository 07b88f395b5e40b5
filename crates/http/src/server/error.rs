use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Failure of a lifecycle call on a [`Server`](crate::server::Server).
#[derive(Debug, Clone, Error)]
pub enum ServerError {
    #[error("the server is already running")]
    AlreadyRunning,

    #[error("failed to start the server: {source}")]
    Start {
        #[from]
        source: ServerStartError,
    },

    #[error("the server did not start listening within {0:?}")]
    StartTimeout(Duration),

    #[error("the acceptor thread was still alive after {0:?}")]
    StopTimeout(Duration),
}

impl ServerError {
    pub fn is_start_failure(&self) -> bool {
        matches!(self, ServerError::Start { .. })
    }
}

/// The listening socket could not be created, bound or registered.
///
/// Kept by the server so a non-blocking start can still be inspected through
/// [`Server::start_error`](crate::server::Server::start_error).
#[derive(Debug, Clone, Error)]
#[error("{source}")]
pub struct ServerStartError {
    #[source]
    source: Arc<io::Error>,
}

impl ServerStartError {
    pub fn new(source: io::Error) -> Self {
        Self { source: Arc::new(source) }
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }

    pub fn io_error(&self) -> &io::Error {
        &self.source
    }
}

impl From<io::Error> for ServerStartError {
    fn from(source: io::Error) -> Self {
        Self::new(source)
    }
}
