use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::config::DEFAULT_READ_TIMEOUT;

/// Pending connections the kernel queues before `accept`.
pub const DEFAULT_BACKLOG: i32 = 1024;

/// Creates the listening socket of a server.
///
/// `create` is called on the acceptor thread each time the server starts. The
/// returned listener must already be bound and listening, and must be in
/// non-blocking mode.
pub trait SocketFactory: Send + Sync + fmt::Debug {
    fn create(&self) -> io::Result<TcpListener>;

    fn bind_address(&self) -> SocketAddr;

    fn bind_port(&self) -> u16 {
        self.bind_address().port()
    }

    /// How long a session waits for the next bytes of a request.
    fn read_timeout(&self) -> Duration;
}

/// Plain TCP listener with `SO_REUSEADDR`.
#[derive(Debug, Clone)]
pub struct DefaultSocketFactory {
    address: SocketAddr,
    read_timeout: Duration,
    backlog: i32,
}

impl DefaultSocketFactory {
    pub fn new(address: SocketAddr) -> Self {
        Self { address, read_timeout: DEFAULT_READ_TIMEOUT, backlog: DEFAULT_BACKLOG }
    }

    #[must_use]
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    #[must_use]
    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }
}

impl SocketFactory for DefaultSocketFactory {
    fn create(&self) -> io::Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(self.address), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&self.address.into())?;
        socket.listen(self.backlog)?;
        socket.set_nonblocking(true)?;
        Ok(socket.into())
    }

    fn bind_address(&self) -> SocketAddr {
        self.address
    }

    fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}
