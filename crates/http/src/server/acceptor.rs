//! The accept loop and the state it reports to the server.

use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use socket2::SockRef;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{Session, SessionContext};
use crate::server::error::ServerStartError;
use crate::server::pool::WorkerPool;
use crate::server::registry::{ConnectionRegistry, Registration};
use crate::server::socket::SocketFactory;
use crate::temp_file::TempFileManagerFactory;

/// Lifecycle state of a [`Server`](crate::server::Server).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    Stopped,
    Starting,
    Listening,
    Stopping,
}

#[derive(Debug)]
struct StatusInner {
    state: ServerState,
    local_addr: Option<SocketAddr>,
    start_error: Option<ServerStartError>,
    acceptor_alive: bool,
}

/// State shared between the server handle and its acceptor thread.
#[derive(Debug)]
pub(crate) struct Status {
    inner: Mutex<StatusInner>,
    changed: Condvar,
}

impl Status {
    pub(crate) fn new() -> Self {
        let inner =
            StatusInner { state: ServerState::Stopped, local_addr: None, start_error: None, acceptor_alive: false };
        Self { inner: Mutex::new(inner), changed: Condvar::new() }
    }

    pub(crate) fn state(&self) -> ServerState {
        self.lock().state
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().local_addr
    }

    pub(crate) fn start_error(&self) -> Option<ServerStartError> {
        self.lock().start_error.clone()
    }

    pub(crate) fn acceptor_alive(&self) -> bool {
        self.lock().acceptor_alive
    }

    pub(crate) fn starting(&self) {
        self.update(|inner| {
            inner.state = ServerState::Starting;
            inner.local_addr = None;
            inner.start_error = None;
            inner.acceptor_alive = true;
        });
    }

    pub(crate) fn listening(&self, local_addr: SocketAddr) {
        self.update(|inner| {
            if inner.state == ServerState::Starting {
                inner.state = ServerState::Listening;
            }
            inner.local_addr = Some(local_addr);
        });
    }

    pub(crate) fn failed(&self, error: ServerStartError) {
        self.update(|inner| {
            inner.state = ServerState::Stopped;
            inner.start_error = Some(error);
        });
    }

    pub(crate) fn stopping(&self) {
        self.update(|inner| inner.state = ServerState::Stopping);
    }

    pub(crate) fn stopped(&self) {
        self.update(|inner| {
            inner.state = ServerState::Stopped;
            inner.local_addr = None;
        });
    }

    pub(crate) fn acceptor_exited(&self) {
        self.update(|inner| inner.acceptor_alive = false);
    }

    /// Waits while the server is starting and returns the state it moved to.
    pub(crate) fn wait_started(&self, timeout: Option<Duration>) -> ServerState {
        self.wait(timeout, |inner| inner.state == ServerState::Starting).state
    }

    /// Waits for the acceptor thread to finish and tells whether it did.
    pub(crate) fn wait_acceptor(&self, timeout: Option<Duration>) -> bool {
        !self.wait(timeout, |inner| inner.acceptor_alive).acceptor_alive
    }

    fn wait(
        &self,
        timeout: Option<Duration>,
        condition: impl FnMut(&mut StatusInner) -> bool,
    ) -> MutexGuard<'_, StatusInner> {
        let guard = self.lock();
        match timeout {
            Some(timeout) => {
                self.changed.wait_timeout_while(guard, timeout, condition).unwrap_or_else(PoisonError::into_inner).0
            }
            None => self.changed.wait_while(guard, condition).unwrap_or_else(PoisonError::into_inner),
        }
    }

    fn update(&self, f: impl FnOnce(&mut StatusInner)) {
        f(&mut self.lock());
        self.changed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, StatusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything the acceptor thread owns while the server runs.
pub(crate) struct Acceptor {
    pub(crate) socket_factory: Arc<dyn SocketFactory>,
    pub(crate) context: Arc<SessionContext>,
    pub(crate) temp_files: Arc<dyn TempFileManagerFactory>,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) status: Arc<Status>,
}

impl Acceptor {
    /// Body of the acceptor thread: bind, report, then accept until shut down.
    pub(crate) fn run(self) {
        let handle = self.pool.handle().clone();

        let listener = self.socket_factory.create().and_then(|listener| {
            let _guard = handle.enter();
            TcpListener::from_std(listener)
        });
        let listener = match listener.and_then(|listener| listener.local_addr().map(|addr| (listener, addr))) {
            Ok((listener, local_addr)) => {
                info!(%local_addr, "start listening");
                self.status.listening(local_addr);
                listener
            }
            Err(e) => {
                warn!(address = %self.socket_factory.bind_address(), cause = %e, "failed to bind server");
                self.status.failed(ServerStartError::new(e));
                return;
            }
        };

        handle.block_on(self.accept_loop(listener));
    }

    async fn accept_loop(&self, listener: TcpListener) {
        loop {
            let (stream, remote_addr) = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(cause = %e, "failed to accept");
                        continue;
                    }
                },
            };

            debug!(%remote_addr, "accepted connection");
            self.serve(stream, remote_addr);
        }

        info!("stop listening");
    }

    /// Registers `stream` and hands it to the worker pool.
    fn serve(&self, stream: TcpStream, remote_addr: SocketAddr) {
        let registration = match self.register(&stream) {
            Ok(registration) => registration,
            Err(e) => {
                warn!(%remote_addr, cause = %e, "failed to register connection");
                return;
            }
        };

        let context = Arc::clone(&self.context);
        let temp_files = self.temp_files.create();

        self.pool.submit(async move {
            let _registration = registration;
            let (reader, writer) = stream.into_split();

            let session = Session::new(reader, writer, Some(remote_addr), temp_files, context);
            match session.run().await {
                Ok(()) => debug!(%remote_addr, "connection finished"),
                Err(e) => warn!(%remote_addr, cause = %e, "connection failed"),
            }
        });
    }

    fn register(&self, stream: &TcpStream) -> std::io::Result<Registration> {
        let handle: std::net::TcpStream = SockRef::from(stream).try_clone()?.into();
        Ok(self.registry.register(Arc::new(handle)))
    }
}
