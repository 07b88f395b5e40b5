use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{DEFAULT_READ_TIMEOUT, MimeTypes, PoolConfig, ServerConfig, SessionConfig};
use crate::connection::SessionContext;
use crate::handler::{Dispatcher, Handler, NotFound};
use crate::server::acceptor::{Acceptor, ServerState, Status};
use crate::server::error::{ServerError, ServerStartError};
use crate::server::pool::WorkerPool;
use crate::server::registry::ConnectionRegistry;
use crate::server::socket::{DefaultSocketFactory, SocketFactory};
use crate::temp_file::{DefaultTempFileManagerFactory, TempFileManagerFactory};

const ACCEPTOR_THREAD_NAME: &str = "nano-http-acceptor";

pub struct ServerBuilder {
    address: SocketAddr,
    read_timeout: Duration,
    socket_factory: Option<Arc<dyn SocketFactory>>,
    interceptors: Vec<Arc<dyn Handler>>,
    handler: Option<Arc<dyn Handler>>,
    temp_file_manager_factory: Option<Arc<dyn TempFileManagerFactory>>,
    pool: PoolConfig,
    session: SessionConfig,
    mime_types: MimeTypes,
}

impl ServerBuilder {
    fn new() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            read_timeout: DEFAULT_READ_TIMEOUT,
            socket_factory: None,
            interceptors: Vec::new(),
            handler: None,
            temp_file_manager_factory: None,
            pool: PoolConfig::default(),
            session: SessionConfig::default(),
            mime_types: MimeTypes::default(),
        }
    }

    /// Address of the default socket factory, ignored with a custom one.
    #[must_use]
    pub fn address(mut self, address: impl Into<SocketAddr>) -> Self {
        self.address = address.into();
        self
    }

    /// Read timeout of the default socket factory, ignored with a custom one.
    #[must_use]
    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    #[must_use]
    pub fn socket_factory(mut self, socket_factory: impl SocketFactory + 'static) -> Self {
        self.socket_factory = Some(Arc::new(socket_factory));
        self
    }

    /// Adds an interceptor; interceptors run in the order they are added.
    #[must_use]
    pub fn interceptor(mut self, interceptor: impl Handler + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Sets the primary handler, which answers `404 Not Found` by default.
    #[must_use]
    pub fn handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn temp_file_manager_factory(mut self, factory: impl TempFileManagerFactory + 'static) -> Self {
        self.temp_file_manager_factory = Some(Arc::new(factory));
        self
    }

    #[must_use]
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    #[must_use]
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    #[must_use]
    pub fn mime_types(mut self, mime_types: MimeTypes) -> Self {
        self.mime_types = mime_types;
        self
    }

    pub fn build(self) -> Server {
        let socket_factory = self
            .socket_factory
            .unwrap_or_else(|| Arc::new(DefaultSocketFactory::new(self.address).with_read_timeout(self.read_timeout)));
        let handler = self.handler.unwrap_or_else(|| Arc::new(NotFound));
        let temp_files =
            self.temp_file_manager_factory.unwrap_or_else(|| Arc::new(DefaultTempFileManagerFactory::default()));

        let config = ServerConfig::new(self.session, self.pool, self.mime_types);
        let dispatcher = Dispatcher::new(self.interceptors, handler);
        let context = Arc::new(SessionContext::new(&config, dispatcher, socket_factory.read_timeout()));

        Server {
            socket_factory,
            context,
            temp_files,
            pool_config: config.pool().clone(),
            registry: Arc::new(ConnectionRegistry::new()),
            status: Arc::new(Status::new()),
            running: Mutex::new(None),
        }
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("address", &self.address)
            .field("read_timeout", &self.read_timeout)
            .field("interceptors", &self.interceptors.len())
            .field("pool", &self.pool)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// The acceptor thread and worker pool of a started server.
struct Running {
    shutdown: CancellationToken,
    acceptor: JoinHandle<()>,
    pool: Arc<WorkerPool>,
}

impl Running {
    /// Releases the threads once the acceptor has exited.
    fn finish(self, acceptor_finished: bool) {
        if acceptor_finished && self.acceptor.join().is_err() {
            warn!("acceptor thread panicked");
        }

        // the acceptor holds the other reference until it exits
        match Arc::try_unwrap(self.pool) {
            Ok(pool) => pool.shutdown(),
            Err(_still_shared) => warn!("acceptor still running, worker pool left to it"),
        }
    }
}

/// An embeddable HTTP server.
///
/// One acceptor thread accepts connections and hands each one to a bounded
/// worker pool, where a [`Session`](crate::connection::Session) serves it for
/// its whole keep-alive lifetime. A server can be started again after it was
/// stopped. Dropping a running server stops it.
///
/// ```no_run
/// use nano_http::handler::make_handler;
/// use nano_http::protocol::{Request, Response, StatusCode};
/// use nano_http::server::Server;
///
/// let server = Server::builder()
///     .address(([127, 0, 0, 1], 8080))
///     .handler(make_handler(|_: &Request| async { Ok::<_, std::io::Error>(Response::text(StatusCode::Ok, "hello")) }))
///     .build();
///
/// server.start().expect("port 8080 is free");
/// // ...
/// server.stop();
/// ```
pub struct Server {
    socket_factory: Arc<dyn SocketFactory>,
    context: Arc<SessionContext>,
    temp_files: Arc<dyn TempFileManagerFactory>,
    pool_config: PoolConfig,
    registry: Arc<ConnectionRegistry>,
    status: Arc<Status>,
    running: Mutex<Option<Running>>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Starts the server and blocks until it listens.
    ///
    /// # Errors
    ///
    /// [`ServerError::AlreadyRunning`] if the server runs, or
    /// [`ServerError::Start`] if the listening socket could not be created.
    pub fn start(&self) -> Result<(), ServerError> {
        self.start_blocking(None)
    }

    /// Like [`start`](Self::start), waiting at most `timeout`.
    ///
    /// On [`ServerError::StartTimeout`] the server keeps starting in the
    /// background; poll it or [`stop`](Self::stop) it.
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start), plus [`ServerError::StartTimeout`].
    pub fn start_timeout(&self, timeout: Duration) -> Result<(), ServerError> {
        self.start_blocking(Some(timeout))
    }

    /// Starts the server without waiting for it to listen.
    ///
    /// A failure to bind is not returned here; watch [`is_listening`](Self::is_listening),
    /// [`is_interrupted`](Self::is_interrupted) and [`start_error`](Self::start_error).
    ///
    /// # Errors
    ///
    /// [`ServerError::AlreadyRunning`] if the server runs or is still stopping,
    /// [`ServerError::Start`] if the worker pool or the acceptor thread could
    /// not be created.
    pub fn start_async(&self) -> Result<(), ServerError> {
        let mut running = self.lock_running();

        if let Some(previous) = running.take() {
            if self.status.acceptor_alive() {
                *running = Some(previous);
                return Err(ServerError::AlreadyRunning);
            }
            // an earlier start that never got to listen
            previous.finish(true);
        } else if self.status.state() == ServerState::Stopping {
            return Err(ServerError::AlreadyRunning);
        }

        self.status.starting();
        match self.spawn() {
            Ok(started) => {
                *running = Some(started);
                Ok(())
            }
            Err(e) => {
                let error = ServerStartError::new(e);
                self.status.failed(error.clone());
                self.status.acceptor_exited();
                Err(error.into())
            }
        }
    }

    fn spawn(&self) -> io::Result<Running> {
        let pool = Arc::new(WorkerPool::new(&self.pool_config)?);
        let shutdown = CancellationToken::new();

        let acceptor = Acceptor {
            socket_factory: Arc::clone(&self.socket_factory),
            context: Arc::clone(&self.context),
            temp_files: Arc::clone(&self.temp_files),
            registry: Arc::clone(&self.registry),
            pool: Arc::clone(&pool),
            shutdown: shutdown.clone(),
            status: Arc::clone(&self.status),
        };

        let acceptor = thread::Builder::new().name(ACCEPTOR_THREAD_NAME.to_owned()).spawn(move || {
            let status = Arc::clone(&acceptor.status);
            acceptor.run();
            status.acceptor_exited();
        })?;

        Ok(Running { shutdown, acceptor, pool })
    }

    fn start_blocking(&self, timeout: Option<Duration>) -> Result<(), ServerError> {
        self.start_async()?;

        match self.status.wait_started(timeout) {
            ServerState::Listening => Ok(()),
            ServerState::Starting => Err(ServerError::StartTimeout(timeout.unwrap_or_default())),
            ServerState::Stopped | ServerState::Stopping => {
                let error = self
                    .status
                    .start_error()
                    .unwrap_or_else(|| ServerStartError::new(io::Error::other("server stopped while starting")));
                self.reap_failed_start();
                Err(error.into())
            }
        }
    }

    fn reap_failed_start(&self) {
        let mut running = self.lock_running();
        if self.status.state() == ServerState::Stopped
            && let Some(previous) = running.take()
        {
            let finished = self.status.wait_acceptor(None);
            previous.finish(finished);
        }
    }

    /// Stops the server and waits for the acceptor thread to exit.
    ///
    /// Calling it on a stopped server does nothing.
    pub fn stop(&self) {
        self.stop_blocking(None);
    }

    /// Like [`stop`](Self::stop), waiting at most `timeout` for the acceptor.
    ///
    /// # Errors
    ///
    /// [`ServerError::StopTimeout`] if the acceptor thread is still alive
    /// after `timeout`. The server counts as stopped either way.
    pub fn stop_timeout(&self, timeout: Duration) -> Result<(), ServerError> {
        if self.stop_blocking(Some(timeout)) { Ok(()) } else { Err(ServerError::StopTimeout(timeout)) }
    }

    /// Signals the server to stop and returns at once.
    ///
    /// The listener and every open connection are closed right away; the
    /// threads are released in the background.
    pub fn stop_async(&self) {
        let Some(running) = self.signal_stop() else {
            return;
        };

        let status = Arc::clone(&self.status);
        let reaper = thread::Builder::new().name(format!("{ACCEPTOR_THREAD_NAME}-stop")).spawn(move || {
            let finished = status.wait_acceptor(None);
            running.finish(finished);
            status.stopped();
        });

        if let Err(e) = reaper {
            warn!(cause = %e, "failed to spawn the stop thread, the worker pool is left running");
            self.status.stopped();
        }
    }

    fn stop_blocking(&self, timeout: Option<Duration>) -> bool {
        let Some(running) = self.signal_stop() else {
            return true;
        };

        let finished = self.status.wait_acceptor(timeout);
        running.finish(finished);
        self.status.stopped();
        finished
    }

    /// Closes the listener and all connections, returning what is left to release.
    fn signal_stop(&self) -> Option<Running> {
        let running = self.lock_running().take()?;
        self.status.stopping();

        running.shutdown.cancel();
        let closed = self.registry.close_all();
        info!(closed_connections = closed, "stopping server");

        Some(running)
    }

    /// Whether the server is bound and accepting connections.
    pub fn is_listening(&self) -> bool {
        self.status.state() == ServerState::Listening
    }

    /// Whether the server is neither listening nor on its way there.
    pub fn is_interrupted(&self) -> bool {
        matches!(self.status.state(), ServerState::Stopped | ServerState::Stopping)
    }

    /// Why the last start attempt failed, if it did.
    pub fn start_error(&self) -> Option<ServerStartError> {
        self.status.start_error()
    }

    pub fn state(&self) -> ServerState {
        self.status.state()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.status.local_addr()
    }

    /// The port actually bound, which differs from the configured one for port `0`.
    pub fn listening_port(&self) -> Option<u16> {
        self.local_addr().map(|addr| addr.port())
    }

    /// Connections currently served or waiting for a worker.
    pub fn active_connections(&self) -> usize {
        self.registry.len()
    }

    pub fn socket_factory(&self) -> &dyn SocketFactory {
        self.socket_factory.as_ref()
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("socket_factory", &self.socket_factory)
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("active_connections", &self.active_connections())
            .finish_non_exhaustive()
    }
}
