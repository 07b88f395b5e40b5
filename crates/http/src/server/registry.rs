//! Tracking of open connections.
//!
//! Every accepted socket is registered for as long as its session runs, so a
//! stopping server can force-close the sockets of sessions blocked in a read or
//! write. The session then sees EOF or an I/O error and leaves through the
//! ordinary closed path.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

/// Something the registry can force closed from another thread.
pub trait ForceClose: Send + Sync {
    fn force_close(&self) -> io::Result<()>;
}

impl ForceClose for TcpStream {
    fn force_close(&self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            result => result,
        }
    }
}

#[derive(Default)]
struct Connections {
    next_id: u64,
    open: HashMap<u64, Arc<dyn ForceClose>>,
}

/// The open connections of a server.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<Connections>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `connection`; it stays registered until the guard is dropped.
    pub fn register(self: &Arc<Self>, connection: Arc<dyn ForceClose>) -> Registration {
        let mut connections = self.lock();
        let id = connections.next_id;
        connections.next_id += 1;
        connections.open.insert(id, connection);

        Registration { id, registry: Arc::clone(self) }
    }

    /// Force-closes every registered connection and returns how many there were.
    ///
    /// The connections are closed outside the lock, so sessions deregistering
    /// concurrently never wait on a slow close.
    pub fn close_all(&self) -> usize {
        let snapshot: Vec<_> = self.lock().open.values().cloned().collect();

        for connection in &snapshot {
            if let Err(e) = connection.force_close() {
                trace!(cause = %e, "failed to force close connection");
            }
        }
        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.lock().open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().open.is_empty()
    }

    fn deregister(&self, id: u64) {
        self.lock().open.remove(&id);
    }

    fn lock(&self) -> MutexGuard<'_, Connections> {
        // the map stays consistent even if a holder panicked
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry").field("open", &self.len()).finish()
    }
}

/// Keeps a connection registered while alive.
#[derive(Debug)]
pub struct Registration {
    id: u64,
    registry: Arc<ConnectionRegistry>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
