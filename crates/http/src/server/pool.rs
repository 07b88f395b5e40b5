//! The worker pool sessions run on.
//!
//! A dedicated multi-threaded tokio runtime provides the OS threads. A
//! semaphore bounds how many sessions run at once; tasks submitted beyond that
//! wait for a permit in an unbounded backlog.

use std::io;
use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::config::PoolConfig;

#[derive(Debug)]
pub struct WorkerPool {
    runtime: Runtime,
    permits: Arc<Semaphore>,
    max_sessions: usize,
}

impl WorkerPool {
    /// Starts the worker threads.
    ///
    /// # Errors
    ///
    /// Fails when the runtime cannot spawn its threads.
    pub fn new(config: &PoolConfig) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.core_threads())
            .thread_name(config.thread_name())
            .thread_keep_alive(config.idle_timeout())
            .enable_all()
            .build()?;

        let max_sessions = config.max_sessions();
        Ok(Self { runtime, permits: Arc::new(Semaphore::new(max_sessions)), max_sessions })
    }

    /// Queues `task`; it starts once fewer than `max_sessions` tasks run.
    pub fn submit<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                trace!("worker pool closed before the task started");
                return;
            };
            task.await;
        })
    }

    /// Tasks currently holding a permit.
    pub fn running(&self) -> usize {
        self.max_sessions - self.permits.available_permits()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    /// Stops the worker threads without waiting; unfinished tasks are dropped.
    pub fn shutdown(self) {
        self.permits.close();
        self.runtime.shutdown_background();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn running_tasks_never_exceed_max_sessions() {
        let pool = WorkerPool::new(&PoolConfig::new().with_core_threads(4).with_max_sessions(2)).unwrap();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                pool.submit(async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        pool.handle().block_on(async {
            for task in tasks {
                task.await.unwrap();
            }
        });

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.running(), 0);
        pool.shutdown();
    }

    #[test]
    fn waiting_tasks_are_dropped_on_shutdown() {
        let pool = WorkerPool::new(&PoolConfig::new().with_max_sessions(1)).unwrap();
        let finished = Arc::new(AtomicUsize::new(0));

        let blocker = pool.submit(std::future::pending());
        let waiting = {
            let finished = Arc::clone(&finished);
            pool.submit(async move {
                finished.fetch_add(1, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(pool.running(), 1);
        assert!(!blocker.is_finished());
        assert!(!waiting.is_finished());

        pool.shutdown();
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }
}
