//! Bounded worker pool.
//!
//! A fixed set of workers drains a FIFO queue of boxed work futures. The
//! queue is bounded: submissions past the configured depth fail and are
//! counted as rejected. `wait` blocks until the queue is empty and every
//! worker is idle, which is the barrier the acceptor uses before swapping
//! the fingerprint tree.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

pub type Work = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("worker pool is shutting down")]
    ShuttingDown,
    #[error("work queue is full")]
    QueueFull,
}

/// Accounting snapshot. Invariant:
/// `completed + rejected + queued + busy == submitted`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounters {
    pub submitted: u64,
    pub completed: u64,
    pub rejected: u64,
    pub queued: usize,
    pub busy: usize,
}

struct Shared {
    counters: Mutex<PoolCounters>,
    drained: Notify,
    shutdown: AtomicBool,
}

pub struct WorkerPool {
    tx: mpsc::Sender<Work>,
    shared: Arc<Shared>,
    capacity: usize,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(workers: usize, queue_depth: usize) -> WorkerPool {
        let workers = workers.max(1);
        let capacity = queue_depth.max(1);
        let (tx, rx) = mpsc::channel::<Work>(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shared = Arc::new(Shared {
            counters: Mutex::new(PoolCounters::default()),
            drained: Notify::new(),
            shutdown: AtomicBool::new(false),
        });

        let handles = (0..workers)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    tracing::debug!(worker, "worker started");
                    loop {
                        // The receiver lock is held only across the dequeue,
                        // never while the work runs.
                        let work = { rx.lock().await.recv().await };
                        let work = match work {
                            Some(work) => work,
                            None => break,
                        };
                        {
                            let mut c = shared.counters.lock();
                            c.queued -= 1;
                            c.busy += 1;
                        }
                        work.await;
                        {
                            let mut c = shared.counters.lock();
                            c.busy -= 1;
                            c.completed += 1;
                        }
                        shared.drained.notify_waiters();
                    }
                    tracing::debug!(worker, "worker stopped");
                })
            })
            .collect();

        WorkerPool {
            tx,
            shared,
            capacity,
            workers: handles,
        }
    }

    /// Enqueues one unit of work. Fails when shutdown is set or the queue
    /// is at capacity; rejected units are counted.
    pub fn submit(&self, work: Work) -> Result<(), SubmitError> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(SubmitError::ShuttingDown);
        }
        let mut c = self.shared.counters.lock();
        c.submitted += 1;
        if c.queued >= self.capacity {
            c.rejected += 1;
            return Err(SubmitError::QueueFull);
        }
        match self.tx.try_send(work) {
            Ok(()) => {
                c.queued += 1;
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                c.rejected += 1;
                Err(SubmitError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                c.rejected += 1;
                Err(SubmitError::ShuttingDown)
            }
        }
    }

    /// Blocks until the queue is empty and no worker is busy.
    pub async fn wait(&self) {
        loop {
            let drained = self.shared.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            {
                let c = self.shared.counters.lock();
                if c.queued == 0 && c.busy == 0 {
                    return;
                }
            }
            drained.await;
        }
    }

    pub fn counters(&self) -> PoolCounters {
        *self.shared.counters.lock()
    }

    /// Sets shutdown, lets workers drain the residual queue, joins them,
    /// and reports the final counters.
    pub async fn shutdown(mut self) -> PoolCounters {
        self.shared.shutdown.store(true, Ordering::Release);
        drop(self.tx);
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
        let counters = *self.shared.counters.lock();
        tracing::info!(
            submitted = counters.submitted,
            completed = counters.completed,
            rejected = counters.rejected,
            "worker pool stopped"
        );
        counters
    }
}
