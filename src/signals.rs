//! Lifecycle flags and the signal watchers that set them.
//!
//! Signal handling is restricted to flag stores; the acceptor observes the
//! flags at its one-second readiness resolution. Broken pipes never reach
//! the process as a signal (the runtime masks SIGPIPE), so aborted client
//! reads surface only as `BrokenPipe` write errors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};

/// Cooperative shutdown and cache-refresh flags, owned by whoever drives
/// the acceptor and shared with the watcher tasks.
#[derive(Debug, Default)]
pub struct Lifecycle {
    shutdown: AtomicBool,
    refresh: AtomicBool,
}

impl Lifecycle {
    pub fn new() -> Arc<Lifecycle> {
        Arc::new(Lifecycle::default())
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn request_refresh(&self) {
        self.refresh.store(true, Ordering::Release);
    }

    /// Consumes a pending refresh request.
    pub fn take_refresh(&self) -> bool {
        self.refresh.swap(false, Ordering::AcqRel)
    }
}

/// Spawns the watcher tasks: SIGINT/SIGTERM request shutdown, SIGUSR1
/// requests a fingerprint-tree refresh.
pub fn spawn_watchers(lifecycle: Arc<Lifecycle>) -> std::io::Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;

    let flags = Arc::clone(&lifecycle);
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
        tracing::info!("termination signal received");
        flags.request_shutdown();
    });

    tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            tracing::info!("refresh signal received");
            lifecycle.request_refresh();
        }
    });

    Ok(())
}
