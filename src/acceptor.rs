//! The acceptor: multiplexes the plaintext and TLS listeners, performs the
//! TLS handshake inline, and feeds accepted connections to the worker pool.
//!
//! The loop wakes at least once a second, which is the resolution at which
//! the shutdown and refresh flags are observed. A refresh drains the pool
//! before the fingerprint tree is swapped, so no in-flight work ever sees a
//! partially constructed tree.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::fingerprint::FingerprintTree;
use crate::handler::{self, ServerContext};
use crate::mime::MimeMap;
use crate::pool::{Work, WorkerPool};
use crate::signals::Lifecycle;

const LISTEN_BACKLOG: u32 = 128;

pub struct Server {
    ctx: Arc<ServerContext>,
    http: TcpListener,
    https: TcpListener,
    tls: TlsAcceptor,
    pool: WorkerPool,
    tree: Arc<FingerprintTree>,
    lifecycle: Arc<Lifecycle>,
}

fn listen(port: u16) -> io::Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)))?;
    socket.listen(LISTEN_BACKLOG)
}

impl Server {
    /// Builds the fingerprint tree, binds both listeners, and starts the
    /// worker pool. Port 0 binds an ephemeral port.
    pub async fn bind(
        config: Config,
        tls: TlsAcceptor,
        lifecycle: Arc<Lifecycle>,
    ) -> io::Result<Server> {
        let config = Arc::new(config);
        let tree = Arc::new(FingerprintTree::build(&config.webroot)?);
        info!(entries = tree.len(), "fingerprint tree built");

        let http = listen(config.http_port)?;
        let https = listen(config.tls_port)?;
        let pool = WorkerPool::new(config.workers, config.queue_depth);

        Ok(Server {
            ctx: Arc::new(ServerContext {
                config,
                mime: MimeMap::from_system(),
            }),
            http,
            https,
            tls,
            pool,
            tree,
            lifecycle,
        })
    }

    pub fn http_addr(&self) -> io::Result<SocketAddr> {
        self.http.local_addr()
    }

    pub fn tls_addr(&self) -> io::Result<SocketAddr> {
        self.https.local_addr()
    }

    pub fn pool_counters(&self) -> crate::pool::PoolCounters {
        self.pool.counters()
    }

    /// Accept loop. Returns after a requested shutdown has drained the
    /// pool and joined the workers.
    pub async fn run(mut self) -> io::Result<()> {
        loop {
            if self.lifecycle.shutdown_requested() {
                break;
            }
            if self.lifecycle.take_refresh() {
                self.refresh().await;
            }
            tokio::select! {
                result = self.http.accept() => self.dispatch(result, false).await,
                result = self.https.accept() => self.dispatch(result, true).await,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
        }

        info!("shutting down");
        let Server { http, https, pool, .. } = self;
        // Listeners close before the drain so no new work arrives.
        drop(http);
        drop(https);
        pool.wait().await;
        pool.shutdown().await;
        Ok(())
    }

    async fn dispatch(
        &self,
        result: io::Result<(TcpStream, SocketAddr)>,
        encrypted: bool,
    ) {
        let (stream, peer) = match result {
            Ok(accepted) => accepted,
            Err(e) => {
                if e.kind() != io::ErrorKind::Interrupted {
                    warn!(error = %e, "accept failed");
                }
                return;
            }
        };
        let _ = stream.set_nodelay(true);

        let ctx = Arc::clone(&self.ctx);
        let tree = Arc::clone(&self.tree);
        let work: Work = if encrypted {
            let stream = match self.tls.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
            };
            Box::pin(handler::serve_connection(stream, peer, true, ctx, tree))
        } else {
            Box::pin(handler::serve_connection(stream, peer, false, ctx, tree))
        };

        if let Err(e) = self.pool.submit(work) {
            warn!(%peer, error = %e, "connection dropped");
        }
    }

    /// Drain-then-swap tree refresh. The pool is empty and idle for the
    /// whole rebuild, and a failed rebuild keeps the previous tree.
    async fn refresh(&mut self) {
        info!("refreshing fingerprint tree");
        self.pool.wait().await;
        let root = self.ctx.config.webroot.clone();
        match tokio::task::spawn_blocking(move || FingerprintTree::build(&root)).await {
            Ok(Ok(tree)) => {
                info!(entries = tree.len(), "fingerprint tree refreshed");
                self.tree = Arc::new(tree);
            }
            Ok(Err(e)) => warn!(error = %e, "tree rebuild failed, keeping previous tree"),
            Err(e) => warn!(error = %e, "tree rebuild task failed, keeping previous tree"),
        }
    }
}
