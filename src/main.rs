use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use snap::acceptor::Server;
use snap::config::{Cli, Config};
use snap::signals::{self, Lifecycle};
use snap::tls;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli(cli).context("invalid configuration")?;
    let tls = tls::load_acceptor(&config.cert_path, &config.key_path)
        .context("loading TLS context")?;

    let lifecycle = Lifecycle::new();
    signals::spawn_watchers(Arc::clone(&lifecycle)).context("installing signal watchers")?;

    let server = Server::bind(config, tls, lifecycle)
        .await
        .context("initializing listeners")?;
    tracing::info!(
        http = %server.http_addr()?,
        https = %server.tls_addr()?,
        "snap serving"
    );
    server.run().await.context("acceptor loop")?;
    tracing::info!("shutdown complete");
    Ok(())
}
