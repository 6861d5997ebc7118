use std::path::PathBuf;

use clap::Parser;

/// Command-line surface of the server binary.
#[derive(Parser, Debug)]
#[command(name = "snap", about = "Static-content HTTP/1.x origin server", version)]
pub struct Cli {
    /// Directory containing the `webpages` content root
    #[arg(short = 'w', long = "webroot", default_value = "./site")]
    pub webroot: PathBuf,

    /// Plaintext listening port
    #[arg(short = 'p', long = "http-port", default_value_t = 8080)]
    pub http_port: u16,

    /// TLS listening port
    #[arg(short = 's', long = "https-port", default_value_t = 8443)]
    pub https_port: u16,

    /// PEM certificate chain for the TLS listener
    #[arg(long = "cert", default_value = "./certs/cert.pem")]
    pub cert: PathBuf,

    /// PEM private key for the TLS listener
    #[arg(long = "key", default_value = "./certs/key.pem")]
    pub key: PathBuf,

    /// Number of pool workers
    #[arg(short = 't', long = "workers", default_value_t = 4)]
    pub workers: usize,

    /// Maximum number of queued connections awaiting a worker
    #[arg(short = 'q', long = "queue-depth", default_value_t = 64)]
    pub queue_depth: usize,
}

/// Immutable process-wide configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Canonicalized webroot, no trailing slash.
    pub webroot: String,
    pub http_port: u16,
    pub tls_port: u16,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub workers: usize,
    pub queue_depth: usize,
}

impl Config {
    /// Validates the CLI arguments into a runnable configuration.
    /// The webroot must exist; it is canonicalized so that later path
    /// validation only has to reason about the request target.
    pub fn from_cli(cli: Cli) -> std::io::Result<Config> {
        let webroot = cli.webroot.canonicalize()?;
        let mut webroot = webroot.to_string_lossy().into_owned();
        while webroot.len() > 1 && webroot.ends_with('/') {
            webroot.pop();
        }
        Ok(Config {
            webroot,
            http_port: cli.http_port,
            tls_port: cli.https_port,
            cert_path: cli.cert,
            key_path: cli.key,
            workers: cli.workers.max(1),
            queue_depth: cli.queue_depth.max(1),
        })
    }
}
