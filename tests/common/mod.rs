//! Shared harness: an in-process server on ephemeral ports over a
//! tempdir webroot, plus raw-socket request helpers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use rustls_pki_types::{CertificateDer, ServerName};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use snap::acceptor::Server;
use snap::config::Config;
use snap::signals::Lifecycle;

/// Tempdir layout: `site/webpages/` for content, `certs/` for the
/// throwaway TLS material.
pub struct TestSite {
    pub tmp: TempDir,
}

impl TestSite {
    pub fn new() -> TestSite {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join("site/webpages")).expect("webpages dir");
        std::fs::create_dir_all(tmp.path().join("certs")).expect("certs dir");
        TestSite { tmp }
    }

    pub fn webroot(&self) -> PathBuf {
        self.tmp.path().join("site")
    }

    pub fn pages(&self) -> PathBuf {
        self.webroot().join("webpages")
    }

    pub fn write_page(&self, rel: &str, contents: &[u8]) {
        let path = self.pages().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("page parent dir");
        }
        std::fs::write(path, contents).expect("write page");
    }
}

pub struct TestServer {
    pub http: SocketAddr,
    pub https: SocketAddr,
    pub lifecycle: Arc<Lifecycle>,
    pub cert: CertificateDer<'static>,
    task: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    pub async fn stop(self) {
        self.lifecycle.request_shutdown();
        let _ = self.task.await;
    }

    /// Awaits a shutdown triggered elsewhere (e.g. by a signal).
    pub async fn wait_stopped(self) -> std::io::Result<()> {
        tokio::time::timeout(std::time::Duration::from_secs(10), self.task)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
    }

    pub fn abandon(self) {
        self.task.abort();
    }
}

pub async fn start_server(site: &TestSite) -> TestServer {
    let signed = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .expect("self-signed certificate");
    let cert_path = site.tmp.path().join("certs/cert.pem");
    let key_path = site.tmp.path().join("certs/key.pem");
    std::fs::write(&cert_path, signed.cert.pem()).expect("write cert");
    std::fs::write(&key_path, signed.key_pair.serialize_pem()).expect("write key");

    let webroot = site
        .webroot()
        .canonicalize()
        .expect("canonical webroot")
        .to_string_lossy()
        .into_owned();
    let config = Config {
        webroot,
        http_port: 0,
        tls_port: 0,
        cert_path: cert_path.clone(),
        key_path: key_path.clone(),
        workers: 2,
        queue_depth: 32,
    };
    let tls = snap::tls::load_acceptor(&config.cert_path, &config.key_path)
        .expect("TLS acceptor");
    let lifecycle = Lifecycle::new();
    let server = Server::bind(config, tls, Arc::clone(&lifecycle))
        .await
        .expect("bind server");
    let http = server.http_addr().expect("http addr");
    let https = server.tls_addr().expect("tls addr");
    let task = tokio::spawn(server.run());

    TestServer {
        http,
        https,
        lifecycle,
        cert: signed.cert.der().clone(),
        task,
    }
}

/// Sends one raw request and reads exactly one response.
pub async fn send_request(addr: SocketAddr, raw: &str) -> (String, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(raw.as_bytes()).await.expect("send");
    read_response(&mut stream).await
}

/// Reads one response: the full head, then exactly `Content-Length`
/// body bytes.
pub async fn read_response<S: AsyncRead + Unpin>(stream: &mut S) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut tmp).await.expect("read head");
        assert!(
            n > 0,
            "connection closed before a full head: {:?}",
            String::from_utf8_lossy(&buf)
        );
        buf.extend_from_slice(&tmp[..n]);
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let content_length = header_value(&head, "Content-Length")
        .map(|v| v.parse::<usize>().expect("content length"))
        .unwrap_or(0);
    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut tmp).await.expect("read body");
        assert!(n > 0, "connection closed mid-body");
        body.extend_from_slice(&tmp[..n]);
    }
    body.truncate(content_length);
    (head, body)
}

pub fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines()
        .find_map(|line| line.strip_prefix(name).and_then(|rest| rest.strip_prefix(": ")))
}

pub fn status_of(head: &str) -> u16 {
    head.split(' ')
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status line")
}

/// Opens a verified TLS client connection to the test server.
pub async fn tls_connect(server: &TestServer) -> tokio_rustls::client::TlsStream<TcpStream> {
    let mut roots = rustls::RootCertStore::empty();
    roots.add(server.cert.clone()).expect("trust anchor");
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
    let tcp = TcpStream::connect(server.https).await.expect("connect tls port");
    connector
        .connect(ServerName::try_from("localhost").expect("server name"), tcp)
        .await
        .expect("tls handshake")
}
