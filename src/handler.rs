//! Per-connection request handling.
//!
//! One worker owns the connection for its whole lifetime and loops over
//! sequential keep-alive requests: read, parse, upgrade check, method
//! dispatch, path resolution, cache probe, conditional evaluation, open,
//! serve. Every exit path shuts the stream down (close_notify for TLS).

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::fingerprint::FingerprintTree;
use crate::mime::MimeMap;
use crate::request::{self, Method, ParseError, Request, MAX_REQUEST_SIZE};
use crate::response::{self, BodyError, ResolvedRange, ResponseHead, Status};
use crate::status_page;

/// Read timeout for the first request on a connection.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Read timeout while waiting for a follow-up keep-alive request.
pub const KEEPALIVE_TIMEOUT_SECS: u64 = 5;

pub trait ClientStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ClientStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Read-only state shared by every worker.
pub struct ServerContext {
    pub config: Arc<Config>,
    pub mime: MimeMap,
}

enum ReadOutcome {
    Request(Vec<u8>),
    TooLarge,
    Closed,
}

/// Whether the connection survives the response.
enum Flow {
    KeepAlive,
    Close,
}

/// What one request resolved to, reported at the single emission point.
struct Served {
    status: Status,
    close: bool,
}

/// Serves one accepted connection to completion.
pub async fn serve_connection<S: ClientStream>(
    mut stream: S,
    peer: SocketAddr,
    encrypted: bool,
    ctx: Arc<ServerContext>,
    tree: Arc<FingerprintTree>,
) {
    let mut first = true;
    loop {
        let outcome = match read_request(&mut stream, first).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(%peer, error = %e, "read failed");
                break;
            }
        };
        first = false;
        let raw = match outcome {
            ReadOutcome::Closed => break,
            ReadOutcome::TooLarge => {
                let _ =
                    response::send_error(&mut stream, Status::BadRequest, None, false).await;
                // Lingering close: drain the oversized head so a reset
                // cannot outrun the response.
                drain_remaining(&mut stream).await;
                break;
            }
            ReadOutcome::Request(raw) => raw,
        };
        match handle_request(&mut stream, &raw, peer, encrypted, &ctx, &tree).await {
            Flow::KeepAlive => continue,
            Flow::Close => break,
        }
    }
    let _ = stream.shutdown().await;
}

/// Reads client bytes to EOF, bounded by the keep-alive timeout.
async fn drain_remaining<S: ClientStream>(stream: &mut S) {
    let limit = Duration::from_secs(KEEPALIVE_TIMEOUT_SECS);
    let mut sink = [0u8; 1024];
    loop {
        match timeout(limit, stream.read(&mut sink)).await {
            Ok(Ok(n)) if n > 0 => continue,
            _ => break,
        }
    }
}

/// Reads up to one maximum-size request head. A quiet keep-alive
/// connection or a mid-head disconnect closes without a response.
async fn read_request<S: ClientStream>(stream: &mut S, first: bool) -> io::Result<ReadOutcome> {
    let limit = Duration::from_secs(if first {
        REQUEST_TIMEOUT_SECS
    } else {
        KEEPALIVE_TIMEOUT_SECS
    });
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let read = match timeout(limit, stream.read(&mut chunk)).await {
            Err(_) => return Ok(ReadOutcome::Closed),
            Ok(result) => result?,
        };
        if read == 0 {
            return Ok(ReadOutcome::Closed);
        }
        buf.extend_from_slice(&chunk[..read]);
        if request::find_terminator(&buf).is_some() {
            return Ok(ReadOutcome::Request(buf));
        }
        if buf.len() >= MAX_REQUEST_SIZE {
            return Ok(ReadOutcome::TooLarge);
        }
    }
}

async fn handle_request<S: ClientStream>(
    stream: &mut S,
    raw: &[u8],
    peer: SocketAddr,
    encrypted: bool,
    ctx: &ServerContext,
    tree: &FingerprintTree,
) -> Flow {
    let req = match request::parse(raw) {
        Ok(req) => req,
        Err(e) => {
            let status = match e {
                ParseError::BadRequest => Status::BadRequest,
                ParseError::VersionNotSupported => Status::VersionNotSupported,
                ParseError::ForbiddenTarget => Status::Forbidden,
            };
            info!(%peer, status = status.code(), error = %e, "rejected request");
            let _ = response::send_error(stream, status, None, false).await;
            return Flow::Close;
        }
    };

    debug!(
        %peer,
        user_agent = req.user_agent.as_deref().unwrap_or("-"),
        referer = req.referer.as_deref().unwrap_or("-"),
        "request headers"
    );

    match dispatch(stream, &req, encrypted, ctx, tree).await {
        Ok(served) => {
            info!(
                %peer,
                method = ?req.method,
                target = %req.target,
                status = served.status.code(),
                "request"
            );
            if served.close {
                Flow::Close
            } else {
                Flow::KeepAlive
            }
        }
        Err(BodyError::Disconnect(e)) => {
            // Seeking media players abort mid-body all the time.
            debug!(%peer, target = %req.target, error = %e, "client disconnected");
            Flow::Close
        }
        Err(BodyError::Fatal(e)) => {
            warn!(%peer, target = %req.target, error = %e, "write failed");
            Flow::Close
        }
    }
}

async fn dispatch<S: ClientStream>(
    stream: &mut S,
    req: &Request,
    encrypted: bool,
    ctx: &ServerContext,
    tree: &FingerprintTree,
) -> Result<Served, BodyError> {
    let keep = req.keep_alive;

    // Plaintext clients asking for an encrypted equivalent get redirected.
    if !encrypted && req.upgrade_insecure {
        if let Some(host) = &req.host {
            let mut head = ResponseHead::new(Status::MovedPermanently);
            head.location = Some(format!("https://{}{}", host, req.target));
            response::write_all(stream, &head.render()).await?;
            return Ok(Served {
                status: Status::MovedPermanently,
                close: true,
            });
        }
    }

    let is_head = match req.method {
        Method::Get => false,
        Method::Head => true,
        Method::Options => {
            let mut head = ResponseHead::new(Status::Ok);
            head.allow = true;
            head.keep_alive = keep;
            response::write_all(stream, &head.render()).await?;
            return Ok(Served {
                status: Status::Ok,
                close: !keep,
            });
        }
        Method::Unsupported => {
            response::send_error(stream, Status::NotImplemented, None, keep).await?;
            return Ok(Served {
                status: Status::NotImplemented,
                close: !keep,
            });
        }
        Method::Unknown => {
            response::send_error(stream, Status::ImATeapot, None, keep).await?;
            return Ok(Served {
                status: Status::ImATeapot,
                close: !keep,
            });
        }
    };

    let path_part = req.target.split('?').next().unwrap_or(req.target.as_str());

    if path_part == status_page::HEALTH_TARGET || path_part == status_page::READY_TARGET {
        let body = if path_part == status_page::HEALTH_TARGET {
            status_page::health_body()
        } else {
            status_page::ready_body()
        };
        let mut head = ResponseHead::new(Status::Ok);
        head.content_type = Some(status_page::STATUS_CONTENT_TYPE);
        head.content_length = if is_head { 0 } else { body.len() as u64 };
        head.keep_alive = keep;
        let mut bytes = head.render();
        if !is_head {
            bytes.extend_from_slice(&body);
        }
        response::write_all(stream, &bytes).await?;
        return Ok(Served {
            status: Status::Ok,
            close: !keep,
        });
    }

    // Path resolution: `/` is the landing page, content lives under
    // `{webroot}/webpages`, and the resolved path is re-validated.
    let target = if path_part == "/" { "/landing.html" } else { path_part };
    let path = format!("{}/webpages{}", ctx.config.webroot, target);
    if request::validate_path(&path).is_err() {
        response::send_error(stream, Status::Forbidden, None, keep).await?;
        return Ok(Served {
            status: Status::Forbidden,
            close: !keep,
        });
    }

    let entry = tree.lookup(&path);

    if let Some(entry) = entry {
        let revalidated = (req.if_none_match != 0 && req.if_none_match == entry.content_hash)
            || req
                .if_modified_since
                .as_deref()
                .is_some_and(|ims| ims >= entry.last_modified.as_str());
        if revalidated {
            let mut head = ResponseHead::new(Status::NotModified);
            head.etag = (!encrypted).then_some(entry.content_hash);
            head.last_modified = Some(&entry.last_modified);
            head.keep_alive = keep;
            response::write_all(stream, &head.render()).await?;
            return Ok(Served {
                status: Status::NotModified,
                close: !keep,
            });
        }
    }

    let mut file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            let status = match e.kind() {
                io::ErrorKind::NotFound => Status::NotFound,
                io::ErrorKind::PermissionDenied => Status::Forbidden,
                _ => Status::InternalError,
            };
            response::send_error(stream, status, None, keep).await?;
            return Ok(Served {
                status,
                close: !keep,
            });
        }
    };
    let meta = match file.metadata().await {
        Ok(meta) if !meta.is_dir() => meta,
        Ok(_) => {
            response::send_error(stream, Status::NotFound, None, keep).await?;
            return Ok(Served {
                status: Status::NotFound,
                close: !keep,
            });
        }
        Err(_) => {
            response::send_error(stream, Status::InternalError, None, keep).await?;
            return Ok(Served {
                status: Status::InternalError,
                close: !keep,
            });
        }
    };
    let len = meta.len();

    let (status, start, count, content_range) = match response::resolve_range(req.range, len) {
        ResolvedRange::Unsatisfiable => {
            response::send_error(
                stream,
                Status::RangeNotSatisfiable,
                Some(format!("bytes */{}", len)),
                keep,
            )
            .await?;
            return Ok(Served {
                status: Status::RangeNotSatisfiable,
                close: !keep,
            });
        }
        ResolvedRange::Full => (Status::Ok, 0, len, None),
        ResolvedRange::Partial { start, end } => (
            Status::PartialContent,
            start,
            end - start + 1,
            Some(format!("bytes {}-{}/{}", start, end, len)),
        ),
    };

    let mut head = ResponseHead::new(status);
    head.content_type = Some(ctx.mime.resolve(&path));
    head.content_length = if is_head { 0 } else { count };
    head.etag = (!encrypted)
        .then(|| entry.map(|e| e.content_hash))
        .flatten();
    head.last_modified = entry.map(|e| e.last_modified.as_str());
    head.content_range = content_range;
    head.keep_alive = keep;
    response::write_all(stream, &head.render()).await?;
    if !is_head {
        response::stream_body(stream, &mut file, start, count).await?;
    }
    Ok(Served {
        status,
        close: !keep,
    })
}
