//! Response emission: deterministic header blocks, minimal error pages,
//! range arithmetic, and the block-copy body loop.

use std::io::{self, SeekFrom};
use std::time::SystemTime;

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::request::ByteRange;
use crate::IO_BLOCK_SIZE;

pub const SERVER_NAME: &str = "Snap/0.4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    PartialContent,
    MovedPermanently,
    NotModified,
    BadRequest,
    Forbidden,
    NotFound,
    RangeNotSatisfiable,
    ImATeapot,
    InternalError,
    NotImplemented,
    VersionNotSupported,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::PartialContent => 206,
            Status::MovedPermanently => 301,
            Status::NotModified => 304,
            Status::BadRequest => 400,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::RangeNotSatisfiable => 416,
            Status::ImATeapot => 418,
            Status::InternalError => 500,
            Status::NotImplemented => 501,
            Status::VersionNotSupported => 505,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::PartialContent => "Partial Content",
            Status::MovedPermanently => "Moved Permanently",
            Status::NotModified => "Not Modified",
            Status::BadRequest => "Bad Request",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::RangeNotSatisfiable => "Range Not Satisfiable",
            Status::ImATeapot => "I'm a Teapot",
            Status::InternalError => "Internal Server Error",
            Status::NotImplemented => "Not Implemented",
            Status::VersionNotSupported => "HTTP Version Not Supported",
        }
    }
}

/// Minimal HTML error page.
pub fn error_body(status: Status) -> String {
    format!(
        "<html><head><title>{code} {msg}</title></head>\
         <body><h1>{code} {msg}</h1><hr><p>{server}</p></body></html>",
        code = status.code(),
        msg = status.reason(),
        server = SERVER_NAME,
    )
}

/// One response head. `render` emits headers in a fixed order so that the
/// wire form is deterministic for a given head.
#[derive(Debug)]
pub struct ResponseHead<'a> {
    pub status: Status,
    pub content_type: Option<&'a str>,
    pub content_length: u64,
    pub etag: Option<u32>,
    pub last_modified: Option<&'a str>,
    pub content_range: Option<String>,
    pub location: Option<String>,
    pub allow: bool,
    pub keep_alive: bool,
}

impl<'a> ResponseHead<'a> {
    pub fn new(status: Status) -> ResponseHead<'a> {
        ResponseHead {
            status,
            content_type: None,
            content_length: 0,
            etag: None,
            last_modified: None,
            content_range: None,
            location: None,
            allow: false,
            keep_alive: false,
        }
    }

    pub fn render(&self) -> Vec<u8> {
        let mut head = String::with_capacity(256);
        head.push_str(&format!(
            "HTTP/1.1 {} {}\r\n",
            self.status.code(),
            self.status.reason()
        ));
        if let Some(ct) = self.content_type {
            head.push_str(&format!("Content-Type: {}\r\n", ct));
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.content_length));
        head.push_str("Accept-Ranges: bytes\r\n");
        head.push_str(&format!(
            "Date: {}\r\n",
            httpdate::fmt_http_date(SystemTime::now())
        ));
        head.push_str(&format!("Server: {}\r\n", SERVER_NAME));
        if let Some(etag) = self.etag {
            head.push_str(&format!("ETag: \"{}\"\r\n", etag));
        }
        if let Some(lm) = self.last_modified {
            head.push_str(&format!("Last-Modified: {}\r\n", lm));
        }
        if let Some(cr) = &self.content_range {
            head.push_str(&format!("Content-Range: {}\r\n", cr));
        }
        if let Some(loc) = &self.location {
            head.push_str(&format!("Location: {}\r\n", loc));
        }
        if self.allow {
            head.push_str("Allow: GET, HEAD, OPTIONS\r\n");
        }
        if self.keep_alive {
            head.push_str("Connection: keep-alive\r\n");
        } else {
            head.push_str("Connection: close\r\n");
        }
        head.push_str("\r\n");
        head.into_bytes()
    }
}

/// Resolution of a parsed range against a concrete file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedRange {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Applies suffix resolution, open-end resolution, and the end clamp, then
/// rejects ranges that start past the file or end before they start.
pub fn resolve_range(range: Option<ByteRange>, len: u64) -> ResolvedRange {
    let range = match range {
        Some(r) => r,
        None => return ResolvedRange::Full,
    };
    let n = len as i64;
    let (start, end) = if range.start < 0 {
        let suffix = -range.start;
        ((n - suffix).max(0), n - 1)
    } else if range.end < 0 {
        (range.start, n - 1)
    } else {
        (range.start, range.end.min(n - 1))
    };
    if start >= n || end < start {
        return ResolvedRange::Unsatisfiable;
    }
    ResolvedRange::Partial {
        start: start as u64,
        end: end as u64,
    }
}

/// How a body write ended.
#[derive(Debug, Error)]
pub enum BodyError {
    /// Peer went away mid-body; logged and treated as normal termination.
    #[error("client disconnected: {0}")]
    Disconnect(io::Error),
    #[error("fatal write error: {0}")]
    Fatal(io::Error),
}

pub fn classify_write_error(e: io::Error) -> BodyError {
    match e.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => BodyError::Disconnect(e),
        _ => BodyError::Fatal(e),
    }
}

/// Writes and flushes a fully rendered head (or any metadata-only
/// response).
pub async fn write_all<S>(stream: &mut S, bytes: &[u8]) -> Result<(), BodyError>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    stream
        .write_all(bytes)
        .await
        .map_err(classify_write_error)?;
    stream.flush().await.map_err(classify_write_error)
}

/// Streams `count` bytes of `file` starting at `start`: seek, then read
/// fixed-size blocks and write exactly what was read. Reads retry on
/// interruption; write failures are classified by `classify_write_error`.
pub async fn stream_body<S>(
    stream: &mut S,
    file: &mut File,
    start: u64,
    count: u64,
) -> Result<(), BodyError>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    file.seek(SeekFrom::Start(start))
        .await
        .map_err(BodyError::Fatal)?;
    let mut buf = [0u8; IO_BLOCK_SIZE];
    let mut remaining = count;
    while remaining > 0 {
        let want = remaining.min(IO_BLOCK_SIZE as u64) as usize;
        let n = match file.read(&mut buf[..want]).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(BodyError::Fatal(e)),
        };
        stream
            .write_all(&buf[..n])
            .await
            .map_err(classify_write_error)?;
        remaining -= n as u64;
    }
    stream.flush().await.map_err(classify_write_error)?;
    Ok(())
}

/// Emits an error-page response: the mapped status line plus the minimal
/// HTML body. Error pages always carry their body.
pub async fn send_error<S>(
    stream: &mut S,
    status: Status,
    content_range: Option<String>,
    keep_alive: bool,
) -> Result<(), BodyError>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let body = error_body(status);
    let mut head = ResponseHead::new(status);
    head.content_type = Some("text/html");
    head.content_length = body.len() as u64;
    head.content_range = content_range;
    head.keep_alive = keep_alive;
    let mut bytes = head.render();
    bytes.extend_from_slice(body.as_bytes());
    write_all(stream, &bytes).await
}
