//! Request parsing: one raw byte buffer in, one owned `Request` record out.
//!
//! The parser copies every retained field, so the record never borrows from
//! the connection buffer. Failures are compact kinds that the handler maps
//! to a status at a single emission point.

use thiserror::Error;

/// Largest accepted request head, terminator included.
pub const MAX_REQUEST_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Options,
    /// Recognized HTTP method the server does not implement.
    Unsupported,
    /// Token that is not an HTTP method at all.
    Unknown,
}

const RECOGNIZED_METHODS: [&str; 6] = ["POST", "PUT", "DELETE", "PATCH", "TRACE", "CONNECT"];

impl Method {
    fn from_token(token: &str) -> Method {
        match token {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            t if RECOGNIZED_METHODS.contains(&t) => Method::Unsupported,
            _ => Method::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

/// Parsed `Range: bytes=` header in absolute file offsets. A negative
/// `start` denotes a suffix length; `end == -1` denotes an open end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request")]
    BadRequest,
    #[error("unsupported protocol version")]
    VersionNotSupported,
    #[error("forbidden request target")]
    ForbiddenTarget,
}

/// Per-connection parsed view of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub host: Option<String>,
    pub keep_alive: bool,
    /// Numeric entity validator; zero means none supplied.
    pub if_none_match: u32,
    pub if_modified_since: Option<String>,
    pub range: Option<ByteRange>,
    pub upgrade_insecure: bool,
    // Informational, preserved for the request log.
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

/// Rejects traversal (`..`), empty segments (`//`), and embedded NUL.
pub fn validate_path(path: &str) -> Result<(), ParseError> {
    if path.contains("..") || path.contains("//") || path.contains('\0') {
        return Err(ParseError::ForbiddenTarget);
    }
    Ok(())
}

/// Parses one request head. The buffer must contain the full head; the
/// caller enforces the size cap and the `\r\n\r\n` terminator.
pub fn parse(raw: &[u8]) -> Result<Request, ParseError> {
    let head_len = find_terminator(raw).unwrap_or(raw.len());
    let head = std::str::from_utf8(&raw[..head_len]).map_err(|_| ParseError::BadRequest)?;
    let mut lines = head.split("\r\n");

    let start_line = lines.next().ok_or(ParseError::BadRequest)?;
    let mut tokens = start_line.split(' ').filter(|t| !t.is_empty());
    let method = tokens.next().ok_or(ParseError::BadRequest)?;
    let target = tokens.next().ok_or(ParseError::BadRequest)?;
    let version = tokens.next().ok_or(ParseError::BadRequest)?;
    if tokens.next().is_some() {
        return Err(ParseError::BadRequest);
    }

    let version = match version {
        "HTTP/1.0" => Version::Http10,
        "HTTP/1.1" => Version::Http11,
        _ => return Err(ParseError::VersionNotSupported),
    };

    let mut req = Request {
        method: Method::from_token(method),
        target: target.to_string(),
        version,
        host: None,
        keep_alive: version == Version::Http11,
        if_none_match: 0,
        if_modified_since: None,
        range: None,
        upgrade_insecure: false,
        user_agent: None,
        referer: None,
    };

    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = match line.split_once(':') {
            Some(pair) => pair,
            None => continue,
        };
        let value = value.trim_start_matches([' ', '\t']).trim_end();
        match name.to_ascii_lowercase().as_str() {
            "host" => req.host = Some(value.to_string()),
            "connection" => {
                let v = value.to_ascii_lowercase();
                if v.contains("close") {
                    req.keep_alive = false;
                } else if v.contains("keep-alive") {
                    req.keep_alive = true;
                }
            }
            "if-none-match" => {
                req.if_none_match = value.trim_matches('"').parse::<u32>().unwrap_or(0);
            }
            "if-modified-since" => req.if_modified_since = Some(value.to_string()),
            "range" => req.range = parse_range(value),
            "upgrade-insecure-requests" => req.upgrade_insecure = value.trim() == "1",
            "user-agent" => req.user_agent = Some(value.to_string()),
            "referer" => req.referer = Some(value.to_string()),
            _ => {}
        }
    }

    if req.version == Version::Http11 && req.host.is_none() {
        return Err(ParseError::BadRequest);
    }

    validate_path(&req.target)?;

    Ok(req)
}

/// Recognizes `bytes=start-end`, `bytes=start-`, and `bytes=-suffix`.
/// Any other form leaves the request non-partial.
fn parse_range(value: &str) -> Option<ByteRange> {
    let spec = value.strip_prefix("bytes=")?;
    if let Some(suffix) = spec.strip_prefix('-') {
        let suffix: i64 = suffix.parse().ok().filter(|&n| n > 0)?;
        return Some(ByteRange {
            start: -suffix,
            end: -1,
        });
    }
    let (start, end) = spec.split_once('-')?;
    let start: i64 = start.parse().ok()?;
    let end: i64 = if end.is_empty() {
        -1
    } else {
        end.parse().ok().filter(|&n| n >= 0)?
    };
    Some(ByteRange { start, end })
}

/// Offset of the byte past the `\r\n\r\n` head terminator.
pub fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}
