//! HTTP/1.1 wire parsing: start lines, header blocks and bodies.
//!
//! The pure functions (`parse_request_line`, `parse_status_line`,
//! `parse_headers`) work on text. The `receive_*` functions pull bytes from a
//! [`Connection`] until a complete header block or body is available.

use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

use crate::http::chunked::ChunkedDecoder;
use crate::http::headers::Headers;
use crate::http::request::Method;
use crate::net::connection::{Connection, ConnectionError};

const RECEIVE_CHUNK: usize = 1024;
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequest,

    #[error("unrecognized request method")]
    InvalidMethod,

    #[error("malformed header line")]
    InvalidHeader,

    #[error("invalid Content-Length")]
    InvalidContentLength,

    #[error("malformed status line")]
    InvalidStatusLine,

    #[error("header block exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    #[error("chunk framing error: {0}")]
    InvalidChunk(&'static str),

    #[error("message ended before it was complete")]
    Incomplete,
}

/// Failure while pulling a message off a connection.
#[derive(Debug, Error)]
pub enum WireError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("peer closed the connection")]
    Closed,

    #[error("no data after {0} receive attempts")]
    Stalled(u32),
}

/// Size and patience limits applied while receiving.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_header_size: usize,
    pub max_body_size: usize,
    pub receive_timeout: Duration,
    pub retry_budget: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_header_size: 8192,
            max_body_size: 16384,
            receive_timeout: Duration::from_millis(1000),
            retry_budget: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: String,
    pub code: u16,
    pub reason: String,
}

/// Body bytes as received, plus anything read past the end of the body.
#[derive(Debug, Default)]
pub struct ReceivedBody {
    pub data: Vec<u8>,
    pub truncated: bool,
    pub excess: Vec<u8>,
}

/// `METHOD SP target SP version`
pub fn parse_request_line(line: &str) -> Result<RequestLine, ParseError> {
    let mut parts = line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidMethod)?;
    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;
    let target = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;

    if parts.next().is_some() || !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidRequest);
    }

    let (path, query) = target.split_once('?').unwrap_or((target, ""));

    Ok(RequestLine {
        method,
        path: path.to_string(),
        query: query.to_string(),
        version: version.to_string(),
    })
}

/// `version SP code SP reason`; the reason phrase may be empty.
pub fn parse_status_line(line: &str) -> Result<StatusLine, ParseError> {
    let mut parts = line.trim_end().splitn(3, ' ');

    let version = parts.next().filter(|v| v.starts_with("HTTP/")).ok_or(ParseError::InvalidStatusLine)?;
    let code = parts
        .next()
        .and_then(|c| c.parse::<u16>().ok())
        .filter(|c| (100..1000).contains(c))
        .ok_or(ParseError::InvalidStatusLine)?;
    let reason = parts.next().unwrap_or_default();

    Ok(StatusLine {
        version: version.to_string(),
        code,
        reason: reason.to_string(),
    })
}

/// Line-oriented header parse. Lines without a colon are skipped.
pub fn parse_headers(raw: &str) -> Headers {
    let mut headers = Headers::new();

    for line in raw.split("\r\n") {
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key, value.trim());
        }
    }

    headers
}

/// Strict variant used for inbound requests: a line without a colon is an error.
pub(crate) fn parse_headers_strict(raw: &str) -> Result<Headers, ParseError> {
    let mut headers = Headers::new();

    for line in raw.split("\r\n").filter(|l| !l.is_empty()) {
        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        if key.trim().is_empty() {
            return Err(ParseError::InvalidHeader);
        }
        headers.insert(key, value.trim());
    }

    Ok(headers)
}

/// Split a header block into its start line and the header lines.
pub fn split_head(block: &str) -> (&str, &str) {
    block.split_once("\r\n").unwrap_or((block, ""))
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len()).position(|w| w == HEADER_TERMINATOR)
}

/// Receive until CRLFCRLF is seen.
///
/// `carry` holds bytes already read from the connection (for example
/// pipelined data left from the previous request). While nothing has arrived
/// yet the first wait is `first_wait`; after that each wait is the receive
/// timeout and counts against the retry budget.
pub async fn receive_header_block(
    conn: &mut Connection,
    carry: Vec<u8>,
    limits: &Limits,
    first_wait: Duration,
) -> Result<(String, Vec<u8>), WireError> {
    let mut buf = carry;
    let mut chunk = [0u8; RECEIVE_CHUNK];
    let mut idle = 0;

    loop {
        if let Some(end) = find_headers_end(&buf) {
            if end > limits.max_header_size {
                return Err(ParseError::HeaderTooLarge { limit: limits.max_header_size }.into());
            }
            let leftover = buf.split_off(end + HEADER_TERMINATOR.len());
            buf.truncate(end);
            let text = String::from_utf8(buf).map_err(|_| ParseError::InvalidRequest)?;
            trace!(bytes = text.len(), leftover = leftover.len(), "header block received");
            return Ok((text, leftover));
        }

        if buf.len() > limits.max_header_size + HEADER_TERMINATOR.len() {
            return Err(ParseError::HeaderTooLarge { limit: limits.max_header_size }.into());
        }

        let wait = if buf.is_empty() { first_wait } else { limits.receive_timeout };

        match conn.receive(&mut chunk, wait).await {
            Ok(0) => return Err(WireError::Closed),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(ConnectionError::Timeout(d)) if buf.is_empty() => {
                return Err(ConnectionError::Timeout(d).into());
            }
            Err(ConnectionError::Timeout(_)) => {
                idle += 1;
                if idle >= limits.retry_budget {
                    return Err(WireError::Stalled(idle));
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Receive a message body framed according to `headers`.
///
/// Chunked framing wins over `Content-Length`. With neither, requests have no
/// body, while responses (`read_to_close`) take whatever arrives until the
/// peer closes. Every framing clamps the kept data to `max_body_size` and
/// reports truncation instead of failing.
pub async fn receive_body(
    conn: &mut Connection,
    headers: &Headers,
    leftover: Vec<u8>,
    limits: &Limits,
    read_to_close: bool,
) -> Result<ReceivedBody, WireError> {
    if headers.is_chunked() {
        return receive_chunked(conn, leftover, limits).await;
    }

    if let Some(raw) = headers.get("content-length") {
        let length = raw.trim().parse::<usize>().map_err(|_| ParseError::InvalidContentLength)?;
        return receive_sized(conn, length, leftover, limits).await;
    }

    if read_to_close {
        return receive_until_close(conn, leftover, limits).await;
    }

    Ok(ReceivedBody {
        excess: leftover,
        ..Default::default()
    })
}

struct Clamped {
    data: Vec<u8>,
    max: usize,
    truncated: bool,
}

impl Clamped {
    fn new(max: usize) -> Self {
        Self {
            data: Vec::new(),
            max,
            truncated: false,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        let room = self.max.saturating_sub(self.data.len());
        if bytes.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }
}

async fn receive_sized(
    conn: &mut Connection,
    length: usize,
    mut leftover: Vec<u8>,
    limits: &Limits,
) -> Result<ReceivedBody, WireError> {
    let excess = if leftover.len() > length {
        leftover.split_off(length)
    } else {
        Vec::new()
    };

    let mut body = Clamped::new(limits.max_body_size);
    body.push(&leftover);
    let mut remaining = length - leftover.len();

    let mut chunk = [0u8; RECEIVE_CHUNK];
    let mut idle = 0;

    while remaining > 0 {
        let want = remaining.min(chunk.len());
        match conn.receive(&mut chunk[..want], limits.receive_timeout).await {
            Ok(0) => return Err(WireError::Closed),
            Ok(n) => {
                body.push(&chunk[..n]);
                remaining -= n;
                idle = 0;
            }
            Err(ConnectionError::Timeout(_)) => {
                idle += 1;
                if idle >= limits.retry_budget {
                    debug!(remaining, "body stalled");
                    return Err(WireError::Stalled(idle));
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(ReceivedBody {
        data: body.data,
        truncated: body.truncated,
        excess,
    })
}

async fn receive_chunked(
    conn: &mut Connection,
    leftover: Vec<u8>,
    limits: &Limits,
) -> Result<ReceivedBody, WireError> {
    let mut decoder = ChunkedDecoder::new(limits.max_body_size);
    let consumed = decoder.feed(&leftover)?;
    let mut excess = leftover[consumed..].to_vec();

    let mut chunk = [0u8; RECEIVE_CHUNK];
    let mut idle = 0;

    while !decoder.is_complete() {
        match conn.receive(&mut chunk, limits.receive_timeout).await {
            Ok(0) => return Err(ParseError::Incomplete.into()),
            Ok(n) => {
                let used = decoder.feed(&chunk[..n])?;
                excess = chunk[used..n].to_vec();
                idle = 0;
            }
            Err(ConnectionError::Timeout(_)) => {
                idle += 1;
                if idle >= limits.retry_budget {
                    return Err(WireError::Stalled(idle));
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    let truncated = decoder.truncated();
    Ok(ReceivedBody {
        data: decoder.into_decoded(),
        truncated,
        excess,
    })
}

async fn receive_until_close(
    conn: &mut Connection,
    leftover: Vec<u8>,
    limits: &Limits,
) -> Result<ReceivedBody, WireError> {
    let mut body = Clamped::new(limits.max_body_size);
    body.push(&leftover);

    let mut chunk = [0u8; RECEIVE_CHUNK];
    let mut idle = 0;

    loop {
        match conn.receive(&mut chunk, limits.receive_timeout).await {
            Ok(0) => break,
            Ok(n) => {
                body.push(&chunk[..n]);
                idle = 0;
            }
            Err(ConnectionError::Timeout(_)) => {
                idle += 1;
                if idle >= limits.retry_budget {
                    break;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(ReceivedBody {
        data: body.data,
        truncated: body.truncated,
        excess: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_splits_query() {
        let line = parse_request_line("GET /api/v1/zones?limit=5 HTTP/1.1").unwrap();
        assert_eq!(line.method, Method::GET);
        assert_eq!(line.path, "/api/v1/zones");
        assert_eq!(line.query, "limit=5");
        assert_eq!(line.version, "HTTP/1.1");
    }

    #[test]
    fn empty_method_is_invalid_method() {
        assert_eq!(parse_request_line(""), Err(ParseError::InvalidMethod));
        assert_eq!(parse_request_line("BREW /pot HTTP/1.1"), Err(ParseError::InvalidMethod));
    }

    #[test]
    fn strict_headers_reject_missing_colon() {
        assert_eq!(parse_headers_strict("Host example.com"), Err(ParseError::InvalidHeader));
    }

    #[test]
    fn status_line_without_reason() {
        let status = parse_status_line("HTTP/1.1 204").unwrap();
        assert_eq!(status.code, 204);
        assert_eq!(status.reason, "");
    }
}
