//! Minimal HTTP/1.x request framing
//!
//! Reads exactly one request from a byte stream: the header block up to the
//! blank line, then a body of the declared `content-length`. There is no
//! keep-alive and no chunked transfer encoding; without a `content-length`
//! the bytes that arrived together with the headers are the whole body.

use std::collections::HashMap;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

pub use crate::protocol::query::{parse_query, percent_decode, split_target};
pub use crate::protocol::response::{
    CONTENT_TYPE_HTML, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT, Response, Status,
};

mod query;
mod response;

/// Marks the end of the header block
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

const READ_CHUNK: usize = 4096;

/// Errors that prevent a request from being framed
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("connection closed before the request was complete")]
    Incomplete,

    #[error("malformed request: {0}")]
    Malformed(&'static str),

    #[error("request exceeds the {limit} byte limit")]
    TooLarge { limit: usize },

    #[error("timed out waiting for the request")]
    TimedOut,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fully framed request. Immutable once built.
#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    target: String,
    path: String,
    query: String,
    params: HashMap<String, String>,
    version: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

/// Start line and headers, before the body is known
#[derive(Debug)]
struct RequestHead {
    method: String,
    target: String,
    version: String,
    headers: HashMap<String, String>,
}

impl RequestHead {
    /// Declared body length, if present and a non-negative integer
    fn content_length(&self) -> Option<usize> {
        self.headers
            .get("content-length")
            .and_then(|value| value.parse().ok())
    }
}

impl Request {
    /// Parse a complete request held in memory.
    ///
    /// Everything after the header terminator is the body, cut to the
    /// declared `content-length` when one is given.
    pub fn parse(raw: &[u8]) -> Result<Self, FramingError> {
        let header_end = find_terminator(raw, 0).ok_or(FramingError::Incomplete)?;
        let head = parse_head(&raw[..header_end])?;
        let mut body = raw[header_end + HEADER_TERMINATOR.len()..].to_vec();
        if let Some(len) = head.content_length() {
            body.truncate(len);
        }
        Ok(Self::from_head(head, body))
    }

    fn from_head(head: RequestHead, body: Vec<u8>) -> Self {
        let (path, query) = split_target(&head.target);
        let (path, query) = (path.to_owned(), query.to_owned());
        let params = parse_query(&query);
        Self {
            method: head.method,
            target: head.target,
            path,
            query,
            params,
            version: head.version,
            headers: head.headers,
            body,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The raw request target, path plus query
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string (without the `?`)
    pub fn query(&self) -> &str {
        &self.query
    }

    /// A decoded query parameter
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Look up a header by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Read one request from `reader`.
///
/// `max_bytes` bounds the header block and the declared body length. A
/// header block that grows past it without a terminator fails with
/// [`FramingError::TooLarge`]; a larger declared body is rejected before
/// any of it is buffered. A body cut short by EOF is accepted as-is.
pub async fn read_request<R>(reader: &mut R, max_bytes: usize) -> Result<Request, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];
    let mut searched = 0;

    let header_end = loop {
        if let Some(pos) = find_terminator(&buf, searched) {
            break pos;
        }
        if buf.len() > max_bytes {
            return Err(FramingError::TooLarge { limit: max_bytes });
        }
        searched = buf.len().saturating_sub(HEADER_TERMINATOR.len() - 1);

        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(FramingError::Incomplete);
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    if header_end > max_bytes {
        return Err(FramingError::TooLarge { limit: max_bytes });
    }

    let head = parse_head(&buf[..header_end])?;
    let mut body = buf.split_off(header_end + HEADER_TERMINATOR.len());

    if let Some(len) = head.content_length() {
        if len > max_bytes {
            return Err(FramingError::TooLarge { limit: max_bytes });
        }
        while body.len() < len {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body.truncate(len);
    }

    Ok(Request::from_head(head, body))
}

/// Position of the header terminator at or after `from`
fn find_terminator(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
        .map(|pos| pos + from)
}

fn parse_head(head: &[u8]) -> Result<RequestHead, FramingError> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.lines();

    let start = lines
        .next()
        .ok_or(FramingError::Malformed("empty request"))?;
    let mut parts = start.split_whitespace();
    let method = parts
        .next()
        .ok_or(FramingError::Malformed("missing method"))?
        .to_owned();
    let target = parts
        .next()
        .ok_or(FramingError::Malformed("missing request target"))?
        .to_owned();
    let version = parts.next().unwrap_or_default().to_owned();

    let mut headers = HashMap::new();
    for line in lines {
        // Lines without a separator are ignored rather than rejected
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    Ok(RequestHead {
        method,
        target,
        version,
        headers,
    })
}
