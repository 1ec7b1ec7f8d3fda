//! Minimal HTTP/1.x request framing for the loopback hook listener.
//!
//! Only the request line and `Content-Length` are interpreted. The body is
//! everything after the first blank line and is not cut to the declared
//! length.

use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1024 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed request line")]
    MalformedRequestLine,
    #[error("connection closed after {received} bytes of an incomplete request")]
    Incomplete { received: usize },
    #[error("request exceeds max size ({size} > {max})")]
    OversizedRequest { size: usize, max: usize },
}

pub fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

/// Reads `Content-Length` case-insensitively; an unparseable value counts as 0.
pub fn content_length(headers: &str) -> Option<usize> {
    headers.split("\r\n").find_map(|line| {
        let lower = line.to_ascii_lowercase();
        lower
            .strip_prefix(CONTENT_LENGTH)
            .map(|value| value.trim().parse().unwrap_or(0))
    })
}

/// A request is complete once the header terminator has arrived and, when a
/// `Content-Length` header is present, at least that many body bytes follow.
pub fn is_request_complete(buf: &[u8]) -> bool {
    let Some(end) = header_end(buf) else {
        return false;
    };
    let headers = String::from_utf8_lossy(&buf[..end]);
    let body_len = buf.len() - end - HEADER_TERMINATOR.len();
    match content_length(&headers) {
        Some(expected) => body_len >= expected,
        None => true,
    }
}

pub fn parse_request(buf: &[u8]) -> Result<HttpRequest, FrameError> {
    let text = String::from_utf8_lossy(buf);
    let request_line = text.split("\r\n").next().unwrap_or("");
    let mut tokens = request_line.split(' ').filter(|token| !token.is_empty());
    let (Some(method), Some(path)) = (tokens.next(), tokens.next()) else {
        return Err(FrameError::MalformedRequestLine);
    };
    let body = text
        .find("\r\n\r\n")
        .map(|idx| text[idx + HEADER_TERMINATOR.len()..].to_string())
        .unwrap_or_default();
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        body,
    })
}

/// Accumulates bytes read from one connection until a full request is
/// available.
#[derive(Debug)]
pub struct RequestAccumulator {
    max_bytes: usize,
    pending: Vec<u8>,
}

impl Default for RequestAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUEST_BYTES)
    }
}

impl RequestAccumulator {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            pending: Vec::new(),
        }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Option<HttpRequest>, FrameError> {
        self.pending.extend_from_slice(chunk);
        if self.pending.len() > self.max_bytes {
            return Err(FrameError::OversizedRequest {
                size: self.pending.len(),
                max: self.max_bytes,
            });
        }
        if !is_request_complete(&self.pending) {
            return Ok(None);
        }
        parse_request(&self.pending).map(Some)
    }

    /// Called when the peer closes its side before a request completed.
    pub fn finish(self) -> Result<HttpRequest, FrameError> {
        if is_request_complete(&self.pending) {
            return parse_request(&self.pending);
        }
        Err(FrameError::Incomplete {
            received: self.pending.len(),
        })
    }
}

#[derive(Debug, Serialize)]
struct StatusBody<'a> {
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

fn status_json(status: &str, message: Option<&str>) -> String {
    serde_json::to_string(&StatusBody { status, message })
        .unwrap_or_else(|_| format!("{{\"status\":\"{status}\"}}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok() -> Self {
        Self {
            status: 200,
            body: status_json("ok", None),
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: status_json("error", Some(message)),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::error(400, message)
    }

    pub fn not_found() -> Self {
        Self::error(404, "Not found")
    }

    pub fn method_not_allowed() -> Self {
        Self::error(405, "Method not allowed")
    }

    pub fn serialize(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            reason_phrase(self.status),
            self.body.len(),
            self.body
        )
        .into_bytes()
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Error",
    }
}
