//! Request and response model.
//!
//! # Responsibilities
//! - Parse and serialize request lines and status lines
//! - Hold the version, headers and trailer of one message
//! - Answer the body-presence questions the relay logic asks
//!
//! # Design Decisions
//! - `Request` and `Response` share a `MessageHead` and the `Message` trait;
//!   reading and writing are free functions generic over the trait
//! - Messages are cleared and reused across a connection's request cycles

use std::cmp::Ordering;
use std::fmt;
use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::error::{MessageFormatError, ProxyError, UriFormatError};
use crate::http::headers::Headers;
use crate::http::line::{read_line, write_line};
use crate::http::uri::Uri;

/// HTTP protocol version, ordered by (major, minor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const HTTP_1_0: Version = Version { major: 1, minor: 0 };
    pub const HTTP_1_1: Version = Version { major: 1, minor: 1 };

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Strict `HTTP/<digits>.<digits>` token.
    pub fn parse(token: &str) -> Option<Self> {
        let (major, minor) = token.strip_prefix("HTTP/")?.split_once('.')?;
        let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if !digits(major) || !digits(minor) {
            return None;
        }
        Some(Self::new(major.parse().ok()?, minor.parse().ok()?))
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::HTTP_1_1
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

/// State shared by requests and responses.
#[derive(Debug, Clone, Default)]
pub struct MessageHead {
    pub version: Version,
    pub headers: Headers,
    pub trailer: Headers,
}

impl MessageHead {
    pub fn clear(&mut self) {
        self.version = Version::default();
        self.headers.clear();
        self.trailer.clear();
    }
}

/// Common behaviour of requests and responses.
pub trait Message {
    /// Blank lines before the start line are skipped instead of rejected.
    const SKIP_LEADING_BLANK_LINES: bool;

    fn head(&self) -> &MessageHead;

    fn head_mut(&mut self) -> &mut MessageHead;

    /// Replace the start-line state from `line`.
    fn parse_start_line(&mut self, line: &str) -> Result<(), MessageFormatError>;

    fn start_line(&self) -> String;

    /// Reset to the empty state for reuse.
    fn clear(&mut self);

    fn version(&self) -> Version {
        self.head().version
    }

    fn set_version(&mut self, version: Version) {
        self.head_mut().version = version;
    }

    /// Three-way compare of this message's version against `major.minor`.
    fn compare_version(&self, major: u32, minor: u32) -> Ordering {
        self.version().cmp(&Version::new(major, minor))
    }

    fn headers(&self) -> &Headers {
        &self.head().headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.head_mut().headers
    }

    fn trailer(&self) -> &Headers {
        &self.head().trailer
    }

    fn trailer_mut(&mut self) -> &mut Headers {
        &mut self.head_mut().trailer
    }

    /// Last `Transfer-Encoding` token, lower-cased.
    fn last_transfer_coding(&self) -> Option<String> {
        self.headers()
            .value_list("Transfer-Encoding")
            .and_then(|codings| codings.last().map(|c| c.to_ascii_lowercase()))
    }

    /// The message announces a body of some kind.
    fn has_body_headers(&self) -> bool {
        let headers = self.headers();
        headers.contains("Transfer-Encoding")
            || headers.contains("Content-Length")
            || headers.contains("Content-Type")
    }
}

/// Parse one message: start line then header block.
pub async fn read_message<M, R>(reader: &mut R, message: &mut M) -> Result<(), ProxyError>
where
    M: Message,
    R: AsyncBufRead + Unpin + ?Sized,
{
    message.clear();

    let mut line = read_line(reader).await?;
    if M::SKIP_LEADING_BLANK_LINES {
        while line.is_empty() {
            line = read_line(reader).await?;
        }
    }
    message.parse_start_line(&line)?;

    message.headers_mut().read(reader).await?;
    Ok(())
}

/// Serialize start line and headers, flushing after the blank line.
pub async fn write_message<M, W>(writer: &mut W, message: &M) -> std::io::Result<()>
where
    M: Message,
    W: AsyncWrite + Unpin + ?Sized,
{
    write_line(writer, &message.start_line()).await?;
    message.headers().write(writer).await
}

fn parse_version(token: &str) -> Result<Version, MessageFormatError> {
    Version::parse(token)
        .ok_or_else(|| MessageFormatError(format!("unsupported protocol/version: {token}")))
}

/// A request line plus headers.
#[derive(Debug, Clone, Default)]
pub struct Request {
    head: MessageHead,
    method: String,
    target: String,
    uri: Uri,
}

impl Request {
    /// A fresh HTTP/1.1 request for `target`.
    pub fn new(method: &str, target: &str) -> Result<Self, UriFormatError> {
        let mut request = Request {
            method: method.to_string(),
            ..Default::default()
        };
        request.set_target(target)?;
        Ok(request)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn set_method(&mut self, method: &str) {
        self.method = method.to_string();
    }

    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    /// Request target as it goes on the wire.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Parsed target. CONNECT authorities are parsed as `https://` URIs.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Replace the request target and re-parse it.
    pub fn set_target(&mut self, target: &str) -> Result<(), UriFormatError> {
        let uri = if self.is_connect() && !target.to_ascii_lowercase().starts_with("https://") {
            Uri::parse(&format!("https://{target}"))?
        } else {
            Uri::parse(target)?
        };
        self.uri = uri;
        self.target = target.to_string();
        Ok(())
    }

    /// Decoded path, query and fragment of the target.
    pub fn full_path(&self) -> Option<String> {
        self.uri.full_path()
    }
}

impl Message for Request {
    const SKIP_LEADING_BLANK_LINES: bool = true;

    fn head(&self) -> &MessageHead {
        &self.head
    }

    fn head_mut(&mut self) -> &mut MessageHead {
        &mut self.head
    }

    fn parse_start_line(&mut self, line: &str) -> Result<(), MessageFormatError> {
        let tokens: Vec<&str> = line.split(' ').filter(|t| !t.is_empty()).collect();
        let [method, target, version] = tokens[..] else {
            return Err(MessageFormatError(format!("invalid request line: {line}")));
        };

        self.method = method.to_string();
        self.set_target(target)?;
        self.head.version = parse_version(version)?;
        Ok(())
    }

    fn start_line(&self) -> String {
        format!("{} {} {}", self.method, self.target, self.head.version)
    }

    fn clear(&mut self) {
        self.head.clear();
        self.method.clear();
        self.target.clear();
        self.uri = Uri::default();
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.start_line())
    }
}

/// A status line plus headers.
#[derive(Debug, Clone, Default)]
pub struct Response {
    head: MessageHead,
    status: u16,
    reason: String,
}

impl Response {
    pub fn new(status: u16, reason: &str) -> Self {
        Response {
            status,
            reason: reason.to_string(),
            ..Default::default()
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn set_status(&mut self, status: u16, reason: &str) {
        self.status = status;
        self.reason = reason.to_string();
    }

    pub fn is_interim(&self) -> bool {
        (100..200).contains(&self.status)
    }

    /// 1xx, 204 and 304 never carry a body, whatever the headers say.
    pub fn is_bodyless(&self) -> bool {
        self.is_interim() || self.status == 204 || self.status == 304
    }
}

impl Message for Response {
    const SKIP_LEADING_BLANK_LINES: bool = false;

    fn head(&self) -> &MessageHead {
        &self.head
    }

    fn head_mut(&mut self) -> &mut MessageHead {
        &mut self.head
    }

    fn parse_start_line(&mut self, line: &str) -> Result<(), MessageFormatError> {
        let invalid = || MessageFormatError(format!("invalid status line: {line}"));

        let rest = line.trim_start_matches(' ');
        let (version, rest) = rest.split_once(' ').ok_or_else(invalid)?;
        let rest = rest.trim_start_matches(' ');
        let (status, reason) = rest.split_once(' ').unwrap_or((rest, ""));

        if status.len() != 3 || !status.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        self.head.version = parse_version(version)?;
        self.status = status.parse().map_err(|_| invalid())?;
        self.reason = reason.trim().to_string();
        Ok(())
    }

    fn start_line(&self) -> String {
        if self.reason.is_empty() {
            format!("{} {}", self.head.version, self.status)
        } else {
            format!("{} {} {}", self.head.version, self.status, self.reason)
        }
    }

    fn clear(&mut self) {
        self.head.clear();
        self.status = 0;
        self.reason.clear();
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.start_line())
    }
}
