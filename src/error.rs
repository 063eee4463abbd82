//! Error taxonomy for the protocol engine.
//!
//! # Responsibilities
//! - Separate malformed wire input from classified proxy failures
//! - Carry the HTTP status, message key and fatal flag of a proxy failure
//! - Render classified failures into the HTML error page sent to clients
//!
//! # Design Decisions
//! - Errors raised deep in the codec or connection propagate unchanged to the
//!   handler, which is the only place that turns them into a response
//! - Message keys are a closed enum with built-in English texts

use std::io;
use thiserror::Error;

/// A URI that could not be decomposed.
#[derive(Debug, Error)]
#[error("invalid URI {uri:?}: {reason}")]
pub struct UriFormatError {
    pub uri: String,
    pub reason: String,
}

impl UriFormatError {
    pub fn new(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            reason: reason.into(),
        }
    }
}

/// Malformed start line, version token or request target.
#[derive(Debug, Error)]
#[error("malformed message: {0}")]
pub struct MessageFormatError(pub String);

impl From<UriFormatError> for MessageFormatError {
    fn from(e: UriFormatError) -> Self {
        MessageFormatError(e.to_string())
    }
}

/// Message key of a classified proxy failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKey {
    UnknownHost,
    NoRoute,
    HostConnect,
    PortConnect,
    ServerTimeout,
    ProtocolVersion,
    HostHeader,
    ClientCoding,
    ServerCoding,
    RequestScheme,
    ExpectExtension,
    MaxForwards,
    BadContentLength,
    NoContentLength,
    NotImplemented,
    MethodUnsupported,
    LocalResource,
    ForwardConnect,
    BadResponse,
    BadRequest,
}

impl ErrorKey {
    /// The key as used by the config UI's message catalogue.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKey::UnknownHost => "err.unknownhost",
            ErrorKey::NoRoute => "err.noroute",
            ErrorKey::HostConnect => "err.hostconnect",
            ErrorKey::PortConnect => "err.portconnect",
            ErrorKey::ServerTimeout => "err.servertimeout",
            ErrorKey::ProtocolVersion => "err.protocolversion",
            ErrorKey::HostHeader => "err.hostheader",
            ErrorKey::ClientCoding => "err.clientcoding",
            ErrorKey::ServerCoding => "err.servercoding",
            ErrorKey::RequestScheme => "err.reqscheme",
            ErrorKey::ExpectExtension => "err.expectext",
            ErrorKey::MaxForwards => "err.maxforwards",
            ErrorKey::BadContentLength => "err.badcontentlength",
            ErrorKey::NoContentLength => "err.nocontentlength",
            ErrorKey::NotImplemented => "err.notimplemented",
            ErrorKey::MethodUnsupported => "err.methodunsup",
            ErrorKey::LocalResource => "err.localresource",
            ErrorKey::ForwardConnect => "err.forwardconnect",
            ErrorKey::BadResponse => "err.badresponse",
            ErrorKey::BadRequest => "err.badrequest",
        }
    }

    /// Human-readable text shown on the error page.
    pub fn text(&self) -> &'static str {
        match self {
            ErrorKey::UnknownHost => "The host name could not be resolved",
            ErrorKey::NoRoute => "There is no route to the host",
            ErrorKey::HostConnect => "The server refused the connection",
            ErrorKey::PortConnect => "Could not connect to the server port",
            ErrorKey::ServerTimeout => "The server did not answer in time",
            ErrorKey::ProtocolVersion => "The proxy requires HTTP/1.1 or later",
            ErrorKey::HostHeader => "The request has a missing or invalid Host header",
            ErrorKey::ClientCoding => "The request uses an unsupported transfer coding",
            ErrorKey::ServerCoding => "The server used an unsupported transfer coding",
            ErrorKey::RequestScheme => "The requested URI scheme is not supported",
            ErrorKey::ExpectExtension => "The expectation cannot be met",
            ErrorKey::MaxForwards => "The Max-Forwards header is invalid",
            ErrorKey::BadContentLength => "The Content-Length header is invalid",
            ErrorKey::NoContentLength => "The request needs a Content-Length header",
            ErrorKey::NotImplemented => "This method is not implemented by the proxy",
            ErrorKey::MethodUnsupported => "The request method is not supported",
            ErrorKey::LocalResource => "The resource does not exist",
            ErrorKey::ForwardConnect => "The forwarding proxy refused the tunnel",
            ErrorKey::BadResponse => "The server sent a malformed response",
            ErrorKey::BadRequest => "The request is malformed",
        }
    }
}

impl std::fmt::Display for ErrorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure that is answered with an HTML error page.
#[derive(Debug, Clone, Error)]
#[error("{status} {key}{}", detail_suffix(.detail))]
pub struct HttpError {
    pub status: u16,
    pub key: ErrorKey,
    pub detail: Option<String>,
    /// Forces the client connection closed after the page is sent.
    pub fatal: bool,
}

impl HttpError {
    pub fn new(status: u16, key: ErrorKey) -> Self {
        Self {
            status,
            key,
            detail: None,
            fatal: false,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn fatal(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self
    }

    /// Reason phrase for the status line.
    pub fn reason(&self) -> &'static str {
        reason_phrase(self.status)
    }

    /// Body paragraph: `text: detail` or `text.`.
    pub fn message(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{}: {}", self.key.text(), detail),
            None => format!("{}.", self.key.text()),
        }
    }

    /// Full HTML document for the error page.
    pub fn html(&self) -> String {
        error_page(self.status, self.reason(), &self.message())
    }
}

/// Failure while moving body bytes. The stream cannot be resynchronised.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("unexpected end of stream")]
    UnexpectedEof,
    #[error("chunk framing error: {0}")]
    Framing(String),
}

/// Umbrella error of one request cycle.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Protocol(#[from] MessageFormatError),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// An I/O timeout, as raised by connection timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProxyError::Io(e) if e.kind() == io::ErrorKind::TimedOut)
    }
}

impl From<UriFormatError> for ProxyError {
    fn from(e: UriFormatError) -> Self {
        ProxyError::Protocol(e.into())
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(" ({d})")).unwrap_or_default()
}

/// Reason phrases used for synthesized responses.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        200 => "OK",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        411 => "Length Required",
        417 => "Expectation Failed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Error",
    }
}

/// Minimal HTML page used for errors and block notices.
pub fn error_page(status: u16, reason: &str, message: &str) -> String {
    format!(
        "<html>\n<head>\n<title>{status} {reason}</title>\n</head>\n<body>\n<h1>{status} {reason}</h1>\n{message}\n</body>\n</html>\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_with_and_without_detail() {
        let e = HttpError::new(404, ErrorKey::UnknownHost).with_detail("nowhere.invalid");
        assert_eq!(e.message(), "The host name could not be resolved: nowhere.invalid");
        assert_eq!(e.reason(), "Not Found");

        let e = HttpError::new(501, ErrorKey::NotImplemented);
        assert_eq!(e.message(), "This method is not implemented by the proxy.");
    }

    #[test]
    fn html_page_layout() {
        let page = error_page(502, "Bad Gateway", "boom");
        assert_eq!(
            page,
            "<html>\n<head>\n<title>502 Bad Gateway</title>\n</head>\n<body>\n<h1>502 Bad Gateway</h1>\nboom\n</body>\n</html>\n"
        );
    }

    #[test]
    fn display_includes_key_and_detail() {
        let e = HttpError::new(400, ErrorKey::HostHeader).with_detail("x").fatal(true);
        assert_eq!(e.to_string(), "400 err.hostheader (x)");
        assert!(e.fatal);
    }

    #[test]
    fn uri_error_becomes_protocol_error() {
        let err: ProxyError = UriFormatError::new("http://h:x/", "invalid port").into();
        assert!(matches!(err, ProxyError::Protocol(_)));
    }
}
