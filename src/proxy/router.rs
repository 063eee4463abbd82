//! Request classification and route selection.
//!
//! # Responsibilities
//! - Reject requests the proxy cannot relay (old versions, missing Host,
//!   unknown codings, foreign schemes)
//! - Work out the origin host and port of a request
//! - Pick the relay protocol: tunnel, local or regular
//!
//! # Design Decisions
//! - A route is a plain enum picked once per request
//! - Local detection only resolves names when the port already matches

use std::net::{IpAddr, SocketAddr};

use tokio::net::lookup_host;

use crate::error::{ErrorKey, HttpError};
use crate::http::{Message, Request};
use crate::proxy::body::{transfer_coding, Coding};

/// Relay protocol for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Tunnel,
    Local,
    Regular,
}

impl Route {
    /// Label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Route::Tunnel => "tunnel",
            Route::Local => "local",
            Route::Regular => "regular",
        }
    }
}

/// Host and port a request is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginAddress {
    pub host: String,
    pub port: u16,
}

impl OriginAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, the connection pool key. IPv6 hosts are bracketed.
    pub fn key(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// The address the proxy itself is reachable under.
#[derive(Debug, Clone)]
pub struct LocalAddress {
    hostname: String,
    addr: SocketAddr,
}

impl LocalAddress {
    pub fn new(hostname: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            hostname: hostname.into(),
            addr,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL of pages served by the proxy.
    pub fn url(&self) -> String {
        match self.addr.port() {
            80 => format!("http://{}", self.hostname),
            port => format!("http://{}:{}", self.hostname, port),
        }
    }

    fn is_local_ip(&self, ip: IpAddr) -> bool {
        let own = self.addr.ip();
        if own.is_unspecified() {
            ip.is_loopback() || ip.is_unspecified()
        } else {
            ip == own
        }
    }

    /// Whether `host:port` names this proxy.
    pub async fn is_local(&self, host: &str, port: u16) -> bool {
        if port != self.addr.port() {
            return false;
        }
        if host.eq_ignore_ascii_case(&self.hostname) {
            return true;
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            return self.is_local_ip(ip);
        }
        match lookup_host((host, port)).await {
            Ok(mut addrs) => addrs.any(|addr| self.is_local_ip(addr.ip())),
            Err(_) => false,
        }
    }
}

/// Reject requests that no relay protocol can serve.
pub fn classify(request: &Request) -> Result<(), HttpError> {
    let has_body = request.has_body_headers();

    if request.compare_version(1, 1).is_lt() {
        return Err(HttpError::new(400, ErrorKey::ProtocolVersion)
            .with_detail(request.version().to_string())
            .fatal(true));
    }
    if !request.headers().contains("Host") {
        return Err(HttpError::new(400, ErrorKey::HostHeader).fatal(has_body));
    }
    if let Coding::Unknown(coding) = transfer_coding(request) {
        return Err(HttpError::new(400, ErrorKey::ClientCoding)
            .with_detail(coding)
            .fatal(true));
    }
    if !request.is_connect() {
        if let Some(scheme) = request.uri().scheme() {
            if scheme != "http" {
                return Err(HttpError::new(501, ErrorKey::RequestScheme)
                    .with_detail(scheme)
                    .fatal(has_body));
            }
        }
    }
    Ok(())
}

/// Split a `Host` header value into host and optional port.
fn split_host_header(value: &str) -> (&str, Option<&str>) {
    let value = value.trim();
    if value.starts_with('[') {
        return match value.find(']') {
            Some(end) => {
                let port = value[end + 1..].strip_prefix(':');
                (&value[1..end], port)
            }
            None => (value, None),
        };
    }
    match value.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (value, None),
    }
}

/// Origin host and port from the URI, the `Host` header and the scheme.
pub fn origin_address(request: &Request) -> Result<OriginAddress, HttpError> {
    let uri = request.uri();
    let host_header = request.headers().get("Host").map(split_host_header);

    let host = match (uri.host(), host_header) {
        (Some(host), _) => host.to_string(),
        (None, Some((host, _))) if !host.is_empty() => host.to_ascii_lowercase(),
        _ => return Err(HttpError::new(400, ErrorKey::HostHeader).fatal(true)),
    };

    let port = match (uri.port(), host_header.and_then(|(_, port)| port)) {
        (Some(port), _) => port,
        (None, Some(port)) => port.trim().parse().map_err(|_| {
            HttpError::new(400, ErrorKey::HostHeader)
                .with_detail(port)
                .fatal(true)
        })?,
        (None, None) if uri.scheme() == Some("https") => 443,
        (None, None) => 80,
    };

    Ok(OriginAddress::new(host, port))
}

/// `OPTIONS`/`TRACE` with `Max-Forwards: 0` is answered by the proxy.
fn ends_here(request: &Request) -> bool {
    let method = request.method();
    (method.eq_ignore_ascii_case("OPTIONS") || method.eq_ignore_ascii_case("TRACE"))
        && request
            .headers()
            .get("Max-Forwards")
            .is_some_and(|v| v.trim() == "0")
}

/// Pick the relay protocol for a classified request.
pub async fn route(request: &Request, origin: &OriginAddress, local: &LocalAddress) -> Route {
    if request.is_connect() {
        Route::Tunnel
    } else if ends_here(request) || local.is_local(&origin.host, origin.port).await {
        Route::Local
    } else {
        Route::Regular
    }
}
