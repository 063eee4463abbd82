//! Requests addressed to the proxy itself.
//!
//! # Responsibilities
//! - Serve static resources under `/res/`
//! - Hand other GET/HEAD/POST requests to a [`LocalService`]
//! - Answer everything else with 411, 400 or 501
//!
//! # Design Decisions
//! - The config UI is a collaborator behind a trait; the crate ships a small
//!   status page so the proxy is usable without one
//! - `default.css` and `blank.gif` are compiled in and can be overridden by
//!   files in the resources directory

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{ErrorKey, HttpError, ProxyError};
use crate::http::{Message, Request, Response};
use crate::net::Connection;
use crate::policy::UserProfile;
use crate::proxy::body::{content_length, read_length};
use crate::proxy::http_date;

/// Transparent 1x1 GIF served in place of blocked images.
pub const BLANK_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

pub const DEFAULT_CSS: &str = "body { font-family: sans-serif; font-size: 10pt; }\n\
h1 { font-size: 14pt; }\n\
table { border-collapse: collapse; }\n\
td, th { border: 1px solid #ccc; padding: 2px 6px; text-align: left; }\n";

/// Body and head produced for a local request.
#[derive(Debug)]
pub struct LocalResponse {
    pub response: Response,
    pub body: Vec<u8>,
}

impl LocalResponse {
    /// `200 OK` with the given content type.
    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        let mut response = Response::new(200, "OK");
        response.headers_mut().insert("Content-Type", content_type);
        Self {
            response,
            body: body.into(),
        }
    }
}

/// The configuration UI the proxy delegates its own pages to.
pub trait LocalService: Send + Sync {
    fn get(&self, request: &Request, profile: &UserProfile) -> Result<LocalResponse, HttpError>;

    fn post(
        &self,
        request: &Request,
        body: &[u8],
        profile: &UserProfile,
    ) -> Result<LocalResponse, HttpError>;
}

/// Built-in service: a read-only status page at `/`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusPage;

impl StatusPage {
    fn render(profile: &UserProfile) -> String {
        let rules = profile.rules();
        let lists = [
            ("Cookie hosts", rules.cookie_hosts.len()),
            ("Session cookies", rules.session_cookies.len()),
            ("Cookie exceptions", rules.cookie_exceptions.len()),
            ("Block rules", rules.block_rules.len()),
            ("Block exceptions", rules.block_exceptions.len()),
            ("Image rules", rules.image_rules.len()),
        ];

        let mut page = String::from(
            "<html>\n<head>\n<title>Proxy status</title>\n\
             <link rel=\"stylesheet\" href=\"/res/default.css\">\n</head>\n<body>\n",
        );
        page.push_str(&format!("<h1>Proxy status for {}</h1>\n<table>\n", escape(profile.name())));
        for (name, count) in lists {
            page.push_str(&format!("<tr><th>{name}</th><td>{count}</td></tr>\n"));
        }
        page.push_str("</table>\n");

        for (title, hosts) in [
            ("Incoming cookies eaten", profile.in_jar().hosts()),
            ("Outgoing cookies eaten", profile.out_jar().hosts()),
        ] {
            page.push_str(&format!("<h2>{title}</h2>\n<ul>\n"));
            for host in hosts.iter().rev() {
                page.push_str(&format!("<li>{}</li>\n", escape(host)));
            }
            page.push_str("</ul>\n");
        }
        page.push_str("</body>\n</html>\n");
        page
    }
}

impl LocalService for StatusPage {
    fn get(&self, request: &Request, profile: &UserProfile) -> Result<LocalResponse, HttpError> {
        match request.uri().path().unwrap_or("/") {
            "/" => Ok(LocalResponse::ok("text/html", Self::render(profile))),
            path => Err(HttpError::new(404, ErrorKey::LocalResource).with_detail(path)),
        }
    }

    fn post(&self, _: &Request, _: &[u8], _: &UserProfile) -> Result<LocalResponse, HttpError> {
        Err(HttpError::new(501, ErrorKey::NotImplemented))
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Static files under `/res/`.
#[derive(Debug, Clone, Default)]
pub struct Resources {
    dir: Option<PathBuf>,
}

impl Resources {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn content_type(name: &str) -> &'static str {
        match Path::new(name).extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("css") => "text/css",
            Some(ext) if ext.eq_ignore_ascii_case("gif") => "image/gif",
            _ => "application/octet-stream",
        }
    }

    /// Resource bytes, from the directory first, then the built-ins.
    pub async fn load(&self, name: &str) -> Option<Vec<u8>> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return None;
        }
        if let Some(dir) = &self.dir {
            match tokio::fs::read(dir.join(name)).await {
                Ok(bytes) => return Some(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(resource = %name, error = %e, "Failed to read resource");
                }
            }
        }
        match name {
            "blank.gif" => Some(BLANK_GIF.to_vec()),
            "default.css" => Some(DEFAULT_CSS.as_bytes().to_vec()),
            _ => None,
        }
    }
}

fn is_method(request: &Request, method: &str) -> bool {
    request.method().eq_ignore_ascii_case(method)
}

async fn resource(resources: &Resources, path: &str) -> Result<LocalResponse, HttpError> {
    let name = path.trim_start_matches("/res/");
    let body = resources
        .load(name)
        .await
        .ok_or_else(|| HttpError::new(404, ErrorKey::LocalResource).with_detail(path))?;

    let mut local = LocalResponse::ok(Resources::content_type(name), body);
    local
        .response
        .headers_mut()
        .insert("Cache-Control", "max-age=43200");
    Ok(local)
}

/// Answer a request addressed to the proxy. Returns the status sent.
pub async fn serve(
    client: &mut Connection<TcpStream>,
    request: &Request,
    profile: &UserProfile,
    service: &dyn LocalService,
    resources: &Resources,
    timeout: Duration,
) -> Result<u16, ProxyError> {
    let has_body = request.has_body_headers();
    let head = is_method(request, "HEAD");

    let mut local = if is_method(request, "GET") || head {
        let path = request.uri().path().unwrap_or("/");
        let served = if path.starts_with("/res/") {
            resource(resources, path).await
        } else {
            service.get(request, profile)
        };
        // an unread body leaves the connection unusable
        served.map_err(|e| {
            let fatal = e.fatal || has_body;
            e.fatal(fatal)
        })?
    } else if is_method(request, "POST") {
        let length = match content_length(request) {
            Ok(Some(length)) => length,
            Ok(None) => {
                return Err(HttpError::new(411, ErrorKey::NoContentLength)
                    .fatal(has_body)
                    .into())
            }
            Err(value) => {
                return Err(HttpError::new(400, ErrorKey::BadContentLength)
                    .with_detail(value)
                    .fatal(true)
                    .into())
            }
        };
        let body = read_length(client.reader(), length, timeout).await?;
        service.post(request, &body, profile)?
    } else if is_method(request, "OPTIONS") || is_method(request, "TRACE") {
        return Err(HttpError::new(501, ErrorKey::NotImplemented).fatal(has_body).into());
    } else {
        return Err(HttpError::new(501, ErrorKey::MethodUnsupported)
            .with_detail(request.method())
            .fatal(has_body)
            .into());
    };

    if has_body && !is_method(request, "POST") {
        client.set_keep_connection(false);
    }

    let headers = local.response.headers_mut();
    headers.insert("Date", http_date());
    headers.insert("Content-Length", local.body.len().to_string());
    client.write(&mut local.response).await?;
    if !head && !local.body.is_empty() {
        client.write_body(&local.body).await?;
    }
    Ok(local.response.status())
}
