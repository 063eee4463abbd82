//! Relay of ordinary requests to an origin server.
//!
//! # Responsibilities
//! - Answer blocked requests locally
//! - Forward the request head and body over a pooled origin connection
//! - Relay interim responses, then the final response and its body
//! - Decide whether the origin connection can go back to the pool
//!
//! # Design Decisions
//! - The body strategy (chunked, length, close-delimited) is picked before
//!   the response head is written, so a close-delimited body already
//!   announces `Connection: close`
//! - Any error drops the origin connection; only clean exchanges return it

use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{ErrorKey, HttpError, ProxyError};
use crate::http::{Message, Request, Response};
use crate::net::{Connection, ConnectionPool, OriginConnection};
use crate::observability::metrics;
use crate::policy::{forbidden_response, redirect_response, BlockAction};
use crate::proxy::body::{
    content_length, copy_chunked, copy_length, copy_to_end, transfer_coding, Coding,
};
use crate::proxy::context::ProxyContext;
use crate::proxy::http_date;
use crate::proxy::router::OriginAddress;

type ClientConnection = Connection<TcpStream>;

/// How the response body is delimited on the way to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Empty,
    Chunked,
    Length(u64),
    Close,
}

fn is_method(request: &Request, method: &str) -> bool {
    request.method().eq_ignore_ascii_case(method)
}

/// The URL shown on the block page.
fn blocked_url(request: &Request, host: &str) -> String {
    let uri = request.uri();
    if uri.host().is_some() {
        uri.source().to_string()
    } else {
        format!("http://{host}{}", uri.abs_path())
    }
}

/// Answer the request with a block page if a block rule fires.
async fn answer_blocked(
    ctx: &ProxyContext,
    client: &mut ClientConnection,
    request: &Request,
) -> Result<Option<u16>, ProxyError> {
    let host = request.headers().get("Host").unwrap_or_default();
    let path = request.full_path();
    let Some(action) = ctx.profile.check_blocked(host, path.as_deref()) else {
        return Ok(None);
    };

    metrics::record_blocked(action.label());
    tracing::info!(
        host = %host,
        path = path.as_deref().unwrap_or(""),
        action = action.label(),
        "Request blocked"
    );

    let local_url = ctx.local_url();
    let (mut response, body) = match action {
        BlockAction::Redirect => (redirect_response(&local_url), Vec::new()),
        BlockAction::Forbidden { rule_id } => {
            forbidden_response(&local_url, rule_id, &blocked_url(request, host))
        }
    };
    response.headers_mut().insert("Date", http_date());

    if request.has_body_headers() {
        client.set_keep_connection(false);
    }
    client.write(&mut response).await?;
    if !body.is_empty() && !is_method(request, "HEAD") {
        client.write_body(&body).await?;
    }
    Ok(Some(response.status()))
}

/// Count `Max-Forwards` down by one, never below zero.
///
/// A value of zero never gets here: the router answers those requests locally.
fn decrement_max_forwards(request: &mut Request, fatal: bool) -> Result<(), HttpError> {
    let Some(value) = request.headers().get("Max-Forwards") else {
        return Ok(());
    };
    let hops: u32 = value.trim().parse().map_err(|_| {
        HttpError::new(400, ErrorKey::MaxForwards)
            .with_detail(value)
            .fatal(fatal)
    })?;
    request
        .headers_mut()
        .insert("Max-Forwards", hops.saturating_sub(1).to_string());
    Ok(())
}

/// A failed write to the origin: timeouts become 504, the rest stays I/O.
fn origin_write_error(err: std::io::Error, fatal: bool) -> ProxyError {
    if err.kind() == std::io::ErrorKind::TimedOut {
        HttpError::new(504, ErrorKey::ServerTimeout).fatal(fatal).into()
    } else {
        err.into()
    }
}

/// Read one response head from the origin and apply the response policy.
async fn read_response(
    ctx: &ProxyContext,
    server: &mut OriginConnection,
    response: &mut Response,
    host: &str,
    fatal: bool,
) -> Result<(), ProxyError> {
    if let Err(e) = server.read(response).await {
        if e.is_timeout() {
            return Err(HttpError::new(504, ErrorKey::ServerTimeout).fatal(fatal).into());
        }
        tracing::debug!(origin = %server.peer(), error = %e, "Unreadable origin response");
        return Err(HttpError::new(502, ErrorKey::BadResponse).fatal(fatal).into());
    }

    if let Coding::Unknown(coding) = transfer_coding(&*response) {
        return Err(HttpError::new(500, ErrorKey::ServerCoding)
            .with_detail(coding)
            .fatal(fatal)
            .into());
    }

    ctx.profile.apply_response(host, response);
    Ok(())
}

async fn send_request_body(
    client: &mut ClientConnection,
    server: &mut OriginConnection,
    request: &mut Request,
    timeout: Duration,
) -> Result<(), ProxyError> {
    match transfer_coding(&*request) {
        Coding::Chunked => {
            copy_chunked(client.reader(), server.writer(), request.trailer_mut(), timeout).await?;
        }
        Coding::Unknown(coding) => {
            return Err(HttpError::new(400, ErrorKey::ClientCoding)
                .with_detail(coding)
                .fatal(true)
                .into());
        }
        Coding::Identity => match content_length(&*request) {
            Ok(Some(length)) => {
                copy_length(client.reader(), server.writer(), length, timeout).await?;
            }
            Ok(None) => {}
            Err(value) => {
                return Err(HttpError::new(400, ErrorKey::BadContentLength)
                    .with_detail(value)
                    .fatal(true)
                    .into());
            }
        },
    }
    Ok(())
}

/// Write the final response head and relay its body.
async fn send_response(
    client: &mut ClientConnection,
    server: &mut OriginConnection,
    request: &Request,
    response: &mut Response,
    timeout: Duration,
) -> Result<u16, ProxyError> {
    let framing = if response.is_bodyless() || is_method(request, "HEAD") {
        Framing::Empty
    } else if transfer_coding(&*response) == Coding::Chunked {
        Framing::Chunked
    } else {
        match content_length(&*response) {
            Ok(Some(length)) => Framing::Length(length),
            Ok(None) => Framing::Close,
            Err(value) => {
                return Err(HttpError::new(502, ErrorKey::BadContentLength)
                    .with_detail(value)
                    .into());
            }
        }
    };

    if framing == Framing::Close {
        client.set_keep_connection(false);
        server.set_keep_connection(false);
    }
    client.write(response).await?;

    match framing {
        Framing::Empty => {}
        Framing::Chunked => {
            copy_chunked(server.reader(), client.writer(), response.trailer_mut(), timeout).await?;
        }
        Framing::Length(length) => {
            copy_length(server.reader(), client.writer(), length, timeout).await?;
        }
        Framing::Close => {
            copy_to_end(server.reader(), client.writer(), timeout).await?;
        }
    }

    if response.compare_version(1, 1).is_lt() {
        server.set_keep_connection(false);
    }
    Ok(response.status())
}

async fn exchange(
    ctx: &ProxyContext,
    client: &mut ClientConnection,
    server: &mut OriginConnection,
    request: &mut Request,
    origin: &OriginAddress,
    expect_continue: bool,
) -> Result<u16, ProxyError> {
    let has_body = request.has_body_headers();
    let timeout = ctx.timeouts.server();

    if is_method(request, "OPTIONS") || is_method(request, "TRACE") {
        decrement_max_forwards(request, has_body)?;
    }
    ctx.profile.apply_request(request);
    if ctx.forward.is_none() {
        let abs_path = request.uri().abs_path().to_string();
        request.set_target(&abs_path)?;
    }

    server
        .write(request)
        .await
        .map_err(|e| origin_write_error(e, has_body))?;

    let mut response = Response::default();
    if expect_continue {
        read_response(ctx, server, &mut response, &origin.host, has_body).await?;
        if response.status() != 100 {
            return send_response(client, server, request, &mut response, timeout).await;
        }
        client.write(&mut response).await?;
    }

    send_request_body(client, server, request, timeout).await?;

    loop {
        read_response(ctx, server, &mut response, &origin.host, false).await?;
        if !response.is_interim() {
            break;
        }
        client.write(&mut response).await?;
    }
    send_response(client, server, request, &mut response, timeout).await
}

/// Relay one request to `origin`. Returns the status sent to the client.
pub async fn serve(
    ctx: &ProxyContext,
    client: &mut ClientConnection,
    pool: &mut ConnectionPool,
    request: &mut Request,
    origin: &OriginAddress,
) -> Result<u16, ProxyError> {
    if let Some(status) = answer_blocked(ctx, client, request).await? {
        return Ok(status);
    }

    let has_body = request.has_body_headers();
    let expect_continue = match request.headers().get("Expect") {
        None => false,
        Some(value) if value.trim().eq_ignore_ascii_case("100-continue") => true,
        Some(value) => {
            return Err(HttpError::new(417, ErrorKey::ExpectExtension)
                .with_detail(value)
                .fatal(has_body)
                .into());
        }
    };

    let dial = ctx.dial_address(origin);
    let key = dial.key();
    let mut server = pool.acquire(&key, &dial.host, dial.port, has_body).await?;

    let result = exchange(ctx, client, &mut server, request, origin, expect_continue).await;
    if result.is_ok() {
        pool.release(&key, server).await;
    } else {
        server.close().await;
    }
    result
}
