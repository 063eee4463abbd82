//! Per-connection request loop.
//!
//! # Responsibilities
//! - Wait for the next request on a kept-alive client connection
//! - Parse, classify and route each request
//! - Render classified failures as HTML error pages
//! - Weed the connection's origin pool while the client is idle
//!
//! # Design Decisions
//! - One handler per client connection, owned by one task; the origin pool
//!   is private to it
//! - This is the only place where errors turn into responses
//! - Shutdown is checked between requests, never in the middle of one

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::error::{ErrorKey, HttpError, ProxyError};
use crate::http::{Message, Request, Response};
use crate::net::{Connection, ConnectionId, ConnectionPool, Readiness};
use crate::observability::metrics;
use crate::proxy::context::ProxyContext;
use crate::proxy::http_date;
use crate::proxy::router::{self, Route};
use crate::proxy::{local, regular, tunnel};

/// Serves every request arriving on one client connection.
pub struct ClientHandler {
    ctx: Arc<ProxyContext>,
    id: ConnectionId,
    client: Connection<TcpStream>,
    pool: ConnectionPool,
    request: Request,
}

impl ClientHandler {
    pub fn new(ctx: Arc<ProxyContext>, id: ConnectionId, stream: TcpStream, peer: String) -> Self {
        let timeouts = &ctx.timeouts;
        let client = Connection::new(stream, peer, timeouts.server());
        let pool = ConnectionPool::new(timeouts.connect(), timeouts.server());
        Self {
            ctx,
            id,
            client,
            pool,
            request: Request::default(),
        }
    }

    /// Handle requests until the connection is no longer kept alive.
    pub async fn run(mut self) {
        tracing::debug!(connection_id = %self.id, peer_addr = %self.client.peer(), "Handler started");

        loop {
            match self.client.wait_for_data(self.ctx.timeouts.client_wait()).await {
                Ok(Readiness::Data) => {}
                Ok(Readiness::Eof) => break,
                Ok(Readiness::Idle) => {
                    if self.ctx.shutdown.is_triggered()
                        || self.client.idle_time() > self.ctx.timeouts.server()
                    {
                        break;
                    }
                    let weeded = self.pool.weed(self.ctx.timeouts.server_idle()).await;
                    if weeded > 0 {
                        tracing::trace!(connection_id = %self.id, weeded, "Weeded origin pool");
                    }
                    continue;
                }
                Err(e) => {
                    tracing::debug!(connection_id = %self.id, error = %e, "Client read failed");
                    break;
                }
            }

            self.handle_request().await;
            if !self.client.keep_connection() || self.ctx.shutdown.is_triggered() {
                break;
            }
        }

        self.pool.clear().await;
        self.client.close().await;
        tracing::debug!(connection_id = %self.id, "Handler finished");
    }

    /// One request cycle, errors included.
    async fn handle_request(&mut self) {
        let started = Instant::now();
        let (route, result) = self.process().await;
        let label = route.map_or("invalid", |r| r.label());

        let status = match result {
            Ok(status) => Some(status),
            Err(ProxyError::Http(error)) => self.send_error(&error).await,
            Err(ProxyError::Protocol(e)) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Malformed request");
                let error = HttpError::new(400, ErrorKey::BadRequest)
                    .with_detail(e.0)
                    .fatal(true);
                self.send_error(&error).await
            }
            Err(e) => {
                tracing::debug!(
                    connection_id = %self.id,
                    route = label,
                    error = %e,
                    "Connection dropped"
                );
                self.client.set_keep_connection(false);
                None
            }
        };

        if let Some(status) = status {
            metrics::record_request(label, status);
            tracing::debug!(
                connection_id = %self.id,
                route = label,
                method = %self.request.method(),
                target = %self.request.uri().source(),
                status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Request completed"
            );
        }
    }

    async fn process(&mut self) -> (Option<Route>, Result<u16, ProxyError>) {
        if let Err(e) = self.client.read(&mut self.request).await {
            return (None, Err(e));
        }
        let ctx = Arc::clone(&self.ctx);
        let request = &mut self.request;

        let origin = match router::classify(request).and_then(|()| router::origin_address(request)) {
            Ok(origin) => origin,
            Err(e) => return (None, Err(e.into())),
        };
        let route = router::route(request, &origin, &ctx.local).await;
        tracing::trace!(
            connection_id = %self.id,
            method = %request.method(),
            host = %origin.host,
            route = route.label(),
            "Routing request"
        );

        let result = match route {
            Route::Tunnel => {
                tunnel::serve(
                    &mut self.client,
                    request,
                    &origin,
                    ctx.forward.as_ref(),
                    &ctx.timeouts,
                )
                .await
            }
            Route::Local => {
                local::serve(
                    &mut self.client,
                    request,
                    &ctx.profile,
                    ctx.service.as_ref(),
                    &ctx.resources,
                    ctx.timeouts.server(),
                )
                .await
            }
            Route::Regular => {
                regular::serve(&ctx, &mut self.client, &mut self.pool, request, &origin).await
            }
        };
        (Some(route), result)
    }

    /// Send the error page. Returns the status if it went out.
    async fn send_error(&mut self, error: &HttpError) -> Option<u16> {
        tracing::debug!(connection_id = %self.id, error = %error, "Answering with error page");
        if error.fatal {
            self.client.set_keep_connection(false);
        }

        let (mut response, body) = error_response(error);
        let head_only = self.request.method().eq_ignore_ascii_case("HEAD");
        let sent = async {
            self.client.write(&mut response).await?;
            if !head_only {
                self.client.write_body(&body).await?;
            }
            Ok::<_, std::io::Error>(())
        }
        .await;

        match sent {
            Ok(()) => Some(error.status),
            Err(e) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Failed to send error page");
                self.client.set_keep_connection(false);
                None
            }
        }
    }
}

/// Head and HTML body of the page for `error`.
pub fn error_response(error: &HttpError) -> (Response, Vec<u8>) {
    let body = error.html().into_bytes();
    let mut response = Response::new(error.status, error.reason());
    let headers = response.headers_mut();
    headers.insert("Date", http_date());
    headers.insert("Content-Type", "text/html");
    headers.insert("Content-Length", body.len().to_string());
    (response, body)
}
