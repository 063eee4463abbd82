//! CONNECT tunnels.
//!
//! # Responsibilities
//! - Open the tunnel directly or through the forwarding proxy
//! - Confirm with `200 Connection established`
//! - Relay bytes both ways until either side finishes
//!
//! # Design Decisions
//! - Both directions run concurrently under `select!`; whichever side
//!   produces data first is served first, and the first EOF or error ends
//!   the tunnel
//! - Bytes already buffered by the request parser go out before new reads

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::TimeoutConfig;
use crate::error::{ErrorKey, HttpError, ProxyError};
use crate::http::{Message, Request, Response};
use crate::net::{connect_origin, Connection, OriginConnection};
use crate::observability::metrics;
use crate::proxy::router::OriginAddress;

const BUFFER_SIZE: usize = 8 * 1024;

/// Bytes moved by a finished tunnel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TunnelStats {
    pub upstream: u64,
    pub downstream: u64,
}

/// Ask the forwarding proxy for a tunnel to `target`.
async fn connect_via_forward(
    forward: &OriginAddress,
    target: &OriginAddress,
    timeouts: &TimeoutConfig,
    fatal: bool,
) -> Result<OriginConnection, HttpError> {
    let mut conn = connect_origin(
        &forward.host,
        forward.port,
        timeouts.connect(),
        timeouts.server(),
        fatal,
    )
    .await?;

    let authority = target.key();
    let refused = |detail: String| {
        HttpError::new(502, ErrorKey::ForwardConnect)
            .with_detail(detail)
            .fatal(fatal)
    };

    let mut request = Request::new("CONNECT", &authority)
        .map_err(|e| refused(e.to_string()))?;
    request.headers_mut().insert("Host", authority.as_str());
    conn.write(&mut request).await.map_err(|e| {
        if e.kind() == io::ErrorKind::TimedOut {
            HttpError::new(504, ErrorKey::ServerTimeout).fatal(fatal)
        } else {
            refused(e.to_string())
        }
    })?;

    let mut reply = Response::default();
    match conn.read(&mut reply).await {
        Ok(()) if reply.status() == 200 => Ok(conn),
        Ok(()) => {
            conn.close().await;
            Err(refused(reply.status().to_string()))
        }
        Err(e) => {
            conn.close().await;
            Err(refused(e.to_string()))
        }
    }
}

/// Copy until EOF, counting into `moved` so the count survives cancellation.
async fn pump<R, W>(reader: &mut R, writer: &mut W, moved: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *moved += n as u64;
    }
}

/// Relay raw bytes between two connections until one side is done.
pub async fn relay<A, B>(client: &mut Connection<A>, origin: &mut Connection<B>) -> TunnelStats
where
    A: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let mut stats = TunnelStats::default();
    let (client_reader, client_writer) = client.split();
    let (origin_reader, origin_writer) = origin.split();

    let result = tokio::select! {
        r = pump(client_reader, origin_writer, &mut stats.upstream) => r,
        r = pump(origin_reader, client_writer, &mut stats.downstream) => r,
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "Tunnel ended with error");
    }
    stats
}

/// Serve one CONNECT request. The client connection is spent afterwards.
pub async fn serve(
    client: &mut Connection<TcpStream>,
    request: &Request,
    target: &OriginAddress,
    forward: Option<&OriginAddress>,
    timeouts: &TimeoutConfig,
) -> Result<u16, ProxyError> {
    let fatal = request.has_body_headers();
    let mut origin = match forward {
        Some(forward) => connect_via_forward(forward, target, timeouts, fatal).await?,
        None => {
            connect_origin(
                &target.host,
                target.port,
                timeouts.connect(),
                timeouts.server(),
                fatal,
            )
            .await?
        }
    };

    let mut established = Response::new(200, "Connection established");
    client.write(&mut established).await?;

    tracing::debug!(target = %target.key(), "Tunnel established");
    let stats = relay(client, &mut origin).await;
    metrics::record_tunnel_bytes("upstream", stats.upstream);
    metrics::record_tunnel_bytes("downstream", stats.downstream);
    tracing::debug!(
        target = %target.key(),
        upstream = stats.upstream,
        downstream = stats.downstream,
        "Tunnel closed"
    );

    origin.close().await;
    client.set_keep_connection(false);
    Ok(200)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn relay_moves_bytes_both_ways() {
        let (client_side, mut browser) = duplex(1024);
        let (origin_side, mut server) = duplex(1024);
        let mut client = Connection::new(client_side, "client", Duration::from_secs(5));
        let mut origin = Connection::new(origin_side, "origin", Duration::from_secs(5));

        let task = tokio::spawn(async move { relay(&mut client, &mut origin).await });

        browser.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        browser.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        drop(server);
        let stats = task.await.unwrap();
        assert_eq!(stats, TunnelStats { upstream: 4, downstream: 5 });
    }

    #[tokio::test]
    async fn forward_proxy_refusal_is_502() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let forward_proxy = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            let head = String::from_utf8_lossy(&buf[..n]).to_string();
            socket
                .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
            head
        });

        let forward = OriginAddress::new("127.0.0.1", port);
        let target = OriginAddress::new("secure.example", 443);
        let err = connect_via_forward(&forward, &target, &TimeoutConfig::default(), false)
            .await
            .unwrap_err();
        assert_eq!((err.status, err.key), (502, ErrorKey::ForwardConnect));
        assert_eq!(err.detail.as_deref(), Some("403"));

        let head = forward_proxy.await.unwrap();
        assert!(head.starts_with("CONNECT secure.example:443 HTTP/1.1\r\n"));
        assert!(head.contains("Host: secure.example:443\r\n"));
    }
}
