//! Per-handler cache of origin connections.
//!
//! # Responsibilities
//! - Reuse one idle connection per `host:port` key
//! - Probe pooled connections before reuse and evict stale ones
//! - Open new connections and classify connect failures
//!
//! # Design Decisions
//! - A pool belongs to one client connection task, so it needs no locking
//! - Connections are moved out while in use and handed back afterwards

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tokio::time;

use crate::error::{ErrorKey, HttpError};
use crate::net::connection::Connection;
use crate::observability::metrics;

pub type OriginConnection = Connection<TcpStream>;

/// `host` plus `:port` unless the port is 80.
pub fn host_detail(host: &str, port: u16) -> String {
    if port == 80 {
        host.to_string()
    } else {
        format!("{host}:{port}")
    }
}

/// Map a failed connect attempt to the error page the client gets.
pub fn classify_connect_error(err: &io::Error, host: &str, port: u16, fatal: bool) -> HttpError {
    let error = match err.kind() {
        io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
            HttpError::new(502, ErrorKey::NoRoute).with_detail(host)
        }
        io::ErrorKind::ConnectionRefused => {
            HttpError::new(502, ErrorKey::HostConnect).with_detail(host_detail(host, port))
        }
        io::ErrorKind::TimedOut => HttpError::new(504, ErrorKey::ServerTimeout),
        _ => HttpError::new(502, ErrorKey::PortConnect).with_detail(host_detail(host, port)),
    };
    error.fatal(fatal)
}

/// Resolve and connect within `connect_timeout`.
///
/// `fatal` marks the resulting error as closing the client connection.
pub async fn connect_origin(
    host: &str,
    port: u16,
    connect_timeout: Duration,
    io_timeout: Duration,
    fatal: bool,
) -> Result<OriginConnection, HttpError> {
    let attempt = async {
        let addrs: Vec<_> = lookup_host((host, port))
            .await
            .map_err(|_| HttpError::new(404, ErrorKey::UnknownHost).with_detail(host))?
            .collect();
        if addrs.is_empty() {
            return Err(HttpError::new(404, ErrorKey::UnknownHost).with_detail(host));
        }

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        let err = last_error.unwrap_or_else(|| io::Error::other("no address to connect to"));
        Err(classify_connect_error(&err, host, port, fatal))
    };

    let stream = match time::timeout(connect_timeout, attempt).await {
        Ok(result) => result.map_err(|e| e.fatal(fatal))?,
        Err(_) => return Err(HttpError::new(504, ErrorKey::ServerTimeout).fatal(fatal)),
    };

    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(host = %host, error = %e, "Failed to set TCP_NODELAY");
    }
    let peer = format!("{host}:{port}");
    tracing::debug!(origin = %peer, "Origin connection opened");
    metrics::record_origin_connection("opened");
    Ok(Connection::new(stream, peer, io_timeout))
}

/// Idle origin connections keyed by `host:port`.
#[derive(Debug)]
pub struct ConnectionPool {
    connections: HashMap<String, OriginConnection>,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connections: HashMap::new(),
            connect_timeout,
            io_timeout,
        }
    }

    /// A clean pooled connection for `key`, or a freshly opened one.
    pub async fn acquire(
        &mut self,
        key: &str,
        host: &str,
        port: u16,
        fatal: bool,
    ) -> Result<OriginConnection, HttpError> {
        if let Some(mut conn) = self.connections.remove(key) {
            if conn.probe().await {
                tracing::trace!(origin = %key, "Reusing origin connection");
                metrics::record_origin_connection("reused");
                conn.set_keep_connection(true);
                return Ok(conn);
            }
            tracing::debug!(origin = %key, "Evicting stale origin connection");
            metrics::record_origin_connection("evicted");
            conn.close().await;
        }

        connect_origin(host, port, self.connect_timeout, self.io_timeout, fatal).await
    }

    /// Hand a connection back. Closed or non-keep-alive ones are dropped.
    pub async fn release(&mut self, key: &str, mut conn: OriginConnection) {
        if conn.is_closed() || !conn.keep_connection() {
            conn.close().await;
            return;
        }
        if let Some(mut old) = self.connections.insert(key.to_string(), conn) {
            old.close().await;
        }
    }

    /// Drop connections idle longer than `max_idle`. Returns how many went.
    pub async fn weed(&mut self, max_idle: Duration) -> usize {
        let stale: Vec<String> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.is_closed() || conn.idle_time() > max_idle)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            if let Some(mut conn) = self.connections.remove(key) {
                conn.close().await;
                metrics::record_origin_connection("evicted");
            }
        }
        stale.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.connections.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub async fn clear(&mut self) {
        for (_, mut conn) in self.connections.drain() {
            conn.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn pool() -> ConnectionPool {
        ConnectionPool::new(Duration::from_secs(5), Duration::from_secs(5))
    }

    #[test]
    fn connect_errors_map_to_statuses() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        let e = classify_connect_error(&refused, "h", 8080, true);
        assert_eq!((e.status, e.key), (502, ErrorKey::HostConnect));
        assert_eq!(e.detail.as_deref(), Some("h:8080"));
        assert!(e.fatal);

        let unreachable = io::Error::from(io::ErrorKind::HostUnreachable);
        let e = classify_connect_error(&unreachable, "h", 8080, false);
        assert_eq!((e.status, e.key), (502, ErrorKey::NoRoute));
        assert_eq!(e.detail.as_deref(), Some("h"));

        let other = io::Error::from(io::ErrorKind::ConnectionReset);
        let e = classify_connect_error(&other, "h", 80, false);
        assert_eq!((e.status, e.key), (502, ErrorKey::PortConnect));
        assert_eq!(e.detail.as_deref(), Some("h"));
    }

    #[tokio::test]
    async fn unknown_host_is_404() {
        let err = pool()
            .acquire("no-such-host.invalid:80", "no-such-host.invalid", 80, false)
            .await
            .unwrap_err();
        assert_eq!((err.status, err.key), (404, ErrorKey::UnknownHost));
        assert_eq!(err.detail.as_deref(), Some("no-such-host.invalid"));
    }

    #[tokio::test]
    async fn refused_port_is_502() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = pool()
            .acquire("k", "127.0.0.1", port, true)
            .await
            .unwrap_err();
        assert_eq!((err.status, err.key), (502, ErrorKey::HostConnect));
        assert!(err.fatal);
    }

    #[tokio::test]
    async fn idle_connections_are_reused_and_dirty_ones_evicted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (dirty_tx, dirty_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            dirty_rx.await.unwrap();
            first.write_all(b"garbage").await.unwrap();
            let (_second, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let mut pool = pool();
        let key = format!("127.0.0.1:{port}");
        let conn = pool.acquire(&key, "127.0.0.1", port, false).await.unwrap();
        pool.release(&key, conn).await;
        assert!(pool.contains(&key));

        let conn = pool.acquire(&key, "127.0.0.1", port, false).await.unwrap();
        pool.release(&key, conn).await;
        assert_eq!(pool.len(), 1);

        dirty_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut conn = pool.acquire(&key, "127.0.0.1", port, false).await.unwrap();
        assert!(pool.is_empty());
        assert!(!conn.is_closed());
        conn.set_keep_connection(false);
        pool.release(&key, conn).await;
        assert!(pool.is_empty());

        server.abort();
    }

    #[tokio::test]
    async fn weed_drops_idle_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let _held = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut pool = pool();
        let conn = pool.acquire("k", "127.0.0.1", port, false).await.unwrap();
        pool.release("k", conn).await;
        assert_eq!(pool.weed(Duration::from_secs(60)).await, 0);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(pool.weed(Duration::from_millis(10)).await, 1);
        assert!(pool.is_empty());
    }
}
