//! Client-facing listener.
//!
//! # Responsibilities
//! - Bind the address browsers are configured to use as their proxy
//! - Hand out one connection slot per accepted browser connection
//! - Stop accepting while `max_connections` handlers are busy
//!
//! # Design Decisions
//! - The slot is taken before `accept`, so excess browsers queue in the
//!   kernel backlog instead of holding idle sockets
//! - The slot travels with the handler task and is freed when it ends

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// The proxy address could not be bound.
    Bind(std::io::Error),
    /// A browser connection could not be accepted.
    Accept(std::io::Error),
    /// The slot semaphore was closed.
    Closed,
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "cannot bind proxy address: {e}"),
            ListenerError::Accept(e) => write!(f, "cannot accept client connection: {e}"),
            ListenerError::Closed => write!(f, "listener closed"),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Proxy listener with a fixed number of handler slots.
pub struct Listener {
    socket: TcpListener,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;
        let socket = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let bound = socket.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %bound,
            hostname = %config.hostname,
            max_connections = config.max_connections,
            "Proxy listening"
        );

        Ok(Self {
            socket,
            slots: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        })
    }

    /// Wait for a free slot, then for the next browser connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;
        let (stream, peer) = self.socket.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %peer,
            free_slots = self.slots.available_permits(),
            "Client connection accepted"
        );
        Ok((stream, peer, ConnectionPermit { _slot: slot }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.socket.local_addr()
    }

    /// Slots not taken by a running handler.
    pub fn available_permits(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// One handler slot. Dropping it lets the listener accept again.
#[derive(Debug)]
pub struct ConnectionPermit {
    _slot: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permits_are_held_per_connection() {
        let config = ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_connections: 2,
            ..ListenerConfig::default()
        };
        let listener = Listener::bind(&config).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert_eq!(listener.max_connections(), 2);

        let _client = TcpStream::connect(addr).await.unwrap();
        let (_stream, _peer, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 1);
        drop(permit);
        assert_eq!(listener.available_permits(), 2);
    }

    #[tokio::test]
    async fn full_listener_waits_for_a_free_slot() {
        let config = ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_connections: 1,
            ..ListenerConfig::default()
        };
        let listener = Listener::bind(&config).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _first = TcpStream::connect(addr).await.unwrap();
        let (_stream, _peer, permit) = listener.accept().await.unwrap();

        let _second = TcpStream::connect(addr).await.unwrap();
        let blocked =
            tokio::time::timeout(std::time::Duration::from_millis(100), listener.accept()).await;
        assert!(blocked.is_err());

        drop(permit);
        assert!(listener.accept().await.is_ok());
    }

    #[tokio::test]
    async fn bad_address_fails_to_bind() {
        let config = ListenerConfig {
            bind_address: "not an address".to_string(),
            ..ListenerConfig::default()
        };
        assert!(matches!(
            Listener::bind(&config).await,
            Err(ListenerError::Bind(_))
        ));
    }
}
