//! Forward HTTP/HTTPS proxy library.
//!
//! Relays browser requests to origin servers (or through a forwarding
//! proxy), tunnels CONNECT requests, and applies per-user cookie, header
//! and blocking policies on the way.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod policy;
pub mod proxy;
pub mod rules;

pub use config::schema::ProxyConfig;
pub use error::{HttpError, ProxyError};
pub use lifecycle::Shutdown;
pub use proxy::ProxyServer;
