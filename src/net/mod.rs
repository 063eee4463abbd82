//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tracker.rs (connection id, active count)
//!     → connection.rs (buffered message I/O, keep-alive state)
//!     → Hand off to the proxy handler
//!
//! Origin side:
//!     handler → pool.rs (probe, reuse or connect) → connection.rs
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Origin pools are per client connection and never shared

pub mod connection;
pub mod listener;
pub mod pool;
pub mod tracker;

pub use connection::{Connection, Readiness};
pub use listener::{Listener, ListenerError};
pub use pool::{connect_origin, ConnectionPool, OriginConnection};
pub use tracker::{ConnectionGuard, ConnectionId, ConnectionTracker};
