//! Forward proxy protocol engine.
//!
//! # Data Flow
//! ```text
//! server.rs (accept loop)
//!     → handler.rs (per-connection request loop)
//!     → router.rs (classify, origin address, route)
//!     → one of:
//!         tunnel.rs  (CONNECT: byte relay, optionally via the forward proxy)
//!         local.rs   (proxy's own pages and /res/ resources)
//!         regular.rs (block check, header policy, origin exchange)
//!     → body.rs (chunked / length / close-delimited transfer)
//! ```
//!
//! # Design Decisions
//! - The route is picked once per request as a plain enum
//! - Errors from every layer surface in the handler, which renders them
//! - Origin connections never outlive the client connection that opened them

pub mod body;
pub mod context;
pub mod handler;
pub mod local;
pub mod regular;
pub mod router;
pub mod server;
pub mod tunnel;

pub use context::ProxyContext;
pub use handler::ClientHandler;
pub use local::{LocalResponse, LocalService, Resources, StatusPage};
pub use router::{LocalAddress, OriginAddress, Route};
pub use server::{ProxyServer, ServerError};

/// Current time in RFC 1123 format, as used by the `Date` header.
pub fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_date_format() {
        let date = http_date();
        let parsed = chrono::NaiveDateTime::parse_from_str(&date, "%a, %d %b %Y %H:%M:%S GMT");
        assert!(parsed.is_ok(), "{date}");
    }
}
