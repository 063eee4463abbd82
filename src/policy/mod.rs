//! Per-user header policy subsystem.
//!
//! # Data Flow
//! ```text
//! Request from client
//!     → block.rs (block rules / exceptions / image rules)
//!     → profile.rs apply_request (cookies, Referer, From, User-Agent)
//!     → origin
//!     → profile.rs apply_response (Set-Cookie filtering)
//!     → jar.rs (hosts whose cookies were eaten)
//! ```
//!
//! # Design Decisions
//! - All decisions read the rule lists through the user's `RuleSet`
//! - Numeric hosts are matched as given, without reverse lookups

pub mod block;
pub mod jar;
pub mod profile;

pub use block::{check_blocked, forbidden_response, redirect_response, BlockAction};
pub use jar::{CookieJar, MAX_JAR_SIZE};
pub use profile::UserProfile;
