//! Rule engine subsystem.
//!
//! # Data Flow
//! ```text
//! Request host / URL
//!     → set.rs (the six per-user lists)
//!     → host.rs (component-wise host patterns, cookie lists)
//!       url.rs  (host regex + path regex, block/image lists)
//!     → list.rs (most-hit-first scan, hit counting)
//!     → matching RuleEntry, or none
//!
//! Persistence:
//!     rules directory ↔ set.rs ↔ read_from / write_to per list
//! ```
//!
//! # Design Decisions
//! - Lists are internally synchronized, callers share them by reference
//! - Hit counts drive probe order; display order is computed on demand
//! - Persisted hit counts survive restarts

pub mod host;
pub mod list;
pub mod set;
pub mod url;
pub mod wildcard;

pub use host::{HostRule, HostRuleList};
pub use list::{Rule, RuleEntry, RuleList};
pub use set::RuleSet;
pub use url::{UrlRule, UrlRuleList};
pub use wildcard::WildcardMatcher;

/// Rule construction and persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("empty host pattern")]
    EmptyPattern,

    #[error("a URL rule needs a host or a path pattern")]
    MissingPatterns,

    #[error("invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("rule file I/O: {0}")]
    Io(#[from] std::io::Error),
}
