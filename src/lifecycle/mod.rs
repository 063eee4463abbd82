//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Scheduler (scheduler.rs):
//!     tick → due tasks (rule re-sort, rule persistence)
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Save rules → Exit
//!
//! Signals (signals.rs):
//!     SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, persist
//! - Handlers check the shutdown flag between requests, never mid-relay

pub mod scheduler;
pub mod shutdown;
pub mod signals;

pub use scheduler::Scheduler;
pub use shutdown::Shutdown;
