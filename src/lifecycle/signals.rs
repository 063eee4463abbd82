//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for Ctrl-C (SIGINT)
//! - Translate it into the shutdown broadcast
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A failure to install the handler is logged, the proxy keeps running

use crate::lifecycle::Shutdown;

/// Trigger `shutdown` on the first Ctrl-C.
pub async fn shutdown_on_ctrl_c(shutdown: Shutdown) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Interrupt received, shutting down");
            shutdown.trigger();
        }
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
    }
}
