//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT / Ctrl-C
//! - Flip a shared stop flag the driver's worker threads poll
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Worker threads are plain OS threads, so the signal only sets an atomic

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Resolve on Ctrl-C, then set `stop`.
pub async fn stop_on_ctrl_c(stop: Arc<AtomicBool>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl-C, stopping workload");
            stop.store(true, Ordering::SeqCst);
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        }
    }
}
