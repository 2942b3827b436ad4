//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Matchers, channels, server:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stdout (fmt layer)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - The library only emits; installing a subscriber or exporter is the binary's job
//! - Metrics are cheap (atomic increments), safe to record on the fast path

pub mod logging;
pub mod metrics;
