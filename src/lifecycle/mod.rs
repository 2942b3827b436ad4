//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Server shutdown (shutdown.rs):
//!     shutdown_and_notify → flip bit 0 of shutdown refs
//!         → fail queued requests, zombify pending calls
//!         → in-flight allocator requests drop their refs
//!         → refs reach 0 and no channels remain → shutdown tags complete
//!
//! Signals (signals.rs):
//!     SIGINT → driver stops issuing work → shutdown_and_notify
//! ```
//!
//! # Design Decisions
//! - Shutdown state is one atomic word so allocating matchers never take a lock to check it
//! - Shutdown is committed once; later calls only add notification tags

pub mod shutdown;
pub mod signals;

pub use shutdown::ShutdownRefs;
