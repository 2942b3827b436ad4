//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming call (:authority, :path, idempotent flag)
//!     → table.rs (exact host+path probe, then host-less probe)
//!     → Return: MethodHandle of a registered method, or None
//!     → None routes the call to the unregistered matcher
//!
//! Table Compilation (per channel):
//!     RegisteredMethod[]
//!     → hash (host, path) into 2x slots with linear probing
//!     → record the longest probe sequence
//!     → Freeze as immutable RoutingTable
//! ```
//!
//! # Design Decisions
//! - Tables built when a channel is set up, immutable afterwards
//! - Lookups never probe further than the longest insert did
//! - Host-specific registrations win over host-less ones
//! - Idempotent-only methods never receive non-idempotent calls

pub mod method;
pub mod table;

pub use method::{MethodFlags, MethodHandle, MethodSpec, PayloadHandling, RegisteredMethod};
pub use table::RoutingTable;
