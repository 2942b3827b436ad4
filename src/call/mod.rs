//! Per-call state on both sides of the rendezvous.
//!
//! # Data Flow
//! ```text
//! Transport side:                       Application side:
//!   accept_stream                         request_call / request_registered_call
//!     → IncomingCall (NotStarted)           → RequestSlot (tag, queues, outputs)
//!     → metadata read, routed               → queued on a matcher
//!     → Pending | Activated  ──── match ────┘
//!     → Zombied (error / shutdown)          → failed with ServerShutdown
//! ```
//!
//! # Design Decisions
//! - Call state is a single atomic; Pending → Activated is a compare-and-exchange
//! - Output cells stand in for caller-provided out-pointers
//! - A slot is moved, never cloned; it is dropped by the completion's done callback

pub mod incoming;
pub mod requested;
pub mod state;

use std::sync::atomic::{AtomicU64, Ordering};

pub use incoming::IncomingCall;
pub use requested::{BatchOutputs, CallDetails, OutputCell, RegisteredOutputs, RequestSlot, SlotKind};
pub use state::{AtomicCallState, CallState};

/// Relaxed ordering is enough: ids only need to be unique.
static CALL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an incoming call, used in logs and call handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(u64);

impl CallId {
    pub fn new() -> Self {
        Self(CALL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "call-{}", self.0)
    }
}
