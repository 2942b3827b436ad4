//! Request matchers: the rendezvous between incoming calls and application requests.
//!
//! # Data Flow
//! ```text
//! Channel (routed call)                    Server (validated request)
//!     → match_or_queue(start_cq, call)         → request_call_with_possible_publish(cq, slot)
//!         │                                        │
//!         ├─ QueueingMatcher: pop a slot,          ├─ QueueingMatcher: push the slot,
//!         │  else park call as Pending             │  drain Pending calls if queue was empty
//!         │                                        │
//!         └─ AllocatingMatcher: allocator          └─ AllocatingMatcher: rejected
//!            synthesizes the slot                      (never queues requests)
//!
//! Shutdown:
//!     kill_requests(ServerShutdown) → every queued slot fails
//!     zombify_pending()             → every pending call is discarded
//! ```
//!
//! # Design Decisions
//! - One trait, shared as `Arc<dyn RequestMatcher>` by the server and routed calls
//! - Calls hold only a weak back-pointer to their matcher
//! - Zombie teardown is deferred until every matcher lock is released

pub mod allocating;
pub mod backlog;
pub mod queueing;
pub mod request_queue;

use std::sync::Arc;

use crate::call::{IncomingCall, RequestSlot};
use crate::error::CallError;

pub use allocating::{Allocation, AllocatingMatcher, BatchAllocator, RegisteredAllocator};
pub use backlog::{BacklogProtector, PendingPolicy};
pub use queueing::QueueingMatcher;
pub use request_queue::RequestQueue;

/// Pairs incoming calls with application requests for one method bucket.
pub trait RequestMatcher: Send + Sync + std::fmt::Debug {
    /// Name used in logs and metric labels.
    fn name(&self) -> &str;

    /// Fail every queued request with `error`.
    fn kill_requests(&self, error: CallError);

    /// Discard every call waiting for a request.
    fn zombify_pending(&self);

    /// Number of request queues; 0 for matchers that never queue requests.
    fn request_queue_count(&self) -> usize;

    /// Queue `slot` on `cq_index`, publishing to a pending call if one waits.
    fn request_call_with_possible_publish(&self, cq_index: usize, slot: RequestSlot);

    /// Match `call` with a request, scanning queues from `start_cq`,
    /// or park it until one arrives.
    fn match_or_queue(&self, start_cq: usize, call: Arc<IncomingCall>);

    /// Calls currently waiting for a request.
    fn pending_len(&self) -> usize {
        0
    }
}
