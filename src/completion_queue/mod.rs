//! Completion queue interface consumed by the matching engine.
//!
//! # Data Flow
//! ```text
//! request_call / request_registered_call
//!     → begin_op(tag)          (queue will not finish shutdown while outstanding)
//!     → ... matched or failed ...
//!     → end_op(tag, result, done)
//!     → application polls the event
//!     → done() runs: the request slot is reclaimed here, never earlier
//! ```
//!
//! # Design Decisions
//! - The engine only needs begin/end-op; polling belongs to the queue
//! - Queue identity is pointer identity of the shared handle
//! - `EventQueue` is the in-process implementation used by the driver and tests

pub mod event_queue;

use std::sync::Arc;

use crate::error::CallError;

pub use event_queue::{Event, EventQueue, PollResult};

/// Opaque application token correlating a request with its completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(pub u64);

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tag-{}", self.0)
    }
}

/// Callback run once the application has consumed a completion event.
pub type DoneCallback = Box<dyn FnOnce() + Send>;

/// A completion queue as seen by the engine.
pub trait CompletionQueue: Send + Sync + std::fmt::Debug {
    /// Register an outstanding operation for `tag`.
    /// Returns false if the queue is already shutting down.
    fn begin_op(&self, tag: Tag) -> bool;

    /// Post the completion for a previously begun operation.
    fn end_op(&self, tag: Tag, result: Result<(), CallError>, done: DoneCallback);
}

/// Shared handle to a completion queue.
pub type QueueHandle = Arc<dyn CompletionQueue>;

/// True if both handles refer to the same queue.
pub fn same_queue(a: &QueueHandle, b: &QueueHandle) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
