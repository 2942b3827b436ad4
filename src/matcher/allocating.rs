//! Matcher that synthesizes a request for every call from an allocator callback.
//!
//! # Responsibilities
//! - Ask the allocator for a tag and output cells as each call arrives
//! - Validate the synthesized request like an application request
//! - Hold a shutdown ref while the call is being published
//!
//! # Design Decisions
//! - No queues and no pending list: every call is matched or failed on arrival
//! - After shutdown is called the allocator is never invoked
//! - A request that fails validation fails the call; it does not abort the server

use std::sync::Arc;

use crate::call::{BatchOutputs, CallState, IncomingCall, RegisteredOutputs, RequestSlot};
use crate::completion_queue::{QueueHandle, Tag};
use crate::error::CallError;
use crate::matcher::RequestMatcher;
use crate::observability::metrics::{self, PublishPath};
use crate::routing::{MethodSpec, PayloadHandling};
use crate::server::ServerCore;

/// A request produced by an allocator.
#[derive(Debug, Clone)]
pub struct Allocation<O> {
    pub tag: Tag,
    pub outputs: O,
}

pub type BatchAllocator = Arc<dyn Fn() -> Allocation<BatchOutputs> + Send + Sync>;
pub type RegisteredAllocator = Arc<dyn Fn() -> Allocation<RegisteredOutputs> + Send + Sync>;

enum Source {
    Batch(BatchAllocator),
    Registered {
        spec: MethodSpec,
        allocate: RegisteredAllocator,
    },
}

pub struct AllocatingMatcher {
    name: String,
    core: Arc<ServerCore>,
    cq: QueueHandle,
    source: Source,
}

impl AllocatingMatcher {
    /// Serve unregistered calls from `allocate`, completing on `cq`.
    pub fn batch(core: Arc<ServerCore>, cq: QueueHandle, allocate: BatchAllocator) -> Self {
        Self {
            name: "unregistered".to_string(),
            core,
            cq,
            source: Source::Batch(allocate),
        }
    }

    /// Serve calls for `spec` from `allocate`, completing on `cq`.
    pub fn registered(
        core: Arc<ServerCore>,
        cq: QueueHandle,
        spec: MethodSpec,
        allocate: RegisteredAllocator,
    ) -> Self {
        Self {
            name: spec.name.clone(),
            core,
            cq,
            source: Source::Registered { spec, allocate },
        }
    }

    /// Invoke the allocator and turn its result into a validated slot.
    fn allocate_slot(&self) -> Result<RequestSlot, CallError> {
        match &self.source {
            Source::Batch(allocate) => {
                let Allocation { tag, outputs } = allocate();
                self.core.validate_request_and_cq(&self.cq, tag, false)?;
                Ok(RequestSlot::batch(tag, self.cq.clone(), self.cq.clone(), outputs))
            }
            Source::Registered { spec, allocate } => {
                let Allocation { tag, outputs } = allocate();
                let wants_payload = spec.payload == PayloadHandling::ReadInitialMessage;
                let mismatch = outputs.payload.is_some() != wants_payload;
                self.core.validate_request_and_cq(&self.cq, tag, mismatch)?;
                Ok(RequestSlot::registered(tag, self.cq.clone(), self.cq.clone(), outputs))
            }
        }
    }
}

impl RequestMatcher for AllocatingMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn kill_requests(&self, _error: CallError) {}

    fn zombify_pending(&self) {}

    fn request_queue_count(&self) -> usize {
        0
    }

    fn request_call_with_possible_publish(&self, _cq_index: usize, slot: RequestSlot) {
        metrics::record_request_failed("not_queueing");
        slot.fail(CallError::MethodNotQueueing(self.name.clone()));
    }

    fn match_or_queue(&self, _start_cq: usize, call: Arc<IncomingCall>) {
        let guard = self.core.shutdown_request_guard();
        if guard.shutdown_called() {
            tracing::debug!(call_id = %call.id(), matcher = %self.name, "Call arrived after shutdown");
            metrics::record_zombied("shutdown");
            call.fail_call_creation();
            return;
        }

        let slot = match self.allocate_slot() {
            Ok(slot) => slot,
            Err(e) => {
                tracing::warn!(call_id = %call.id(), matcher = %self.name, error = %e, "Allocated request rejected");
                metrics::record_request_failed("invalid_allocation");
                metrics::record_zombied("invalid_allocation");
                call.fail_call_creation();
                return;
            }
        };

        if call.transition(CallState::NotStarted, CallState::Activated) {
            tracing::trace!(call_id = %call.id(), matcher = %self.name, "Call matched with allocated request");
            call.publish(slot);
            metrics::record_published(PublishPath::Allocated);
        } else {
            call.kill_zombie();
            slot.fail(CallError::Transport("call abandoned before publication".to_string()));
        }
        drop(guard);
    }
}

impl std::fmt::Debug for AllocatingMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocatingMatcher")
            .field("name", &self.name)
            .field("cq", &self.cq)
            .finish()
    }
}
