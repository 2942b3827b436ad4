//! Matcher that queues application requests per completion queue.
//!
//! # Responsibilities
//! - Hold one lock-free request queue per completion queue
//! - Match arriving calls against queued requests, parking them when none exist
//! - Drain parked calls when a request lands on an empty queue
//!
//! # Data Flow
//! ```text
//! match_or_queue:
//!     lock-free scan (start+i) mod N ── hit ──→ Activated → publish
//!     lock pending → expire stale → scan again ── hit ──→ Activated → publish
//!     shutdown? backlog? → Zombied
//!     otherwise → Pending, appended to the list
//!
//! request_call_with_possible_publish:
//!     push slot ── queue was non-empty ──→ done
//!     └─ was empty → loop { lock; pop slot; pop pending; CAS Pending→Activated } → publish
//!     shutdown? → fail whatever is left on the queue
//! ```
//!
//! # Design Decisions
//! - The pending list lock is per matcher and never held while publishing
//! - Requests are unbounded; backpressure applies to pending calls only

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::call::{CallState, IncomingCall, RequestSlot};
use crate::error::CallError;
use crate::matcher::{RequestMatcher, RequestQueue};
use crate::observability::metrics::{self, PublishPath};
use crate::server::ServerCore;

#[derive(Debug)]
struct PendingCall {
    call: Arc<IncomingCall>,
    since: Instant,
}

#[derive(Debug)]
pub struct QueueingMatcher {
    name: String,
    core: Arc<ServerCore>,
    queues: Vec<RequestQueue>,
    pending: Mutex<VecDeque<PendingCall>>,
}

impl QueueingMatcher {
    pub fn new(name: impl Into<String>, core: Arc<ServerCore>) -> Self {
        let queues = (0..core.cq_count()).map(|_| RequestQueue::new()).collect();
        Self {
            name: name.into(),
            core,
            queues,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Requests queued on `cq_index`.
    pub fn queued_requests(&self, cq_index: usize) -> usize {
        self.queues.get(cq_index).map_or(0, RequestQueue::len)
    }

    /// Zombify pending calls older than the configured limit.
    /// The list is ordered by arrival, so only the front is examined.
    fn expire_stale(&self, pending: &mut VecDeque<PendingCall>) {
        let max_age = self.core.pending_policy().max_unrequested_time;
        while let Some(front) = pending.front() {
            if front.since.elapsed() < max_age {
                break;
            }
            let Some(expired) = pending.pop_front() else {
                break;
            };
            if expired.call.transition(CallState::Pending, CallState::Zombied) {
                let error = CallError::PendingTimeout;
                tracing::debug!(
                    call_id = %expired.call.id(),
                    matcher = %self.name,
                    error = %error,
                    "Pending call expired before any request arrived"
                );
                expired.call.set_zombie_reason(error);
                metrics::record_zombied("pending_timeout");
            }
            self.core.schedule_teardown(expired.call);
        }
    }

    /// Zombify a call that never entered the pending list.
    fn reject(&self, call: Arc<IncomingCall>, reason: &'static str, error: CallError) {
        if call.transition(CallState::NotStarted, CallState::Zombied) {
            call.set_zombie_reason(error);
            metrics::record_zombied(reason);
        }
        call.kill_zombie();
    }

    fn activate(&self, call: Arc<IncomingCall>, slot: RequestSlot, cq_index: usize, path: PublishPath) {
        if call.transition(CallState::NotStarted, CallState::Activated) {
            tracing::trace!(call_id = %call.id(), cq_index, matcher = %self.name, "Call matched");
            call.publish(slot);
            metrics::record_published(path);
        } else {
            call.kill_zombie();
            self.request_call_with_possible_publish(cq_index, slot);
        }
    }

    /// Pair parked calls with slots from `cq_index` until one side runs dry.
    fn drain_pending(&self, cq_index: usize) {
        let queue = &self.queues[cq_index];
        loop {
            let matched = {
                let mut pending = self.pending.lock();
                self.expire_stale(&mut pending);
                self.discard_zombied_front(&mut pending);
                if pending.is_empty() {
                    break;
                }
                let Some(slot) = queue.pop() else {
                    break;
                };
                let Some(parked) = pending.pop_front() else {
                    queue.push(slot);
                    break;
                };
                metrics::record_pending_calls(&self.name, pending.len());
                if !parked.call.transition(CallState::Pending, CallState::Activated) {
                    // Zombied after the front was checked. The slot goes back
                    // to the tail, behind any request pushed meanwhile.
                    self.core.schedule_teardown(parked.call);
                    queue.push(slot);
                    continue;
                }
                (parked.call, slot)
            };
            self.core.flush_teardowns();

            let (call, slot) = matched;
            tracing::trace!(call_id = %call.id(), cq_index, matcher = %self.name, "Pending call matched");
            call.publish(slot);
            metrics::record_published(PublishPath::Drain);
        }
        self.core.flush_teardowns();
    }

    /// Drop zombied calls from the front of the list before a slot is taken.
    fn discard_zombied_front(&self, pending: &mut VecDeque<PendingCall>) {
        while pending
            .front()
            .is_some_and(|front| front.call.state() == CallState::Zombied)
        {
            if let Some(parked) = pending.pop_front() {
                self.core.schedule_teardown(parked.call);
            }
        }
    }

    /// Fail whatever a shutdown left on `cq_index`.
    fn fail_if_shut_down(&self, cq_index: usize) {
        if !self.core.shutdown_called() {
            return;
        }
        while let Some(slot) = self.queues[cq_index].pop() {
            metrics::record_request_failed("shutdown");
            slot.fail(CallError::ServerShutdown);
        }
    }
}

impl RequestMatcher for QueueingMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn kill_requests(&self, error: CallError) {
        for queue in &self.queues {
            while let Some(slot) = queue.pop() {
                metrics::record_request_failed("shutdown");
                slot.fail(error.clone());
            }
        }
    }

    fn zombify_pending(&self) {
        let mut pending = self.pending.lock();
        let count = pending.len();
        for parked in pending.drain(..) {
            if parked.call.transition(CallState::Pending, CallState::Zombied) {
                parked.call.set_zombie_reason(CallError::ServerShutdown);
                metrics::record_zombied("shutdown");
            }
            self.core.schedule_teardown(parked.call);
        }
        metrics::record_pending_calls(&self.name, 0);
        if count > 0 {
            tracing::debug!(matcher = %self.name, count, "Pending calls zombified");
        }
    }

    fn request_queue_count(&self) -> usize {
        self.queues.len()
    }

    fn request_call_with_possible_publish(&self, cq_index: usize, slot: RequestSlot) {
        let Some(queue) = self.queues.get(cq_index) else {
            metrics::record_request_failed("unregistered_cq");
            slot.fail(CallError::CompletionQueueNotRegistered);
            return;
        };
        if queue.push(slot) {
            self.drain_pending(cq_index);
        }
        self.fail_if_shut_down(cq_index);
    }

    fn match_or_queue(&self, start_cq: usize, call: Arc<IncomingCall>) {
        let n = self.queues.len();
        if n == 0 {
            self.reject(call, "no_queues", CallError::CompletionQueueNotRegistered);
            return;
        }

        for i in 0..n {
            let cq_index = (start_cq + i) % n;
            if let Some(slot) = self.queues[cq_index].try_pop() {
                metrics::record_cqs_checked(i + 1);
                self.activate(call, slot, cq_index, PublishPath::Fast);
                return;
            }
        }

        let mut pending = self.pending.lock();
        self.expire_stale(&mut pending);

        // This second scan under the lock is required. A slot pushed after
        // the lock-free scan only drains pending calls it finds under this
        // lock, so either the slot is popped here or the drain sees the call.
        for i in 0..n {
            let cq_index = (start_cq + i) % n;
            if let Some(slot) = self.queues[cq_index].pop() {
                drop(pending);
                self.core.flush_teardowns();
                self.activate(call, slot, cq_index, PublishPath::Slow);
                return;
            }
        }

        if self.core.shutdown_called() {
            drop(pending);
            self.core.flush_teardowns();
            tracing::debug!(call_id = %call.id(), matcher = %self.name, "Call arrived after shutdown");
            self.reject(call, "shutdown", CallError::ServerShutdown);
            return;
        }

        if self.core.pending_policy().backlog.should_reject(pending.len()) {
            let len = pending.len();
            drop(pending);
            self.core.flush_teardowns();
            let error = CallError::ResourceExhausted;
            tracing::warn!(
                call_id = %call.id(),
                matcher = %self.name,
                pending = len,
                error = %error,
                "Pending backlog full, rejecting call"
            );
            self.reject(call, "backlog", error);
            return;
        }

        if call.transition(CallState::NotStarted, CallState::Pending) {
            tracing::debug!(call_id = %call.id(), matcher = %self.name, "No request available, call queued");
            pending.push_back(PendingCall {
                call,
                since: Instant::now(),
            });
            metrics::record_slowpath_queued();
            metrics::record_pending_calls(&self.name, pending.len());
            drop(pending);
        } else {
            drop(pending);
            call.kill_zombie();
        }
        self.core.flush_teardowns();
    }

    fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}
