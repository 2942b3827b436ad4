//! Server: registered methods, application entry points and shutdown.
//!
//! # Data Flow
//! ```text
//! ServerBuilder (builder.rs)
//!     → register queues, methods, allocators
//!     → start(): one matcher per method + one for unregistered calls
//!
//! Application thread                     Transport
//!     request_call / request_registered_call     setup_transport → Channel (channel.rs)
//!     → validate queue and payload outputs       → accept_stream → routed call
//!     → matcher.request_call_with_possible_publish   → matcher.match_or_queue
//!
//! shutdown_and_notify(cq, tag)
//!     → commit once: fail queued requests, zombify pending calls
//!     → disconnect every registered channel, outside the global lock
//!     → core.maybe_finish_shutdown (core.rs) completes the tags
//!
//! cancel_all_calls()
//!     → disconnect every registered channel and zombify its unpublished calls
//! ```
//!
//! # Design Decisions
//! - All engine state hangs off an explicit server value; no globals
//! - Requests against a shut-down server still complete, with ServerShutdown

pub mod builder;
pub mod channel;
pub mod core;

use std::sync::Arc;

use crate::call::{BatchOutputs, RegisteredOutputs, RequestSlot};
use crate::completion_queue::{QueueHandle, Tag};
use crate::error::CallError;
use crate::matcher::RequestMatcher;
use crate::observability::metrics;
use crate::routing::{MethodHandle, PayloadHandling, RegisteredMethod, RoutingTable};

pub use self::builder::ServerBuilder;
pub use self::channel::Channel;
pub use self::core::{GlobalState, ServerCore, ShutdownRequestGuard};

#[derive(Debug)]
pub(crate) struct ServerInner {
    pub(crate) core: Arc<ServerCore>,
    pub(crate) methods: Vec<RegisteredMethod>,
    pub(crate) unregistered: Arc<dyn RequestMatcher>,
}

impl ServerInner {
    fn matchers(&self) -> impl Iterator<Item = &Arc<dyn RequestMatcher>> {
        std::iter::once(&self.unregistered).chain(self.methods.iter().map(|m| &m.matcher))
    }
}

/// A started server. Cheap to clone; clones share all state.
#[derive(Debug, Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub(crate) fn from_inner(inner: ServerInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn completion_queues(&self) -> &[QueueHandle] {
        self.inner.core.cqs()
    }

    pub fn method_count(&self) -> usize {
        self.inner.methods.len()
    }

    pub fn method(&self, handle: MethodHandle) -> Option<&RegisteredMethod> {
        self.inner.methods.get(handle.0)
    }

    /// Find the handle registered for `name` on `host` (None for host-less).
    pub fn find_method(&self, name: &str, host: Option<&str>) -> Option<MethodHandle> {
        self.inner
            .methods
            .iter()
            .position(|m| m.spec.name == name && m.spec.host.as_deref() == host)
            .map(MethodHandle)
    }

    /// Create a channel for a transport accepting on `accepting_cq`.
    ///
    /// Calls on the channel start their queue scan at the accepting queue,
    /// or at a random server queue if it is not one of them.
    pub fn setup_transport(&self, accepting_cq: Option<&QueueHandle>) -> Channel {
        let core = &self.inner.core;
        let cq_index = accepting_cq
            .and_then(|cq| core.cq_index_of(cq))
            .unwrap_or_else(|| fastrand::usize(..core.cq_count().max(1)));
        let specs: Vec<_> = self.inner.methods.iter().map(|m| m.spec.clone()).collect();
        let table = RoutingTable::new(&specs);

        let max_probes = table.max_probes();

        let mut global = core.lock_global();
        let connected = !core.shutdown_called();
        let channel = Channel::new(Arc::clone(&self.inner), table, cq_index, connected);
        if connected {
            core.channel_opened(&mut global, channel.link());
        }
        drop(global);

        tracing::debug!(cq_index, connected, max_probes, "Transport set up");
        channel
    }

    /// Request the next call to any unregistered method.
    ///
    /// On success the tag completes on `notify_cq` once a call is matched,
    /// or with an error if the server shuts down first.
    pub fn request_call(
        &self,
        tag: Tag,
        bound_cq: QueueHandle,
        notify_cq: QueueHandle,
        outputs: BatchOutputs,
    ) -> Result<(), CallError> {
        let matcher = &self.inner.unregistered;
        if matcher.request_queue_count() == 0 {
            return Err(self.reject("not_queueing", CallError::MethodNotQueueing(matcher.name().to_string())));
        }
        let cq_index = self
            .inner
            .core
            .validate_request_and_cq(&notify_cq, tag, false)
            .map_err(|e| self.reject("invalid_request", e))?;

        metrics::record_requested_call("batch");
        let slot = RequestSlot::batch(tag, bound_cq, notify_cq, outputs);
        self.queue_call_request(cq_index, slot, matcher);
        Ok(())
    }

    /// Request the next call to a registered method.
    ///
    /// `outputs.payload` must be present exactly when the method reads its
    /// initial message.
    pub fn request_registered_call(
        &self,
        method: MethodHandle,
        tag: Tag,
        bound_cq: QueueHandle,
        notify_cq: QueueHandle,
        outputs: RegisteredOutputs,
    ) -> Result<(), CallError> {
        let registered = self
            .inner
            .methods
            .get(method.0)
            .ok_or_else(|| self.reject("unknown_method", CallError::UnknownMethod(method.0)))?;
        if registered.matcher.request_queue_count() == 0 {
            return Err(self.reject(
                "not_queueing",
                CallError::MethodNotQueueing(registered.spec.name.clone()),
            ));
        }

        let wants_payload = registered.spec.payload == PayloadHandling::ReadInitialMessage;
        let mismatch = outputs.payload.is_some() != wants_payload;
        let cq_index = self
            .inner
            .core
            .validate_request_and_cq(&notify_cq, tag, mismatch)
            .map_err(|e| self.reject("invalid_request", e))?;

        metrics::record_requested_call("registered");
        let slot = RequestSlot::registered(tag, bound_cq, notify_cq, outputs);
        self.queue_call_request(cq_index, slot, &registered.matcher);
        Ok(())
    }

    fn reject(&self, reason: &'static str, error: CallError) -> CallError {
        tracing::warn!(error = %error, "Call request rejected");
        metrics::record_request_failed(reason);
        error
    }

    fn queue_call_request(&self, cq_index: usize, slot: RequestSlot, matcher: &Arc<dyn RequestMatcher>) {
        if self.inner.core.shutdown_called() {
            metrics::record_request_failed("shutdown");
            slot.fail(CallError::ServerShutdown);
            return;
        }
        matcher.request_call_with_possible_publish(cq_index, slot);
    }

    /// Shut the server down and complete `tag` on `cq` once it is fully drained.
    ///
    /// The first call commits shutdown. Every call's tag completes exactly
    /// once, immediately if shutdown was already published.
    pub fn shutdown_and_notify(&self, cq: &QueueHandle, tag: Tag) {
        let core = &self.inner.core;
        let channels = {
            let mut global = core.lock_global();
            if !cq.begin_op(tag) {
                tracing::warn!(%tag, "Shutdown tag refused by completion queue");
            } else if global.shutdown_published {
                cq.end_op(tag, Ok(()), Box::new(|| {}));
                return;
            } else {
                global.shutdown_tags.push((Arc::clone(cq), tag));
            }
            if core.shutdown_called() {
                return;
            }

            tracing::info!("Server shutdown committed");
            // The flag flips before requests are killed: a request pushed
            // later sees it in fail_if_shut_down.
            core.shutdown_refs().unref_on_shutdown_call();
            let channels = core.take_channels(&mut global);
            for matcher in self.inner.matchers() {
                matcher.kill_requests(CallError::ServerShutdown);
                matcher.zombify_pending();
            }
            core.maybe_finish_shutdown(&mut global);
            channels
        };
        core.flush_teardowns();

        let mut disconnected = 0;
        for link in &channels {
            if core.close_channel(link) {
                disconnected += 1;
            }
        }
        if disconnected > 0 {
            tracing::debug!(channels = disconnected, "Channels disconnected for shutdown");
        }
    }

    /// Disconnect every channel and zombify the calls accepted on them that
    /// have not reached the application. Does not shut the server down.
    pub fn cancel_all_calls(&self) {
        let core = &self.inner.core;
        let channels = core.take_channels(&mut core.lock_global());
        let mut cancelled = 0;
        for link in &channels {
            cancelled += link.cancel_calls();
            core.close_channel(link);
        }
        core.flush_teardowns();
        tracing::info!(channels = channels.len(), cancelled, "All calls cancelled");
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.core.shutdown_called()
    }

    pub fn is_shutdown_published(&self) -> bool {
        self.inner.core.lock_global().shutdown_published
    }

    pub fn has_open_channels(&self) -> bool {
        self.inner.core.lock_global().open_channels > 0
    }

    /// Calls waiting for a request across every matcher.
    pub fn pending_calls(&self) -> usize {
        self.inner.matchers().map(|m| m.pending_len()).sum()
    }
}
