//! Transport-facing channel: turns accepted streams into routed calls.
//!
//! # Responsibilities
//! - Create an `IncomingCall` per accepted stream and read its initial metadata
//! - Route the call through the channel's table to a matcher
//! - Read the first message for methods that need it before matching
//! - Keep the server's open-channel count honest
//! - Let the server disconnect the channel on shutdown or cancel its calls
//!
//! # Data Flow
//! ```text
//! accept_stream(stream)
//!     → recv_initial_metadata ─ error / no :path ─→ fail_call_creation
//!     → route (host, path, idempotent) → matcher
//!     → shutdown? → Zombied
//!     → [ReadInitialMessage] recv_message
//!     → publish_new_rpc → matcher.match_or_queue(cq_index, call)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::call::{CallState, IncomingCall};
use crate::error::CallError;
use crate::matcher::RequestMatcher;
use crate::observability::metrics;
use crate::routing::{PayloadHandling, RoutingTable};
use crate::server::ServerInner;
use crate::transport::{InitialMetadata, Payload, ServerStream};

const MIN_PRUNE_AT: usize = 64;

/// Connection state shared by a channel and the server's channel registry.
#[derive(Debug)]
pub(crate) struct ChannelLink {
    connected: AtomicBool,
    calls: Mutex<TrackedCalls>,
}

#[derive(Debug)]
struct TrackedCalls {
    calls: Vec<Weak<IncomingCall>>,
    prune_at: usize,
}

impl ChannelLink {
    pub(crate) fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            calls: Mutex::new(TrackedCalls {
                calls: Vec::new(),
                prune_at: MIN_PRUNE_AT,
            }),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Mark the link disconnected. True only for the caller that flipped it.
    pub(crate) fn disconnect(&self) -> bool {
        self.connected.swap(false, Ordering::AcqRel)
    }

    fn track(&self, call: &Arc<IncomingCall>) {
        let mut tracked = self.calls.lock();
        if tracked.calls.len() >= tracked.prune_at {
            tracked
                .calls
                .retain(|c| c.upgrade().is_some_and(|c| !c.state().is_terminal()));
            tracked.prune_at = (tracked.calls.len() * 2).max(MIN_PRUNE_AT);
        }
        tracked.calls.push(Arc::downgrade(call));
    }

    /// Zombify every call on this link that has not reached the application.
    pub(crate) fn cancel_calls(&self) -> usize {
        let calls = std::mem::take(&mut self.calls.lock().calls);
        let mut cancelled = 0;
        for call in calls.iter().filter_map(Weak::upgrade) {
            if call.state().is_terminal() {
                continue;
            }
            zombify(&call, "cancelled");
            if call.state() == CallState::Zombied {
                call.set_zombie_reason(CallError::Cancelled);
                // A parked call stays in its pending list; teardown is idempotent.
                call.kill_zombie();
                cancelled += 1;
            }
        }
        cancelled
    }
}

#[derive(Debug)]
struct ChannelShared {
    server: Arc<ServerInner>,
    table: RoutingTable,
    cq_index: usize,
    link: Arc<ChannelLink>,
}

impl ChannelShared {
    fn route(&self, call: &IncomingCall) -> (Arc<dyn RequestMatcher>, PayloadHandling) {
        let handle = self
            .table
            .lookup(&call.host(), &call.path(), call.is_idempotent());
        match handle.and_then(|h| self.server.methods.get(h.index())) {
            Some(method) => (Arc::clone(&method.matcher), method.spec.payload),
            None => (Arc::clone(&self.server.unregistered), PayloadHandling::None),
        }
    }
}

/// One transport connection's view of the server.
///
/// Server shutdown disconnects the channel: it stops accepting streams and
/// no longer holds off shutdown publication.
#[derive(Debug)]
pub struct Channel {
    shared: Arc<ChannelShared>,
}

impl Channel {
    pub(crate) fn new(server: Arc<ServerInner>, table: RoutingTable, cq_index: usize, connected: bool) -> Self {
        Self {
            shared: Arc::new(ChannelShared {
                server,
                table,
                cq_index,
                link: Arc::new(ChannelLink::new(connected)),
            }),
        }
    }

    pub(crate) fn link(&self) -> &Arc<ChannelLink> {
        &self.shared.link
    }

    /// Queue index this channel's calls start scanning from.
    pub fn cq_index(&self) -> usize {
        self.shared.cq_index
    }

    pub fn is_connected(&self) -> bool {
        self.shared.link.is_connected()
    }

    /// Take ownership of a new stream and start receiving its metadata.
    ///
    /// A disconnected channel abandons the stream immediately.
    pub fn accept_stream(&self, stream: Arc<dyn ServerStream>) -> Result<Arc<IncomingCall>, CallError> {
        if !self.is_connected() {
            stream.abandon();
            return Err(CallError::ServerShutdown);
        }
        let call = Arc::new(IncomingCall::new(Arc::clone(&stream)));
        self.shared.link.track(&call);
        tracing::trace!(call_id = %call.id(), "Stream accepted");

        let shared = Arc::clone(&self.shared);
        let pending = Arc::clone(&call);
        stream.recv_initial_metadata(Box::new(move |result| {
            on_initial_metadata(shared, pending, result);
        }));
        Ok(call)
    }

    /// Stop accepting streams and release this channel's hold on shutdown.
    pub fn disconnect(&self) {
        if self.shared.server.core.close_channel(&self.shared.link) {
            tracing::debug!(cq_index = self.shared.cq_index, "Channel disconnected");
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn zombify(call: &IncomingCall, reason: &'static str) {
    if call.state() == CallState::NotStarted {
        metrics::record_zombied(reason);
    }
    call.fail_call_creation();
}

fn on_initial_metadata(
    shared: Arc<ChannelShared>,
    call: Arc<IncomingCall>,
    result: Result<InitialMetadata, CallError>,
) {
    let routed = result.and_then(|md| call.set_routing(md));
    if let Err(e) = routed {
        tracing::debug!(call_id = %call.id(), error = %e, "Call creation failed");
        zombify(&call, "metadata_error");
        return;
    }

    let (matcher, payload) = shared.route(&call);
    if shared.server.core.shutdown_called() {
        zombify(&call, "shutdown");
        return;
    }
    call.set_matcher(Arc::downgrade(&matcher));

    match payload {
        PayloadHandling::None => publish_new_rpc(&shared, call, Ok(None)),
        PayloadHandling::ReadInitialMessage => {
            let stream = Arc::clone(call.stream());
            stream.recv_message(Box::new(move |result| {
                publish_new_rpc(&shared, call, result);
            }));
        }
    }
}

fn publish_new_rpc(shared: &ChannelShared, call: Arc<IncomingCall>, result: Result<Option<Payload>, CallError>) {
    let payload = match result {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!(call_id = %call.id(), error = %e, "Initial message read failed");
            zombify(&call, "message_error");
            return;
        }
    };
    if shared.server.core.shutdown_called() {
        zombify(&call, "shutdown");
        return;
    }
    let Some(matcher) = call.matcher() else {
        zombify(&call, "shutdown");
        return;
    };
    call.set_payload(payload);
    matcher.match_or_queue(shared.cq_index, call);
}
