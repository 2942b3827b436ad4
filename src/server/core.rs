//! State shared by the server, its channels and its matchers.
//!
//! # Responsibilities
//! - Own the registered completion queues and validate requests against them
//! - Track shutdown refs, shutdown tags and open channels
//! - Keep a registry of connected channels so shutdown can disconnect them
//! - Defer zombie teardown until no engine lock is held
//!
//! # Design Decisions
//! - Holds no matchers, so matchers can hold it without a reference cycle
//! - Lock order is global state before any matcher's pending list

use std::sync::{Arc, Weak};

use crossbeam_queue::SegQueue;
use parking_lot::{Mutex, MutexGuard};

use crate::call::IncomingCall;
use crate::completion_queue::{same_queue, QueueHandle, Tag};
use crate::error::CallError;
use crate::lifecycle::ShutdownRefs;
use crate::matcher::PendingPolicy;
use crate::server::channel::ChannelLink;

/// Fields guarded by the server-wide lock.
#[derive(Debug, Default)]
pub struct GlobalState {
    pub shutdown_published: bool,
    pub shutdown_tags: Vec<(QueueHandle, Tag)>,
    pub open_channels: usize,
    pub(crate) channels: Vec<Weak<ChannelLink>>,
}

#[derive(Debug)]
pub struct ServerCore {
    cqs: Vec<QueueHandle>,
    pending_policy: PendingPolicy,
    shutdown_refs: ShutdownRefs,
    global: Mutex<GlobalState>,
    teardowns: SegQueue<Arc<IncomingCall>>,
}

impl ServerCore {
    pub fn new(cqs: Vec<QueueHandle>, pending_policy: PendingPolicy) -> Self {
        Self {
            cqs,
            pending_policy,
            shutdown_refs: ShutdownRefs::new(),
            global: Mutex::new(GlobalState::default()),
            teardowns: SegQueue::new(),
        }
    }

    pub fn cqs(&self) -> &[QueueHandle] {
        &self.cqs
    }

    pub fn cq_count(&self) -> usize {
        self.cqs.len()
    }

    pub fn cq_index_of(&self, cq: &QueueHandle) -> Option<usize> {
        self.cqs.iter().position(|c| same_queue(c, cq))
    }

    pub fn pending_policy(&self) -> &PendingPolicy {
        &self.pending_policy
    }

    pub fn shutdown_refs(&self) -> &ShutdownRefs {
        &self.shutdown_refs
    }

    pub fn shutdown_called(&self) -> bool {
        self.shutdown_refs.shutdown_called()
    }

    pub fn lock_global(&self) -> MutexGuard<'_, GlobalState> {
        self.global.lock()
    }

    /// Check a request's notification queue and register the pending
    /// operation on it. Returns the queue's index.
    ///
    /// Nothing is registered on failure.
    pub fn validate_request_and_cq(
        &self,
        notify_cq: &QueueHandle,
        tag: Tag,
        payload_mismatch: bool,
    ) -> Result<usize, CallError> {
        let index = self
            .cq_index_of(notify_cq)
            .ok_or(CallError::CompletionQueueNotRegistered)?;
        if payload_mismatch {
            return Err(CallError::PayloadTypeMismatch);
        }
        if !notify_cq.begin_op(tag) {
            return Err(CallError::CompletionQueueShutdown);
        }
        Ok(index)
    }

    /// Queue a zombied call for teardown by the next `flush_teardowns`.
    pub fn schedule_teardown(&self, call: Arc<IncomingCall>) {
        self.teardowns.push(call);
    }

    /// Tear down scheduled zombies. Callers must not hold any engine lock.
    pub fn flush_teardowns(&self) {
        while let Some(call) = self.teardowns.pop() {
            call.kill_zombie();
        }
    }

    /// Complete the shutdown tags once every ref and channel is gone.
    pub fn maybe_finish_shutdown(&self, global: &mut GlobalState) {
        if global.shutdown_published || !self.shutdown_refs.shutdown_ready() {
            return;
        }
        if global.open_channels > 0 {
            tracing::debug!(
                open_channels = global.open_channels,
                "Waiting for channels before publishing shutdown"
            );
            return;
        }
        global.shutdown_published = true;
        tracing::info!(tags = global.shutdown_tags.len(), "Server shutdown published");
        for (cq, tag) in global.shutdown_tags.drain(..) {
            cq.end_op(tag, Ok(()), Box::new(|| {}));
        }
    }

    pub(crate) fn channel_opened(&self, global: &mut GlobalState, link: &Arc<ChannelLink>) {
        global.open_channels += 1;
        global.channels.push(Arc::downgrade(link));
    }

    /// Remove every live channel from the registry for disconnection.
    ///
    /// Disconnect them with `close_channel` once the global lock is released.
    pub(crate) fn take_channels(&self, global: &mut GlobalState) -> Vec<Arc<ChannelLink>> {
        global.channels.drain(..).filter_map(|w| w.upgrade()).collect()
    }

    /// Disconnect `link` and release its hold on shutdown publication.
    ///
    /// Returns false if the link was already disconnected.
    pub(crate) fn close_channel(&self, link: &ChannelLink) -> bool {
        if !link.disconnect() {
            return false;
        }
        let mut global = self.lock_global();
        global.open_channels = global.open_channels.saturating_sub(1);
        global
            .channels
            .retain(|w| w.upgrade().is_some_and(|l| l.is_connected()));
        self.maybe_finish_shutdown(&mut global);
        true
    }

    /// Take a shutdown-blocking ref for an allocator-served call.
    pub fn shutdown_request_guard(&self) -> ShutdownRequestGuard<'_> {
        let active = self.shutdown_refs.ref_on_request();
        ShutdownRequestGuard {
            core: self,
            shutdown_called: !active,
        }
    }
}

/// RAII ref that holds off shutdown publication while a request is in flight.
pub struct ShutdownRequestGuard<'a> {
    core: &'a ServerCore,
    shutdown_called: bool,
}

impl ShutdownRequestGuard<'_> {
    /// Whether shutdown had already been called when the ref was taken.
    pub fn shutdown_called(&self) -> bool {
        self.shutdown_called
    }
}

impl Drop for ShutdownRequestGuard<'_> {
    fn drop(&mut self) {
        if self.core.shutdown_refs.unref_on_request() {
            let mut global = self.core.lock_global();
            self.core.maybe_finish_shutdown(&mut global);
        }
    }
}
