//! Shared utilities for integration and stress testing.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use call_admission::completion_queue::{same_queue, Event, EventQueue, PollResult, QueueHandle};
use call_admission::error::CallError;
use call_admission::transport::{InitialMetadata, MessageCallback, MetadataCallback, Payload, ServerStream};

/// Stream whose receive operations complete only when the test says so.
#[derive(Default)]
pub struct ManualStream {
    metadata_cb: Mutex<Option<MetadataCallback>>,
    message_cb: Mutex<Option<MessageCallback>>,
    bound: Mutex<Option<QueueHandle>>,
    abandoned: AtomicBool,
}

impl ManualStream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Complete the pending metadata receive. Returns false if none was issued.
    pub fn deliver_metadata(&self, md: InitialMetadata) -> bool {
        let cb = self.metadata_cb.lock().take();
        match cb {
            Some(cb) => {
                cb(Ok(md));
                true
            }
            None => false,
        }
    }

    pub fn fail_metadata(&self, error: CallError) -> bool {
        let cb = self.metadata_cb.lock().take();
        match cb {
            Some(cb) => {
                cb(Err(error));
                true
            }
            None => false,
        }
    }

    /// Complete the pending message receive. Returns false if none was issued.
    pub fn deliver_message(&self, message: Option<Payload>) -> bool {
        let cb = self.message_cb.lock().take();
        match cb {
            Some(cb) => {
                cb(Ok(message));
                true
            }
            None => false,
        }
    }

    pub fn message_requested(&self) -> bool {
        self.message_cb.lock().is_some()
    }

    pub fn abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    pub fn bound_to(&self, cq: &QueueHandle) -> bool {
        self.bound.lock().as_ref().is_some_and(|b| same_queue(b, cq))
    }
}

impl std::fmt::Debug for ManualStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualStream")
            .field("abandoned", &self.abandoned())
            .finish()
    }
}

impl ServerStream for ManualStream {
    fn recv_initial_metadata(&self, on_ready: MetadataCallback) {
        *self.metadata_cb.lock() = Some(on_ready);
    }

    fn recv_message(&self, on_ready: MessageCallback) {
        *self.message_cb.lock() = Some(on_ready);
    }

    fn bind_completion_queue(&self, cq: QueueHandle) {
        *self.bound.lock() = Some(cq);
    }

    fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
    }
}

/// Create `n` event queues and their engine-facing handles.
pub fn queues(n: usize) -> (Vec<Arc<EventQueue>>, Vec<QueueHandle>) {
    let cqs: Vec<Arc<EventQueue>> = (0..n)
        .map(|i| Arc::new(EventQueue::new(format!("cq{i}"))))
        .collect();
    let handles = cqs.iter().map(|c| c.clone() as QueueHandle).collect();
    (cqs, handles)
}

pub fn expect_event(cq: &EventQueue) -> Event {
    match cq.next(Duration::from_secs(2)) {
        PollResult::Event(event) => event,
        other => panic!("expected an event on {}, got {:?}", cq.name(), other),
    }
}

pub fn expect_no_event(cq: &EventQueue) {
    match cq.next(Duration::from_millis(20)) {
        PollResult::Timeout => {}
        other => panic!("expected no event on {}, got {:?}", cq.name(), other),
    }
}
