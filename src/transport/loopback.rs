//! Loopback stream that completes every receive immediately.
//!
//! Used by the driver binary to feed synthetic calls through the engine.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::completion_queue::QueueHandle;
use crate::transport::{InitialMetadata, MessageCallback, MetadataCallback, Payload, ServerStream};

#[derive(Debug)]
pub struct LoopbackStream {
    metadata: InitialMetadata,
    message: Option<Payload>,
    bound: Mutex<Option<QueueHandle>>,
    abandoned: AtomicBool,
}

impl LoopbackStream {
    pub fn new(metadata: InitialMetadata) -> Self {
        Self {
            metadata,
            message: None,
            bound: Mutex::new(None),
            abandoned: AtomicBool::new(false),
        }
    }

    pub fn with_message(mut self, message: Payload) -> Self {
        self.message = Some(message);
        self
    }

    pub fn is_bound(&self) -> bool {
        self.bound.lock().is_some()
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }
}

impl ServerStream for LoopbackStream {
    fn recv_initial_metadata(&self, on_ready: MetadataCallback) {
        on_ready(Ok(self.metadata.clone()));
    }

    fn recv_message(&self, on_ready: MessageCallback) {
        on_ready(Ok(self.message.clone()));
    }

    fn bind_completion_queue(&self, cq: QueueHandle) {
        *self.bound.lock() = Some(cq);
    }

    fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
    }
}
