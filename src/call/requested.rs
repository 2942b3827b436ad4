//! Application requests for the next incoming call.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::completion_queue::{QueueHandle, Tag};
use crate::error::CallError;
use crate::transport::{Metadata, Payload, ServerCall};

/// A shared write-once-per-match output location.
///
/// The application keeps one clone and reads it after the tag completes;
/// the engine writes through the clone carried by the request slot.
#[derive(Debug)]
pub struct OutputCell<T>(Arc<Mutex<Option<T>>>);

impl<T> OutputCell<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    pub fn set(&self, value: T) {
        *self.0.lock() = Some(value);
    }

    pub fn take(&self) -> Option<T> {
        self.0.lock().take()
    }

    pub fn clear(&self) {
        *self.0.lock() = None;
    }

    pub fn is_set(&self) -> bool {
        self.0.lock().is_some()
    }
}

impl<T: Clone> OutputCell<T> {
    pub fn get(&self) -> Option<T> {
        self.0.lock().clone()
    }
}

impl<T> Clone for OutputCell<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Default for OutputCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Routing details reported for calls requested through `request_call`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDetails {
    pub method: String,
    pub host: String,
    pub deadline: Option<Instant>,
}

/// Outputs of a request for any unregistered method.
#[derive(Debug, Clone, Default)]
pub struct BatchOutputs {
    pub call: OutputCell<ServerCall>,
    pub details: OutputCell<CallDetails>,
    pub initial_metadata: OutputCell<Metadata>,
}

impl BatchOutputs {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Outputs of a request for a specific registered method.
#[derive(Debug, Clone, Default)]
pub struct RegisteredOutputs {
    pub call: OutputCell<ServerCall>,
    pub deadline: OutputCell<Option<Instant>>,
    pub initial_metadata: OutputCell<Metadata>,
    /// Present only for methods that read the initial message.
    pub payload: Option<OutputCell<Payload>>,
}

impl RegisteredOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload() -> Self {
        Self {
            payload: Some(OutputCell::new()),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub enum SlotKind {
    Batch { details: OutputCell<CallDetails> },
    Registered {
        deadline: OutputCell<Option<Instant>>,
        payload: Option<OutputCell<Payload>>,
    },
}

/// One outstanding application request for an incoming call.
///
/// Not `Clone`: a slot is owned by exactly one queue until it is matched
/// or failed, and then by the completion's done callback.
#[derive(Debug)]
pub struct RequestSlot {
    tag: Tag,
    notify_cq: QueueHandle,
    bound_cq: QueueHandle,
    call: OutputCell<ServerCall>,
    initial_metadata: OutputCell<Metadata>,
    kind: SlotKind,
}

impl RequestSlot {
    pub fn batch(tag: Tag, bound_cq: QueueHandle, notify_cq: QueueHandle, outputs: BatchOutputs) -> Self {
        Self {
            tag,
            notify_cq,
            bound_cq,
            call: outputs.call,
            initial_metadata: outputs.initial_metadata,
            kind: SlotKind::Batch { details: outputs.details },
        }
    }

    pub fn registered(
        tag: Tag,
        bound_cq: QueueHandle,
        notify_cq: QueueHandle,
        outputs: RegisteredOutputs,
    ) -> Self {
        Self {
            tag,
            notify_cq,
            bound_cq,
            call: outputs.call,
            initial_metadata: outputs.initial_metadata,
            kind: SlotKind::Registered {
                deadline: outputs.deadline,
                payload: outputs.payload,
            },
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn kind(&self) -> &SlotKind {
        &self.kind
    }

    pub(crate) fn bound_cq(&self) -> &QueueHandle {
        &self.bound_cq
    }

    pub(crate) fn call_output(&self) -> &OutputCell<ServerCall> {
        &self.call
    }

    pub(crate) fn metadata_output(&self) -> &OutputCell<Metadata> {
        &self.initial_metadata
    }

    /// Deliver the tag as a successful completion; the slot is dropped when
    /// the application consumes the event.
    pub(crate) fn complete(self) {
        let notify = Arc::clone(&self.notify_cq);
        let tag = self.tag;
        notify.end_op(tag, Ok(()), Box::new(move || drop(self)));
    }

    /// Complete the request with `error` and a null call handle.
    pub(crate) fn fail(self, error: CallError) {
        self.call.clear();
        self.initial_metadata.set(Metadata::new());
        tracing::trace!(tag = %self.tag, error = %error, "Request slot failed");
        let notify = Arc::clone(&self.notify_cq);
        let tag = self.tag;
        notify.end_op(tag, Err(error), Box::new(move || drop(self)));
    }
}
