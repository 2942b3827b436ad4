//! Server-side record of a call accepted from a transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::call::requested::{CallDetails, RequestSlot, SlotKind};
use crate::call::state::{AtomicCallState, CallState};
use crate::call::CallId;
use crate::error::CallError;
use crate::matcher::RequestMatcher;
use crate::transport::{InitialMetadata, Metadata, Payload, ServerCall, ServerStream};

#[derive(Debug, Default)]
struct Received {
    host: String,
    path: String,
    deadline: Option<Instant>,
    idempotent: bool,
    metadata: Metadata,
    payload: Option<Payload>,
}

/// A call waiting to be handed to the application.
///
/// Shared between the transport callbacks and at most one matcher's pending
/// list. The state field decides which side gets to finish it.
pub struct IncomingCall {
    id: CallId,
    state: AtomicCallState,
    stream: Arc<dyn ServerStream>,
    matcher: OnceLock<Weak<dyn RequestMatcher>>,
    received: Mutex<Received>,
    zombie_reason: OnceLock<CallError>,
    torn_down: AtomicBool,
}

impl IncomingCall {
    pub fn new(stream: Arc<dyn ServerStream>) -> Self {
        Self {
            id: CallId::new(),
            state: AtomicCallState::new(),
            stream,
            matcher: OnceLock::new(),
            received: Mutex::new(Received::default()),
            zombie_reason: OnceLock::new(),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn state(&self) -> CallState {
        self.state.load()
    }

    pub fn transition(&self, from: CallState, to: CallState) -> bool {
        self.state.transition(from, to)
    }

    pub fn stream(&self) -> &Arc<dyn ServerStream> {
        &self.stream
    }

    /// Record routing keys and application metadata from the first batch.
    pub fn set_routing(&self, md: InitialMetadata) -> Result<(), CallError> {
        let (Some(path), Some(host)) = (md.path, md.authority) else {
            return Err(CallError::MissingRoutingMetadata);
        };
        let mut received = self.received.lock();
        received.path = path;
        received.host = host;
        received.deadline = md.deadline;
        received.idempotent = md.idempotent;
        received.metadata = md.entries;
        Ok(())
    }

    pub fn path(&self) -> String {
        self.received.lock().path.clone()
    }

    pub fn host(&self) -> String {
        self.received.lock().host.clone()
    }

    pub fn is_idempotent(&self) -> bool {
        self.received.lock().idempotent
    }

    pub fn set_payload(&self, payload: Option<Payload>) {
        self.received.lock().payload = payload;
    }

    /// Remember which matcher the call was routed to. Only the first set wins.
    pub fn set_matcher(&self, matcher: Weak<dyn RequestMatcher>) {
        let _ = self.matcher.set(matcher);
    }

    pub fn matcher(&self) -> Option<Arc<dyn RequestMatcher>> {
        self.matcher.get().and_then(Weak::upgrade)
    }

    /// Hand the call to the application through `slot`.
    ///
    /// The caller must already have moved the state to Activated.
    pub fn publish(&self, slot: RequestSlot) {
        self.stream.bind_completion_queue(Arc::clone(slot.bound_cq()));
        slot.call_output()
            .set(ServerCall::new(self.id, Arc::clone(&self.stream)));

        let mut received = self.received.lock();
        slot.metadata_output()
            .set(std::mem::take(&mut received.metadata));
        match slot.kind() {
            SlotKind::Batch { details } => details.set(CallDetails {
                method: received.path.clone(),
                host: received.host.clone(),
                deadline: received.deadline,
            }),
            SlotKind::Registered { deadline, payload } => {
                deadline.set(received.deadline);
                if let (Some(out), Some(bytes)) = (payload, received.payload.take()) {
                    out.set(bytes);
                }
            }
        }
        drop(received);

        tracing::debug!(call_id = %self.id, tag = %slot.tag(), "Call published");
        slot.complete();
    }

    /// Release the underlying stream of a zombied call. Idempotent.
    pub fn kill_zombie(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(call_id = %self.id, "Zombie call torn down");
        self.stream.abandon();
    }

    /// Abort a call that failed before it could be matched.
    ///
    /// A call still in a pending list is only marked; whoever removes it
    /// from the list tears it down.
    pub fn fail_call_creation(&self) {
        if self.transition(CallState::NotStarted, CallState::Zombied) {
            self.kill_zombie();
        } else {
            self.transition(CallState::Pending, CallState::Zombied);
        }
    }

    /// Record why the call was zombied. The first reason recorded sticks.
    pub fn set_zombie_reason(&self, error: CallError) {
        let _ = self.zombie_reason.set(error);
    }

    pub fn zombie_reason(&self) -> Option<&CallError> {
        self.zombie_reason.get()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for IncomingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingCall")
            .field("id", &self.id)
            .field("state", &self.state.load())
            .field("zombie_reason", &self.zombie_reason.get())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::requested::{BatchOutputs, RegisteredOutputs};
    use crate::completion_queue::{CompletionQueue, EventQueue, PollResult, QueueHandle, Tag};
    use crate::transport::LoopbackStream;
    use std::time::Duration;

    fn loopback(md: InitialMetadata) -> (Arc<LoopbackStream>, IncomingCall) {
        let stream = Arc::new(LoopbackStream::new(md));
        let call = IncomingCall::new(stream.clone());
        (stream, call)
    }

    #[test]
    fn test_set_routing_requires_path_and_authority() {
        let (_, call) = loopback(InitialMetadata::default());
        let md = InitialMetadata {
            path: Some("/svc/Method".into()),
            ..Default::default()
        };
        assert_eq!(call.set_routing(md), Err(CallError::MissingRoutingMetadata));
    }

    #[test]
    fn test_publish_batch_fills_details() {
        let md = InitialMetadata::new("/svc/Echo", "example.com").with_entry("k", "v");
        let (stream, call) = loopback(md.clone());
        call.set_routing(md).unwrap();
        assert!(call.transition(CallState::NotStarted, CallState::Activated));

        let cq = Arc::new(EventQueue::new("cq0"));
        let handle: QueueHandle = cq.clone();
        assert!(cq.begin_op(Tag(1)));
        let outputs = BatchOutputs::new();
        call.publish(RequestSlot::batch(Tag(1), handle.clone(), handle, outputs.clone()));

        match cq.next(Duration::from_millis(10)) {
            PollResult::Event(ev) => assert!(ev.is_ok()),
            other => panic!("unexpected poll result {other:?}"),
        }
        let details = outputs.details.get().unwrap();
        assert_eq!(details.method, "/svc/Echo");
        assert_eq!(details.host, "example.com");
        assert_eq!(outputs.initial_metadata.get().unwrap(), vec![("k".to_string(), "v".to_string())]);
        assert_eq!(outputs.call.get().unwrap().id(), call.id());
        assert!(stream.is_bound());
    }

    #[test]
    fn test_publish_registered_moves_payload() {
        let md = InitialMetadata::new("/svc/Put", "h");
        let (_, call) = loopback(md.clone());
        call.set_routing(md).unwrap();
        call.set_payload(Some(b"body".to_vec()));
        assert!(call.transition(CallState::NotStarted, CallState::Activated));

        let cq = Arc::new(EventQueue::new("cq0"));
        let handle: QueueHandle = cq.clone();
        assert!(cq.begin_op(Tag(2)));
        let outputs = RegisteredOutputs::with_payload();
        call.publish(RequestSlot::registered(Tag(2), handle.clone(), handle, outputs.clone()));

        assert_eq!(outputs.payload.as_ref().unwrap().get(), Some(b"body".to_vec()));
        assert_eq!(outputs.deadline.get(), Some(None));
    }

    #[test]
    fn test_fail_call_creation_tears_down_once() {
        let (stream, call) = loopback(InitialMetadata::default());
        call.fail_call_creation();
        assert_eq!(call.state(), CallState::Zombied);
        assert!(stream.is_abandoned());

        call.kill_zombie();
        assert!(call.is_torn_down());
    }

    #[test]
    fn test_fail_call_creation_leaves_pending_teardown_to_list_owner() {
        let (stream, call) = loopback(InitialMetadata::default());
        assert!(call.transition(CallState::NotStarted, CallState::Pending));
        call.fail_call_creation();

        assert_eq!(call.state(), CallState::Zombied);
        assert!(!stream.is_abandoned());
    }
}
