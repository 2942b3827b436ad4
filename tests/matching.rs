//! Matching tests: calls meeting application requests in either order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use call_admission::completion_queue::{CompletionQueue, Tag};
use call_admission::routing::{MethodFlags, MethodHandle, PayloadHandling};
use call_admission::transport::InitialMetadata;
use call_admission::{BatchOutputs, CallError, CallState, RegisteredOutputs, ServerBuilder};

mod common;
use common::{expect_event, expect_no_event, queues, ManualStream};

#[test]
fn test_fast_match_registered_call() {
    let (cqs, handles) = queues(1);
    let mut builder = ServerBuilder::new();
    builder.register_completion_queue(handles[0].clone());
    let echo = builder
        .register_method("/svc/Echo", None, PayloadHandling::None, 0)
        .unwrap();
    let server = builder.start().unwrap();

    let outputs = RegisteredOutputs::new();
    server
        .request_registered_call(echo, Tag(1), handles[0].clone(), handles[0].clone(), outputs.clone())
        .unwrap();

    let channel = server.setup_transport(Some(&handles[0]));
    let stream = ManualStream::new();
    let call = channel.accept_stream(stream.clone()).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    stream.deliver_metadata(InitialMetadata::new("/svc/Echo", "any.host").with_deadline(deadline));

    assert_eq!(call.state(), CallState::Activated);
    let event = expect_event(&cqs[0]);
    assert_eq!(event.tag, Tag(1));
    assert!(event.is_ok());
    assert_eq!(outputs.deadline.get(), Some(Some(deadline)));
    assert_eq!(outputs.call.get().unwrap().id(), call.id());
    assert!(stream.bound_to(&handles[0]));
}

#[test]
fn test_reverse_order_unregistered_call() {
    let (cqs, handles) = queues(2);
    let mut builder = ServerBuilder::new();
    for h in &handles {
        builder.register_completion_queue(h.clone());
    }
    let server = builder.start().unwrap();

    let channel = server.setup_transport(Some(&handles[0]));
    let stream = ManualStream::new();
    let call = channel.accept_stream(stream.clone()).unwrap();
    stream.deliver_metadata(InitialMetadata::new("/unknown.Svc/Do", "h").with_entry("x-user", "alice"));

    assert_eq!(call.state(), CallState::Pending);
    assert_eq!(server.pending_calls(), 1);

    let outputs = BatchOutputs::new();
    server
        .request_call(Tag(2), handles[1].clone(), handles[1].clone(), outputs.clone())
        .unwrap();

    assert_eq!(call.state(), CallState::Activated);
    let event = expect_event(&cqs[1]);
    assert_eq!(event.tag, Tag(2));
    expect_no_event(&cqs[0]);

    let details = outputs.details.get().unwrap();
    assert_eq!(details.method, "/unknown.Svc/Do");
    assert_eq!(details.host, "h");
    assert_eq!(
        outputs.initial_metadata.get().unwrap(),
        vec![("x-user".to_string(), "alice".to_string())]
    );
    assert!(stream.bound_to(&handles[1]));
}

#[test]
fn test_payload_gated_publish() {
    let (cqs, handles) = queues(1);
    let mut builder = ServerBuilder::new();
    builder.register_completion_queue(handles[0].clone());
    let put = builder
        .register_method("/kv/Put", None, PayloadHandling::ReadInitialMessage, 0)
        .unwrap();
    let server = builder.start().unwrap();

    let outputs = RegisteredOutputs::with_payload();
    server
        .request_registered_call(put, Tag(3), handles[0].clone(), handles[0].clone(), outputs.clone())
        .unwrap();

    let channel = server.setup_transport(Some(&handles[0]));
    let stream = ManualStream::new();
    let call = channel.accept_stream(stream.clone()).unwrap();
    stream.deliver_metadata(InitialMetadata::new("/kv/Put", "h"));

    assert!(stream.message_requested());
    assert_eq!(call.state(), CallState::NotStarted);
    assert!(!outputs.payload.as_ref().unwrap().is_set());
    expect_no_event(&cqs[0]);

    stream.deliver_message(Some(b"value".to_vec()));

    assert_eq!(call.state(), CallState::Activated);
    assert_eq!(expect_event(&cqs[0]).tag, Tag(3));
    assert_eq!(outputs.payload.as_ref().unwrap().get(), Some(b"value".to_vec()));
}

#[test]
fn test_payload_output_must_match_method() {
    let (cqs, handles) = queues(1);
    let mut builder = ServerBuilder::new();
    builder.register_completion_queue(handles[0].clone());
    let plain = builder.register_method("/a/Plain", None, PayloadHandling::None, 0).unwrap();
    let read = builder
        .register_method("/a/Read", None, PayloadHandling::ReadInitialMessage, 0)
        .unwrap();
    let server = builder.start().unwrap();

    let cq = handles[0].clone();
    assert_eq!(
        server.request_registered_call(plain, Tag(1), cq.clone(), cq.clone(), RegisteredOutputs::with_payload()),
        Err(CallError::PayloadTypeMismatch)
    );
    assert_eq!(
        server.request_registered_call(read, Tag(2), cq.clone(), cq.clone(), RegisteredOutputs::new()),
        Err(CallError::PayloadTypeMismatch)
    );
    expect_no_event(&cqs[0]);
}

#[test]
fn test_request_validation_errors() {
    let (cqs, handles) = queues(1);
    let (_, foreign) = queues(1);
    let mut builder = ServerBuilder::new();
    builder.register_completion_queue(handles[0].clone());
    let server = builder.start().unwrap();

    assert_eq!(
        server.request_call(Tag(1), handles[0].clone(), foreign[0].clone(), BatchOutputs::new()),
        Err(CallError::CompletionQueueNotRegistered)
    );
    assert_eq!(
        server.request_registered_call(
            MethodHandle::from_index(7),
            Tag(2),
            handles[0].clone(),
            handles[0].clone(),
            RegisteredOutputs::new()
        ),
        Err(CallError::UnknownMethod(7))
    );

    cqs[0].shutdown();
    assert_eq!(
        server.request_call(Tag(3), handles[0].clone(), handles[0].clone(), BatchOutputs::new()),
        Err(CallError::CompletionQueueShutdown)
    );
}

#[test]
fn test_host_specific_and_idempotent_routing() {
    let (cqs, handles) = queues(1);
    let cq = handles[0].clone();
    let mut builder = ServerBuilder::new();
    builder.register_completion_queue(cq.clone());
    let scoped = builder
        .register_method("/svc/Get", Some("a.example"), PayloadHandling::None, 0)
        .unwrap();
    let idempotent = builder
        .register_method("/svc/Fetch", None, PayloadHandling::None, MethodFlags::IDEMPOTENT_REQUEST)
        .unwrap();
    let server = builder.start().unwrap();

    let scoped_out = RegisteredOutputs::new();
    let idem_out = RegisteredOutputs::new();
    let batch_out = BatchOutputs::new();
    server
        .request_registered_call(scoped, Tag(10), cq.clone(), cq.clone(), scoped_out.clone())
        .unwrap();
    server
        .request_registered_call(idempotent, Tag(11), cq.clone(), cq.clone(), idem_out.clone())
        .unwrap();
    server.request_call(Tag(12), cq.clone(), cq.clone(), batch_out.clone()).unwrap();

    let channel = server.setup_transport(Some(&cq));

    // Other host: not the host-scoped method.
    let other_host = ManualStream::new();
    channel.accept_stream(other_host.clone()).unwrap();
    other_host.deliver_metadata(InitialMetadata::new("/svc/Get", "b.example"));
    assert_eq!(expect_event(&cqs[0]).tag, Tag(12));
    assert_eq!(batch_out.details.get().unwrap().host, "b.example");

    // Not idempotent: skips the idempotent-only method and parks as unregistered.
    let plain = ManualStream::new();
    let parked = channel.accept_stream(plain.clone()).unwrap();
    plain.deliver_metadata(InitialMetadata::new("/svc/Fetch", "h"));
    assert_eq!(parked.state(), CallState::Pending);

    let idem = ManualStream::new();
    channel.accept_stream(idem.clone()).unwrap();
    idem.deliver_metadata(InitialMetadata::new("/svc/Fetch", "h").idempotent());
    assert_eq!(expect_event(&cqs[0]).tag, Tag(11));

    let scoped_stream = ManualStream::new();
    channel.accept_stream(scoped_stream.clone()).unwrap();
    scoped_stream.deliver_metadata(InitialMetadata::new("/svc/Get", "a.example"));
    assert_eq!(expect_event(&cqs[0]).tag, Tag(10));
    assert!(scoped_out.call.is_set());
}

#[test]
fn test_missing_routing_metadata_fails_call_creation() {
    let (cqs, handles) = queues(1);
    let mut builder = ServerBuilder::new();
    builder.register_completion_queue(handles[0].clone());
    let server = builder.start().unwrap();
    server
        .request_call(Tag(1), handles[0].clone(), handles[0].clone(), BatchOutputs::new())
        .unwrap();

    let channel = server.setup_transport(Some(&handles[0]));
    let stream = ManualStream::new();
    let call = channel.accept_stream(stream.clone()).unwrap();
    stream.deliver_metadata(InitialMetadata {
        path: Some("/svc/NoHost".into()),
        ..Default::default()
    });

    assert_eq!(call.state(), CallState::Zombied);
    assert!(stream.abandoned());
    expect_no_event(&cqs[0]);

    // The request is still available to the next well-formed call.
    let good = ManualStream::new();
    channel.accept_stream(good.clone()).unwrap();
    good.deliver_metadata(InitialMetadata::new("/svc/Any", "h"));
    assert_eq!(expect_event(&cqs[0]).tag, Tag(1));
}

#[test]
fn test_metadata_error_zombifies_call() {
    let (_, handles) = queues(1);
    let mut builder = ServerBuilder::new();
    builder.register_completion_queue(handles[0].clone());
    let server = builder.start().unwrap();

    let channel = server.setup_transport(None);
    let stream = ManualStream::new();
    let call = channel.accept_stream(stream.clone()).unwrap();
    stream.fail_metadata(CallError::Transport("reset by peer".into()));

    assert_eq!(call.state(), CallState::Zombied);
    assert!(stream.abandoned());
    assert_eq!(server.pending_calls(), 0);
}

#[test]
fn test_request_on_allocator_method_rejected() {
    use call_admission::matcher::{Allocation, RegisteredAllocator};

    let (cqs, handles) = queues(1);
    let mut builder = ServerBuilder::new();
    builder.register_completion_queue(handles[0].clone());
    let method = builder.register_method("/svc/Auto", None, PayloadHandling::None, 0).unwrap();
    let allocate: RegisteredAllocator = Arc::new(|| Allocation {
        tag: Tag(99),
        outputs: RegisteredOutputs::new(),
    });
    builder
        .set_registered_method_allocator(method, handles[0].clone(), allocate)
        .unwrap();
    let server = builder.start().unwrap();

    assert_eq!(
        server.request_registered_call(method, Tag(1), handles[0].clone(), handles[0].clone(), RegisteredOutputs::new()),
        Err(CallError::MethodNotQueueing("/svc/Auto".into()))
    );

    let channel = server.setup_transport(Some(&handles[0]));
    let stream = ManualStream::new();
    let call = channel.accept_stream(stream.clone()).unwrap();
    stream.deliver_metadata(InitialMetadata::new("/svc/Auto", "h"));
    assert_eq!(call.state(), CallState::Activated);
    assert_eq!(expect_event(&cqs[0]).tag, Tag(99));
}

#[test]
fn test_completion_queue_begin_op_registered_per_request() {
    let (cqs, handles) = queues(1);
    let mut builder = ServerBuilder::new();
    builder.register_completion_queue(handles[0].clone());
    let server = builder.start().unwrap();
    server
        .request_call(Tag(5), handles[0].clone(), handles[0].clone(), BatchOutputs::new())
        .unwrap();

    // The outstanding request keeps the queue from reporting shutdown.
    cqs[0].shutdown();
    assert!(!cqs[0].begin_op(Tag(6)));
    expect_no_event(&cqs[0]);
}
