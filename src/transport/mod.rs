//! Transport-facing interface of the engine.
//!
//! # Data Flow
//! ```text
//! Transport accepts a stream
//!     → Channel::accept_stream(stream)
//!     → stream.recv_initial_metadata(callback)
//!     → callback delivers InitialMetadata (path, authority, deadline, flags)
//!     → [ReadInitialMessage methods] stream.recv_message(callback)
//!     → matcher.match_or_queue(...)
//! ```
//!
//! # Design Decisions
//! - Framing and codecs stay behind `ServerStream`; the engine never sees bytes on the wire
//! - Callbacks are one-shot boxed closures, invoked from whatever thread the transport uses
//! - An abandoned (zombied) call is torn down through `ServerStream::abandon`

pub mod loopback;

use std::sync::Arc;
use std::time::Instant;

use crate::call::CallId;
use crate::completion_queue::QueueHandle;
use crate::error::CallError;

pub use loopback::LoopbackStream;

/// Application metadata carried with the call (routing keys removed).
pub type Metadata = Vec<(String, String)>;

/// First message of a call, read for `ReadInitialMessage` methods.
pub type Payload = Vec<u8>;

/// Received initial metadata as handed over by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitialMetadata {
    /// `:path`, the fully qualified method.
    pub path: Option<String>,
    /// `:authority`, the host.
    pub authority: Option<String>,
    /// None means no deadline.
    pub deadline: Option<Instant>,
    /// Set when the client marked the request idempotent.
    pub idempotent: bool,
    pub entries: Metadata,
}

impl InitialMetadata {
    pub fn new(path: impl Into<String>, authority: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            authority: Some(authority.into()),
            ..Default::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }
}

pub type MetadataCallback = Box<dyn FnOnce(Result<InitialMetadata, CallError>) + Send>;
pub type MessageCallback = Box<dyn FnOnce(Result<Option<Payload>, CallError>) + Send>;

/// The underlying call object a transport creates for each accepted stream.
pub trait ServerStream: Send + Sync + std::fmt::Debug {
    /// Start receiving initial metadata; `on_ready` runs exactly once.
    fn recv_initial_metadata(&self, on_ready: MetadataCallback);

    /// Start receiving the first message; `on_ready` runs exactly once.
    fn recv_message(&self, on_ready: MessageCallback);

    /// Bind the call's future operations to `cq`.
    fn bind_completion_queue(&self, cq: QueueHandle);

    /// Release a call that will never reach the application.
    fn abandon(&self);
}

/// Call handle delivered to the application on a successful match.
#[derive(Debug, Clone)]
pub struct ServerCall {
    id: CallId,
    stream: Arc<dyn ServerStream>,
}

impl ServerCall {
    pub(crate) fn new(id: CallId, stream: Arc<dyn ServerStream>) -> Self {
        Self { id, stream }
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn stream(&self) -> &Arc<dyn ServerStream> {
        &self.stream
    }
}
