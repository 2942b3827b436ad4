//! Error kinds surfaced by the call admission engine.

use thiserror::Error;

/// Errors returned by the application-facing entry points or delivered with
/// a failed request's completion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The notification queue is not one of the server's completion queues.
    #[error("completion queue is not registered with this server")]
    CompletionQueueNotRegistered,

    /// Payload output presence disagrees with the method's payload handling.
    #[error("payload output does not match the method's payload handling")]
    PayloadTypeMismatch,

    /// The notification queue has already begun shutting down.
    #[error("completion queue is shutting down")]
    CompletionQueueShutdown,

    /// The server shut down before the request could be matched.
    #[error("server shutdown")]
    ServerShutdown,

    /// Initial metadata lacked a usable method or host.
    #[error("missing :authority or :path")]
    MissingRoutingMetadata,

    /// The method handle does not belong to this server.
    #[error("unknown method handle {0}")]
    UnknownMethod(usize),

    /// The method is served by an allocator and takes no application requests.
    #[error("method {0} is served by an allocator and cannot be requested")]
    MethodNotQueueing(String),

    /// A method with the same name and host is already registered.
    #[error("duplicate registration for {method}@{host}")]
    DuplicateMethod { method: String, host: String },

    /// Method flags outside the supported mask.
    #[error("invalid method flags {0:#010x}")]
    InvalidFlags(u32),

    /// Method names must be non-empty.
    #[error("method name cannot be empty")]
    EmptyMethodName,

    /// A server needs at least one completion queue before it can start.
    #[error("server has no completion queues")]
    NoCompletionQueues,

    /// An allocator was installed for a queue the server does not own.
    #[error("allocator completion queue is not registered with this server")]
    AllocatorQueueNotRegistered,

    /// The transport failed an operation on the stream.
    #[error("transport error: {0}")]
    Transport(String),

    /// The pending backlog rejected the call.
    #[error("too many calls waiting for an application request")]
    ResourceExhausted,

    /// The server cancelled every call on the channel.
    #[error("call cancelled by the server")]
    Cancelled,

    /// The call waited longer than allowed for an application request.
    #[error("call waited too long for an application request")]
    PendingTimeout,
}
