//! RPC call admission and matching engine.
//!
//! Pairs calls arriving from a transport with application threads asking
//! for "the next call", across several completion queues and registered
//! methods, and drains both sides cleanly on shutdown.

// Core engine
pub mod call;
pub mod completion_queue;
pub mod matcher;
pub mod routing;
pub mod server;
pub mod transport;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use call::{BatchOutputs, CallDetails, CallState, IncomingCall, OutputCell, RegisteredOutputs};
pub use completion_queue::{CompletionQueue, Event, EventQueue, PollResult, QueueHandle, Tag};
pub use config::ServerConfig;
pub use error::CallError;
pub use routing::{MethodFlags, MethodHandle, PayloadHandling};
pub use server::{Channel, Server, ServerBuilder};
pub use transport::{InitialMetadata, ServerCall, ServerStream};
