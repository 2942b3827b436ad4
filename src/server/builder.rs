//! Server construction.
//!
//! # Responsibilities
//! - Collect completion queues, methods and allocators before start
//! - Reject duplicate registrations and unknown flag bits
//! - Create exactly one matcher per method at start
//!
//! # Design Decisions
//! - Registration happens only before start; a started server is immutable
//! - Allocator queues are checked at start, after every queue is registered

use std::sync::Arc;

use crate::completion_queue::{same_queue, QueueHandle};
use crate::config::ServerConfig;
use crate::error::CallError;
use crate::matcher::{
    AllocatingMatcher, BatchAllocator, PendingPolicy, QueueingMatcher, RegisteredAllocator, RequestMatcher,
};
use crate::routing::{MethodFlags, MethodHandle, MethodSpec, PayloadHandling, RegisteredMethod};
use crate::server::{Server, ServerCore, ServerInner};

/// Name of the matcher serving calls to unregistered methods.
pub const UNREGISTERED_MATCHER: &str = "unregistered";

#[derive(Default)]
pub struct ServerBuilder {
    cqs: Vec<QueueHandle>,
    methods: Vec<(MethodSpec, Option<(QueueHandle, RegisteredAllocator)>)>,
    batch_allocator: Option<(QueueHandle, BatchAllocator)>,
    pending: PendingPolicy,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the queues and methods described by `config`.
    pub fn from_config(config: &ServerConfig, cqs: &[QueueHandle]) -> Result<Self, CallError> {
        let mut builder = Self::new().with_pending_policy(config.pending.policy());
        for cq in cqs {
            builder.register_completion_queue(Arc::clone(cq));
        }
        for method in &config.methods {
            let flags = if method.idempotent_only {
                MethodFlags::IDEMPOTENT_REQUEST
            } else {
                0
            };
            builder.register_method(&method.name, method.host.as_deref(), method.payload, flags)?;
        }
        Ok(builder)
    }

    pub fn with_pending_policy(mut self, pending: PendingPolicy) -> Self {
        self.pending = pending;
        self
    }

    /// Add a completion queue. Registering the same queue twice is a no-op.
    pub fn register_completion_queue(&mut self, cq: QueueHandle) -> &mut Self {
        if !self.cqs.iter().any(|c| same_queue(c, &cq)) {
            self.cqs.push(cq);
        }
        self
    }

    pub fn register_method(
        &mut self,
        name: &str,
        host: Option<&str>,
        payload: PayloadHandling,
        flags: u32,
    ) -> Result<MethodHandle, CallError> {
        if name.is_empty() {
            return Err(CallError::EmptyMethodName);
        }
        let flags = MethodFlags::from_bits(flags)?;
        let mut spec = MethodSpec::new(name).with_payload(payload).with_flags(flags);
        if let Some(host) = host {
            spec = spec.with_host(host);
        }

        if self.methods.iter().any(|(existing, _)| existing.same_route(&spec)) {
            tracing::error!(method = %name, host = ?host, "Duplicate method registration");
            return Err(CallError::DuplicateMethod {
                method: name.to_string(),
                host: host.unwrap_or("*").to_string(),
            });
        }

        tracing::debug!(
            method = %name,
            host = ?host,
            flags = spec.flags.bits(),
            "Method registered"
        );
        let handle = MethodHandle(self.methods.len());
        self.methods.push((spec, None));
        Ok(handle)
    }

    /// Serve `method` from `allocator` instead of application requests.
    pub fn set_registered_method_allocator(
        &mut self,
        method: MethodHandle,
        cq: QueueHandle,
        allocator: RegisteredAllocator,
    ) -> Result<(), CallError> {
        let entry = self
            .methods
            .get_mut(method.0)
            .ok_or(CallError::UnknownMethod(method.0))?;
        entry.1 = Some((cq, allocator));
        Ok(())
    }

    /// Serve unregistered calls from `allocator` instead of application requests.
    pub fn set_batch_method_allocator(&mut self, cq: QueueHandle, allocator: BatchAllocator) -> &mut Self {
        self.batch_allocator = Some((cq, allocator));
        self
    }

    pub fn start(self) -> Result<Server, CallError> {
        if self.cqs.is_empty() {
            return Err(CallError::NoCompletionQueues);
        }
        let allocator_queues = self
            .methods
            .iter()
            .filter_map(|(_, alloc)| alloc.as_ref().map(|(cq, _)| cq))
            .chain(self.batch_allocator.as_ref().map(|(cq, _)| cq));
        for cq in allocator_queues {
            if !self.cqs.iter().any(|c| same_queue(c, cq)) {
                return Err(CallError::AllocatorQueueNotRegistered);
            }
        }

        let core = Arc::new(ServerCore::new(self.cqs, self.pending));

        let methods: Vec<RegisteredMethod> = self
            .methods
            .into_iter()
            .map(|(spec, alloc)| {
                let matcher: Arc<dyn RequestMatcher> = match alloc {
                    Some((cq, allocate)) => Arc::new(AllocatingMatcher::registered(
                        Arc::clone(&core),
                        cq,
                        spec.clone(),
                        allocate,
                    )),
                    None => Arc::new(QueueingMatcher::new(spec.name.clone(), Arc::clone(&core))),
                };
                RegisteredMethod { spec, matcher }
            })
            .collect();

        let unregistered: Arc<dyn RequestMatcher> = match self.batch_allocator {
            Some((cq, allocate)) => Arc::new(AllocatingMatcher::batch(Arc::clone(&core), cq, allocate)),
            None => Arc::new(QueueingMatcher::new(UNREGISTERED_MATCHER, Arc::clone(&core))),
        };

        tracing::info!(
            completion_queues = core.cq_count(),
            methods = methods.len(),
            "Server started"
        );

        Ok(Server::from_inner(ServerInner {
            core,
            methods,
            unregistered,
        }))
    }
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("cqs", &self.cqs.len())
            .field("methods", &self.methods.iter().map(|(spec, _)| &spec.name).collect::<Vec<_>>())
            .field("batch_allocator", &self.batch_allocator.is_some())
            .finish()
    }
}
