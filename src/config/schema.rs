//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::matcher::{BacklogProtector, PendingPolicy};
use crate::routing::PayloadHandling;

/// Root configuration for the call admission server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Number of completion queues the server polls.
    pub completion_queues: usize,

    /// Registered methods. Calls to anything else are unregistered.
    pub methods: Vec<MethodConfig>,

    /// Limits on calls waiting for an application request.
    pub pending: PendingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Workload for the driver binary.
    pub simulation: SimulationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            completion_queues: 4,
            methods: Vec::new(),
            pending: PendingConfig::default(),
            observability: ObservabilityConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

/// A method to register at startup.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MethodConfig {
    /// Fully qualified method path, e.g. "/pkg.Service/Method".
    pub name: String,

    /// Restrict the method to one host. None accepts any host.
    pub host: Option<String>,

    /// Whether the first message is read before the call is published.
    pub payload: PayloadHandling,

    /// Only accept calls the client marked idempotent.
    pub idempotent_only: bool,
}

/// Pending-list limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PendingConfig {
    /// Seconds a call may wait for a request before it is dropped.
    pub max_unrequested_time_secs: u64,

    /// Soft limit: above it, new calls are rejected with rising probability.
    pub max_pending_requests: usize,

    /// Hard limit: at or above it, new calls are always rejected.
    pub max_pending_requests_hard_limit: usize,
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self {
            max_unrequested_time_secs: 30,
            max_pending_requests: 1000,
            max_pending_requests_hard_limit: 3000,
        }
    }
}

impl PendingConfig {
    pub fn policy(&self) -> PendingPolicy {
        PendingPolicy {
            max_unrequested_time: Duration::from_secs(self.max_unrequested_time_secs),
            backlog: BacklogProtector::new(self.max_pending_requests, self.max_pending_requests_hard_limit),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Synthetic workload run by the driver binary.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Application threads requesting calls.
    pub app_threads: usize,

    /// Transport threads delivering streams.
    pub transport_threads: usize,

    /// Calls each transport thread delivers.
    pub calls_per_thread: usize,

    /// Share of calls sent to unregistered paths, 0.0 to 1.0.
    pub unregistered_ratio: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            app_threads: 4,
            transport_threads: 4,
            calls_per_thread: 1000,
            unregistered_ratio: 0.2,
        }
    }
}
