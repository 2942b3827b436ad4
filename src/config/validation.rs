//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (queue count > 0, limits ordered)
//! - Detect conflicting method registrations
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use crate::config::schema::ServerConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    NoCompletionQueues,
    EmptyMethodName { index: usize },
    DuplicateMethod { name: String, host: Option<String> },
    SoftLimitAboveHardLimit { soft: usize, hard: usize },
    ZeroPendingTime,
    InvalidMetricsAddress(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::NoCompletionQueues => write!(f, "completion_queues must be at least 1"),
            ValidationError::EmptyMethodName { index } => write!(f, "methods[{}] has an empty name", index),
            ValidationError::DuplicateMethod { name, host } => match host {
                Some(host) => write!(f, "method {} registered twice for host {}", name, host),
                None => write!(f, "method {} registered twice", name),
            },
            ValidationError::SoftLimitAboveHardLimit { soft, hard } => write!(
                f,
                "max_pending_requests ({}) exceeds max_pending_requests_hard_limit ({})",
                soft, hard
            ),
            ValidationError::ZeroPendingTime => write!(f, "max_unrequested_time_secs must be positive"),
            ValidationError::InvalidMetricsAddress(addr) => write!(f, "invalid metrics address: {}", addr),
        }
    }
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.completion_queues == 0 {
        errors.push(ValidationError::NoCompletionQueues);
    }

    let mut seen = HashSet::new();
    for (index, method) in config.methods.iter().enumerate() {
        if method.name.is_empty() {
            errors.push(ValidationError::EmptyMethodName { index });
            continue;
        }
        if !seen.insert((method.name.as_str(), method.host.as_deref())) {
            errors.push(ValidationError::DuplicateMethod {
                name: method.name.clone(),
                host: method.host.clone(),
            });
        }
    }

    let pending = &config.pending;
    if pending.max_pending_requests > pending.max_pending_requests_hard_limit {
        errors.push(ValidationError::SoftLimitAboveHardLimit {
            soft: pending.max_pending_requests,
            hard: pending.max_pending_requests_hard_limit,
        });
    }
    if pending.max_unrequested_time_secs == 0 {
        errors.push(ValidationError::ZeroPendingTime);
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(observability.metrics_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
