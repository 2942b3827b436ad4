//! Pending-list hygiene: age limit and random early rejection.

use std::time::Duration;

/// Rejects new pending calls with a probability that rises linearly from
/// 0 at the soft limit to 1 at the hard limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacklogProtector {
    soft_limit: usize,
    hard_limit: usize,
}

impl BacklogProtector {
    pub fn new(soft_limit: usize, hard_limit: usize) -> Self {
        Self {
            soft_limit,
            hard_limit: hard_limit.max(soft_limit),
        }
    }

    pub fn soft_limit(&self) -> usize {
        self.soft_limit
    }

    pub fn hard_limit(&self) -> usize {
        self.hard_limit
    }

    /// Decide whether a call arriving at a list of `len` calls is rejected.
    pub fn should_reject(&self, len: usize) -> bool {
        if len <= self.soft_limit {
            return false;
        }
        if len >= self.hard_limit {
            return true;
        }
        let p = (len - self.soft_limit) as f64 / (self.hard_limit - self.soft_limit) as f64;
        fastrand::f64() < p
    }
}

impl Default for BacklogProtector {
    fn default() -> Self {
        Self::new(1000, 3000)
    }
}

/// Limits applied to every queueing matcher's pending list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingPolicy {
    pub max_unrequested_time: Duration,
    pub backlog: BacklogProtector,
}

impl Default for PendingPolicy {
    fn default() -> Self {
        Self {
            max_unrequested_time: Duration::from_secs(30),
            backlog: BacklogProtector::default(),
        }
    }
}
