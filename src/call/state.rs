//! Incoming call state machine.
//!
//! # States
//! - NotStarted: waiting for initial metadata
//! - Pending: routed, waiting on a matcher's pending list
//! - Activated: paired with a request slot and published
//! - Zombied: will never reach the application
//!
//! # State Transitions
//! ```text
//! NotStarted → Activated: matched on arrival
//! NotStarted → Pending:   no request slot available
//! Pending    → Activated: drained by a newly queued request (CAS)
//! NotStarted → Zombied:   metadata error, shutdown, backlog rejection
//! Pending    → Zombied:   shutdown, pending timeout, late metadata error
//! ```
//! Activated and Zombied are absorbing.

use std::sync::atomic::{AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    NotStarted = 0,
    Pending = 1,
    Activated = 2,
    Zombied = 3,
}

impl From<u8> for CallState {
    fn from(val: u8) -> Self {
        match val {
            1 => CallState::Pending,
            2 => CallState::Activated,
            3 => CallState::Zombied,
            _ => CallState::NotStarted,
        }
    }
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Activated | CallState::Zombied)
    }

    fn can_become(self, next: CallState) -> bool {
        matches!(
            (self, next),
            (CallState::NotStarted, CallState::Pending)
                | (CallState::NotStarted, CallState::Activated)
                | (CallState::NotStarted, CallState::Zombied)
                | (CallState::Pending, CallState::Activated)
                | (CallState::Pending, CallState::Zombied)
        )
    }
}

/// Atomic holder for a call's state. Only forward transitions succeed.
#[derive(Debug)]
pub struct AtomicCallState(AtomicU8);

impl AtomicCallState {
    pub fn new() -> Self {
        Self(AtomicU8::new(CallState::NotStarted as u8))
    }

    pub fn load(&self) -> CallState {
        CallState::from(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to` if the state is still `from`.
    pub fn transition(&self, from: CallState, to: CallState) -> bool {
        if !from.can_become(to) {
            return false;
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for AtomicCallState {
    fn default() -> Self {
        Self::new()
    }
}
