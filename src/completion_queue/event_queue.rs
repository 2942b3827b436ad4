//! In-process completion queue.
//!
//! # Responsibilities
//! - Track outstanding operations between begin_op and end_op
//! - Buffer completion events in FIFO order for pollers
//! - Run each event's done callback when the event is consumed
//! - Report shutdown once drained and no operations remain outstanding

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::completion_queue::{CompletionQueue, DoneCallback, Tag};
use crate::error::CallError;

/// A completion event delivered to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub tag: Tag,
    pub result: Result<(), CallError>,
}

impl Event {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcome of polling the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    Event(Event),
    Timeout,
    Shutdown,
}

struct Posted {
    event: Event,
    done: DoneCallback,
}

#[derive(Default)]
struct QueueState {
    events: VecDeque<Posted>,
    outstanding: usize,
    shutdown: bool,
}

/// A polled FIFO of completion events.
pub struct EventQueue {
    name: String,
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl EventQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            ready: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// The event's done callback runs before this returns, outside the queue lock.
    pub fn next(&self, timeout: Duration) -> PollResult {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(posted) = state.events.pop_front() {
                state.outstanding = state.outstanding.saturating_sub(1);
                drop(state);
                (posted.done)();
                return PollResult::Event(posted.event);
            }
            if state.shutdown && state.outstanding == 0 {
                return PollResult::Shutdown;
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return PollResult::Timeout;
            }
        }
    }

    /// Begin shutting the queue down. Already begun operations still complete.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if !state.shutdown {
            state.shutdown = true;
            tracing::debug!(queue = %self.name, outstanding = state.outstanding, "Completion queue shutting down");
        }
        self.ready.notify_all();
    }

    /// Number of events waiting to be polled.
    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CompletionQueue for EventQueue {
    fn begin_op(&self, tag: Tag) -> bool {
        let mut state = self.state.lock();
        if state.shutdown {
            tracing::debug!(queue = %self.name, %tag, "begin_op refused: queue shut down");
            return false;
        }
        state.outstanding += 1;
        true
    }

    fn end_op(&self, tag: Tag, result: Result<(), CallError>, done: DoneCallback) {
        let mut state = self.state.lock();
        state.events.push_back(Posted {
            event: Event { tag, result },
            done,
        });
        self.ready.notify_one();
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_events_in_order_and_done_runs_on_poll() {
        let cq = EventQueue::new("cq0");
        let done_ran = Arc::new(AtomicBool::new(false));

        assert!(cq.begin_op(Tag(1)));
        assert!(cq.begin_op(Tag(2)));

        let flag = done_ran.clone();
        cq.end_op(Tag(1), Ok(()), Box::new(move || flag.store(true, Ordering::SeqCst)));
        cq.end_op(Tag(2), Err(CallError::ServerShutdown), Box::new(|| {}));
        assert!(!done_ran.load(Ordering::SeqCst));

        let first = cq.next(Duration::from_millis(10));
        assert_eq!(first, PollResult::Event(Event { tag: Tag(1), result: Ok(()) }));
        assert!(done_ran.load(Ordering::SeqCst));

        let second = cq.next(Duration::from_millis(10));
        assert_eq!(
            second,
            PollResult::Event(Event { tag: Tag(2), result: Err(CallError::ServerShutdown) })
        );
        assert_eq!(cq.next(Duration::from_millis(5)), PollResult::Timeout);
    }

    #[test]
    fn test_shutdown_waits_for_outstanding_ops() {
        let cq = EventQueue::new("cq0");
        assert!(cq.begin_op(Tag(7)));
        cq.shutdown();

        assert!(!cq.begin_op(Tag(8)));
        assert_eq!(cq.next(Duration::from_millis(5)), PollResult::Timeout);

        cq.end_op(Tag(7), Ok(()), Box::new(|| {}));
        assert!(matches!(cq.next(Duration::from_millis(5)), PollResult::Event(_)));
        assert_eq!(cq.next(Duration::from_millis(5)), PollResult::Shutdown);
    }
}
