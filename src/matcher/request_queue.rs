//! Lock-free multi-producer queue of request slots for one completion queue.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

use crate::call::RequestSlot;

/// Unbounded queue of slots with a separately maintained length.
///
/// The length is bumped before the slot becomes visible, so a nonzero
/// length with nothing to pop means a push is in flight.
#[derive(Debug, Default)]
pub struct RequestQueue {
    items: SegQueue<RequestSlot>,
    count: AtomicUsize,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the queue was empty before this push.
    pub fn push(&self, slot: RequestSlot) -> bool {
        let prev = self.count.fetch_add(1, Ordering::SeqCst);
        self.items.push(slot);
        prev == 0
    }

    /// Pop without waiting for in-flight pushes.
    pub fn try_pop(&self) -> Option<RequestSlot> {
        let slot = self.items.pop()?;
        self.count.fetch_sub(1, Ordering::SeqCst);
        Some(slot)
    }

    /// Pop, waiting for any push that has already been counted.
    /// Returns None only if the queue was observed truly empty.
    pub fn pop(&self) -> Option<RequestSlot> {
        let mut spins = 0u32;
        loop {
            if let Some(slot) = self.try_pop() {
                return Some(slot);
            }
            if self.count.load(Ordering::SeqCst) == 0 {
                return None;
            }
            if spins < 64 {
                std::hint::spin_loop();
                spins += 1;
            } else {
                std::thread::yield_now();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::BatchOutputs;
    use crate::completion_queue::{EventQueue, QueueHandle, Tag};
    use std::sync::Arc;

    fn slot(tag: u64) -> RequestSlot {
        let cq: QueueHandle = Arc::new(EventQueue::new("cq"));
        RequestSlot::batch(Tag(tag), cq.clone(), cq, BatchOutputs::new())
    }

    #[test]
    fn test_push_reports_empty_transition() {
        let queue = RequestQueue::new();
        assert!(queue.push(slot(1)));
        assert!(!queue.push(slot(2)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_fifo_order() {
        let queue = RequestQueue::new();
        queue.push(slot(1));
        queue.push(slot(2));

        assert_eq!(queue.try_pop().map(|s| s.tag()), Some(Tag(1)));
        assert_eq!(queue.pop().map(|s| s.tag()), Some(Tag(2)));
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_push_pop_counts_balance() {
        let queue = Arc::new(RequestQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|t| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        queue.push(slot(t * 1000 + i));
                    }
                })
            })
            .collect();

        let mut popped = 0;
        while popped < 1000 {
            if queue.try_pop().is_some() {
                popped += 1;
            } else {
                std::thread::yield_now();
            }
        }
        for p in producers {
            p.join().unwrap();
        }
        assert!(queue.pop().is_none());
        assert_eq!(queue.len(), 0);
    }
}
