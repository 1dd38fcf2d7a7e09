//! Event queue: buffers events that arrive while a transition is in flight.

use std::collections::VecDeque;

/// Policy for events arriving while a transition is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum QueueMode {
    /// Buffer events and replay them in arrival order once the in-flight
    /// transition completes. A failed transition drops the remaining buffered
    /// events and surfaces the failure once.
    #[default]
    UntilFailures,
    /// Discard events posted while a transition is running. Events posted
    /// while the machine is idle queue normally.
    DropWhileRunning,
}

/// A pluggable event buffer. The machine serializes access; implementations
/// do not need interior synchronization.
pub trait EventQueue<E>: Send {
    /// Enqueues an event, returning it back if the queue is at capacity.
    fn push(&mut self, event: E) -> Result<(), E>;

    /// Removes and returns the oldest buffered event.
    fn pop(&mut self) -> Option<E>;

    /// Drops all buffered events, returning how many were discarded.
    fn clear(&mut self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered events, if bounded.
    fn capacity(&self) -> Option<usize> {
        None
    }
}

/// FIFO queue, unbounded by default.
///
/// The bounded variant applies reject-with-error backpressure: a push against
/// a full queue hands the event back instead of silently losing it.
#[derive(Debug)]
pub struct FifoQueue<E> {
    buf: VecDeque<E>,
    capacity: Option<usize>,
}

impl<E> FifoQueue<E> {
    pub fn new() -> Self {
        Self {
            buf: VecDeque::new(),
            capacity: None,
        }
    }

    pub fn bounded(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity: Some(capacity),
        }
    }
}

impl<E> Default for FifoQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Send> EventQueue<E> for FifoQueue<E> {
    fn push(&mut self, event: E) -> Result<(), E> {
        if let Some(capacity) = self.capacity {
            if self.buf.len() >= capacity {
                return Err(event);
            }
        }
        self.buf.push_back(event);
        Ok(())
    }

    fn pop(&mut self) -> Option<E> {
        self.buf.pop_front()
    }

    fn clear(&mut self) -> usize {
        let dropped = self.buf.len();
        self.buf.clear();
        dropped
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = FifoQueue::new();
        queue.push("a").unwrap();
        queue.push("b").unwrap();
        queue.push("c").unwrap();

        assert_eq!(queue.pop(), Some("a"));
        assert_eq!(queue.pop(), Some("b"));
        assert_eq!(queue.pop(), Some("c"));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_bounded_rejects_when_full() {
        let mut queue = FifoQueue::bounded(2);
        queue.push(1).unwrap();
        queue.push(2).unwrap();

        assert_eq!(queue.push(3), Err(3));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.capacity(), Some(2));

        // Draining frees capacity again.
        assert_eq!(queue.pop(), Some(1));
        queue.push(3).unwrap();
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
    }

    #[test]
    fn test_clear_reports_dropped_count() {
        let mut queue = FifoQueue::new();
        for i in 0..5 {
            queue.push(i).unwrap();
        }
        assert_eq!(queue.clear(), 5);
        assert!(queue.is_empty());
        assert_eq!(queue.clear(), 0);
    }

    #[test]
    fn test_default_mode_is_until_failures() {
        assert_eq!(QueueMode::default(), QueueMode::UntilFailures);
    }

    proptest! {
        #[test]
        fn test_arrival_order_preserved(events in proptest::collection::vec(0u32..1000, 0..64)) {
            let mut queue = FifoQueue::new();
            for &event in &events {
                prop_assert!(queue.push(event).is_ok());
            }
            let mut drained = Vec::new();
            while let Some(event) = queue.pop() {
                drained.push(event);
            }
            prop_assert_eq!(drained, events);
        }

        #[test]
        fn test_bounded_never_exceeds_capacity(
            capacity in 1usize..8,
            events in proptest::collection::vec(0u32..1000, 0..32),
        ) {
            let mut queue = FifoQueue::bounded(capacity);
            for &event in &events {
                let _ = queue.push(event);
                prop_assert!(queue.len() <= capacity);
            }
        }
    }
}
