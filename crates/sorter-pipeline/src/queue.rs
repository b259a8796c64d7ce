// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bounded hand-off between the trigger sampler and the capture worker
//!
//! Full queue drops the oldest pending event: fresh stock wins over a stale
//! backlog.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::trigger::TriggerEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Queued,
    /// Queued, and this older event was evicted to make room
    DroppedOldest(TriggerEvent),
    /// Queue already closed; the event was not accepted
    Rejected(TriggerEvent),
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueuePop {
    Event(TriggerEvent),
    /// Timed out with nothing pending
    Empty,
    /// Closed and fully drained
    Closed,
}

#[derive(Debug, Default)]
struct QueueInner {
    events: VecDeque<TriggerEvent>,
    closed: bool,
    dropped: u64,
}

#[derive(Debug)]
pub struct CaptureQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
    capacity: usize,
}

impl CaptureQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                events: VecDeque::with_capacity(capacity),
                ..QueueInner::default()
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    pub fn push(&self, event: TriggerEvent) -> PushOutcome {
        let mut inner = self.inner.lock();
        if inner.closed {
            return PushOutcome::Rejected(event);
        }

        let evicted = if inner.events.len() >= self.capacity {
            inner.dropped += 1;
            inner.events.pop_front()
        } else {
            None
        };
        inner.events.push_back(event);
        drop(inner);
        self.available.notify_one();

        match evicted {
            Some(old) => PushOutcome::DroppedOldest(old),
            None => PushOutcome::Queued,
        }
    }

    /// Wait up to `timeout` for the next event in arrival order
    pub fn pop_timeout(&self, timeout: Duration) -> QueuePop {
        let mut inner = self.inner.lock();
        if inner.events.is_empty() && !inner.closed {
            let _ = self.available.wait_for(&mut inner, timeout);
        }
        match inner.events.pop_front() {
            Some(event) => QueuePop::Event(event),
            None if inner.closed => QueuePop::Closed,
            None => QueuePop::Empty,
        }
    }

    /// Stop accepting events; pending ones can still be popped
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }

    /// Remove everything still pending
    pub fn drain(&self) -> Vec<TriggerEvent> {
        self.inner.lock().events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.lock().dropped
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    fn event(sequence_id: u64) -> TriggerEvent {
        TriggerEvent {
            trigger_position: sequence_id as i64 * 150,
            sequence_id,
            timestamp_ms: sequence_id,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn preserves_arrival_order() {
        let queue = CaptureQueue::new(4);
        for id in 1..=3 {
            assert_eq!(queue.push(event(id)), PushOutcome::Queued);
        }
        for id in 1..=3 {
            match queue.pop_timeout(Duration::from_millis(1)) {
                QueuePop::Event(e) => assert_eq!(e.sequence_id, id),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(queue.pop_timeout(Duration::from_millis(1)), QueuePop::Empty);
    }

    #[test]
    fn full_queue_drops_oldest() {
        let queue = CaptureQueue::new(2);
        queue.push(event(1));
        queue.push(event(2));
        match queue.push(event(3)) {
            PushOutcome::DroppedOldest(old) => assert_eq!(old.sequence_id, 1),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(queue.dropped_count(), 1);
        let remaining: Vec<u64> = queue.drain().iter().map(|e| e.sequence_id).collect();
        assert_eq!(remaining, vec![2, 3]);
    }

    #[test]
    fn closed_queue_drains_then_reports_closed() {
        let queue = CaptureQueue::new(2);
        queue.push(event(1));
        queue.close();
        assert!(matches!(queue.push(event(2)), PushOutcome::Rejected(_)));
        assert!(matches!(
            queue.pop_timeout(Duration::from_millis(1)),
            QueuePop::Event(_)
        ));
        assert_eq!(queue.pop_timeout(Duration::from_millis(1)), QueuePop::Closed);
    }

    #[test]
    fn waiting_consumer_is_woken() {
        let queue = Arc::new(CaptureQueue::new(2));
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop_timeout(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.push(event(7));
        match consumer.join().unwrap() {
            QueuePop::Event(e) => assert_eq!(e.sequence_id, 7),
            other => panic!("unexpected {:?}", other),
        }
    }
}
