// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO for messages waiting on the link
//!
//! When full, the oldest unprotected message (anything but a Result or an
//! Alert) is evicted first. Protected messages are evicted only when the
//! buffer holds nothing else.

use std::collections::VecDeque;

use crate::envelope::OutboundMessage;

/// What happened to a pushed message
#[derive(Debug, Clone, PartialEq)]
pub enum BufferPush {
    Buffered,
    /// The message was buffered after evicting an older one
    Evicted(OutboundMessage),
    /// The buffer only held protected messages and the incoming one is not
    Rejected(OutboundMessage),
}

#[derive(Debug)]
pub struct OutboundBuffer {
    queue: VecDeque<OutboundMessage>,
    capacity: usize,
    evicted: u64,
}

impl OutboundBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            evicted: 0,
        }
    }

    pub fn push(&mut self, message: OutboundMessage) -> BufferPush {
        if self.queue.len() < self.capacity {
            self.queue.push_back(message);
            return BufferPush::Buffered;
        }

        if let Some(index) = self.queue.iter().position(|m| !m.is_protected()) {
            let victim = self.queue.remove(index);
            self.queue.push_back(message);
            self.evicted += 1;
            return match victim {
                Some(victim) => BufferPush::Evicted(victim),
                None => BufferPush::Buffered,
            };
        }

        if !message.is_protected() {
            self.evicted += 1;
            return BufferPush::Rejected(message);
        }

        let victim = self.queue.pop_front();
        self.queue.push_back(message);
        self.evicted += 1;
        match victim {
            Some(victim) => BufferPush::Evicted(victim),
            None => BufferPush::Buffered,
        }
    }

    /// Return a message that failed to send to the head of the queue
    ///
    /// Keeps original order for the next flush. If the buffer is full the
    /// newest unprotected message is given up instead.
    pub fn push_front(&mut self, message: OutboundMessage) -> Option<OutboundMessage> {
        if self.queue.len() >= self.capacity {
            let victim = match self.queue.iter().rposition(|m| !m.is_protected()) {
                Some(index) => self.queue.remove(index),
                None => self.queue.pop_back(),
            };
            self.queue.push_front(message);
            self.evicted += 1;
            return victim;
        }
        self.queue.push_front(message);
        None
    }

    pub fn pop_front(&mut self) -> Option<OutboundMessage> {
        self.queue.pop_front()
    }

    pub fn front(&self) -> Option<&OutboundMessage> {
        self.queue.front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutboundMessage> {
        self.queue.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::AlertLevel;
    use sorter_hal::{Grade, GradeRecord};

    fn result(id: &str) -> OutboundMessage {
        let mut record = GradeRecord::new(Grade::A, 190.0, 14.0);
        record.item_id = id.to_string();
        OutboundMessage::Result(record)
    }

    fn result_id(message: &OutboundMessage) -> &str {
        match message {
            OutboundMessage::Result(record) => &record.item_id,
            _ => "",
        }
    }

    #[test]
    fn fifo_order_within_capacity() {
        let mut buffer = OutboundBuffer::new(4);
        for id in ["a", "b", "c"] {
            assert_eq!(buffer.push(result(id)), BufferPush::Buffered);
        }
        let order: Vec<_> = std::iter::from_fn(|| buffer.pop_front())
            .map(|m| result_id(&m).to_string())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn heartbeat_and_status_go_before_results_and_alerts() {
        let mut buffer = OutboundBuffer::new(4);
        buffer.push(result("r1"));
        buffer.push(OutboundMessage::heartbeat());
        buffer.push(OutboundMessage::alert("capture", AlertLevel::Error, "x"));
        buffer.push(OutboundMessage::status("c", "online"));

        match buffer.push(result("r2")) {
            BufferPush::Evicted(OutboundMessage::Heartbeat { .. }) => {}
            other => panic!("expected heartbeat eviction, got {:?}", other),
        }
        match buffer.push(result("r3")) {
            BufferPush::Evicted(OutboundMessage::Status { .. }) => {}
            other => panic!("expected status eviction, got {:?}", other),
        }
        assert!(buffer.iter().all(|m| m.is_protected()));
        assert_eq!(buffer.evicted_count(), 2);
    }

    #[test]
    fn unprotected_message_rejected_when_only_protected_remain() {
        let mut buffer = OutboundBuffer::new(2);
        buffer.push(result("r1"));
        buffer.push(result("r2"));

        assert!(matches!(
            buffer.push(OutboundMessage::heartbeat()),
            BufferPush::Rejected(_)
        ));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn oldest_protected_goes_last_resort() {
        let mut buffer = OutboundBuffer::new(2);
        buffer.push(result("r1"));
        buffer.push(result("r2"));

        match buffer.push(result("r3")) {
            BufferPush::Evicted(victim) => assert_eq!(result_id(&victim), "r1"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn push_front_restores_head() {
        let mut buffer = OutboundBuffer::new(3);
        buffer.push(result("r1"));
        buffer.push(result("r2"));
        let head = buffer.pop_front().unwrap();

        assert!(buffer.push_front(head).is_none());
        assert_eq!(result_id(buffer.front().unwrap()), "r1");
    }
}
