// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Message-bus capability
//!
//! Implemented by the MQTT client and by [`crate::memory::InMemoryBus`].
//! A bus is owned exclusively by one publish pipeline and driven from a
//! single thread, so the trait needs `Send` but not `Sync`.

use std::time::Duration;

use crate::common::TransportResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
}

/// Broker acknowledgement of a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub packet_id: u16,
}

/// Asynchronous notifications collected by [`MessageBus::poll_event`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Disconnected(String),
    /// Inbound message on a subscribed topic
    Command { topic: String, payload: Vec<u8> },
}

pub trait MessageBus: Send {
    /// Connect (or reconnect) within `timeout`, re-establishing subscriptions
    fn connect(&mut self, timeout: Duration) -> TransportResult<()>;

    /// Remembered across reconnects
    fn subscribe(&mut self, topic: &str, qos: QoS) -> TransportResult<()>;

    /// Publish and wait for the broker acknowledgement
    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        timeout: Duration,
    ) -> TransportResult<Ack>;

    /// Non-blocking
    fn poll_event(&mut self) -> Option<BusEvent>;

    fn disconnect(&mut self) -> TransportResult<()>;

    fn is_connected(&self) -> bool;

    fn name(&self) -> &str;
}

impl<B: MessageBus + ?Sized> MessageBus for Box<B> {
    fn connect(&mut self, timeout: Duration) -> TransportResult<()> {
        (**self).connect(timeout)
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> TransportResult<()> {
        (**self).subscribe(topic, qos)
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        timeout: Duration,
    ) -> TransportResult<Ack> {
        (**self).publish(topic, payload, qos, timeout)
    }

    fn poll_event(&mut self) -> Option<BusEvent> {
        (**self).poll_event()
    }

    fn disconnect(&mut self) -> TransportResult<()> {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
