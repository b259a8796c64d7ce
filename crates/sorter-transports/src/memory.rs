// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-process message bus
//!
//! Used by the simulator and by tests. A cloned [`BusProbe`] shares state
//! with the bus and can take the "broker" offline, inject inbound commands
//! and inspect everything that was acknowledged.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::bus::{Ack, BusEvent, MessageBus, QoS};
use crate::common::{TransportError, TransportResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

#[derive(Debug)]
struct BusShared {
    online: bool,
    connected: bool,
    published: Vec<PublishedMessage>,
    events: VecDeque<BusEvent>,
    subscriptions: Vec<String>,
    connect_attempts: u32,
    next_packet_id: u16,
    max_packet_size: Option<usize>,
    publish_timeouts: Vec<Duration>,
}

#[derive(Debug, Clone)]
pub struct BusProbe {
    shared: Arc<Mutex<BusShared>>,
}

impl BusProbe {
    /// Taking the broker offline drops a live connection
    pub fn set_online(&self, online: bool) {
        let mut shared = self.shared.lock();
        shared.online = online;
        if !online && shared.connected {
            shared.connected = false;
            shared
                .events
                .push_back(BusEvent::Disconnected("broker went offline".to_string()));
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.shared.lock().published.clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.shared
            .lock()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Parsed JSON payloads published on `topic`, skipping non-JSON
    pub fn json_on(&self, topic: &str) -> Vec<serde_json::Value> {
        self.published_on(topic)
            .iter()
            .filter_map(|p| serde_json::from_slice(p).ok())
            .collect()
    }

    pub fn inject_command(&self, topic: &str, payload: &[u8]) {
        self.shared.lock().events.push_back(BusEvent::Command {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
    }

    pub fn connect_attempts(&self) -> u32 {
        self.shared.lock().connect_attempts
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.shared.lock().subscriptions.clone()
    }

    /// Refuse larger payloads and drop the session, as an MQTT client does
    pub fn set_max_packet_size(&self, limit: Option<usize>) {
        self.shared.lock().max_packet_size = limit;
    }

    /// Timeout passed to every publish call, in order
    pub fn publish_timeouts(&self) -> Vec<Duration> {
        self.shared.lock().publish_timeouts.clone()
    }
}

#[derive(Debug)]
pub struct InMemoryBus {
    shared: Arc<Mutex<BusShared>>,
}

impl InMemoryBus {
    /// A bus whose broker is online
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(BusShared {
                online: true,
                connected: false,
                published: Vec::new(),
                events: VecDeque::new(),
                subscriptions: Vec::new(),
                connect_attempts: 0,
                next_packet_id: 1,
                max_packet_size: None,
                publish_timeouts: Vec::new(),
            })),
        }
    }

    pub fn probe(&self) -> BusProbe {
        BusProbe {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for InMemoryBus {
    fn connect(&mut self, _timeout: Duration) -> TransportResult<()> {
        let mut shared = self.shared.lock();
        shared.connect_attempts += 1;
        if !shared.online {
            return Err(TransportError::ConnectFailed(
                "broker unreachable".to_string(),
            ));
        }
        shared.connected = true;
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, _qos: QoS) -> TransportResult<()> {
        let mut shared = self.shared.lock();
        if !shared.subscriptions.iter().any(|t| t == topic) {
            shared.subscriptions.push(topic.to_string());
        }
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        timeout: Duration,
    ) -> TransportResult<Ack> {
        let mut shared = self.shared.lock();
        shared.publish_timeouts.push(timeout);
        if !shared.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(max) = shared.max_packet_size.filter(|max| payload.len() > *max) {
            shared.connected = false;
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }
        if !shared.online {
            shared.connected = false;
            return Err(TransportError::ConnectionClosed);
        }

        shared.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
        });
        let packet_id = shared.next_packet_id;
        shared.next_packet_id = shared.next_packet_id.wrapping_add(1).max(1);
        Ok(Ack { packet_id })
    }

    fn poll_event(&mut self) -> Option<BusEvent> {
        self.shared.lock().events.pop_front()
    }

    fn disconnect(&mut self) -> TransportResult<()> {
        self.shared.lock().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    fn name(&self) -> &str {
        "memory"
    }
}
