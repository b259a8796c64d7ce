// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! MQTT bus over `rumqttc`
//!
//! Each successful `connect` owns a fresh client and a dedicated event thread
//! driving the rumqttc connection. The thread forwards the packets we care
//! about over a channel and exits on the first connection error, so retry
//! timing stays with the link state machine instead of rumqttc's own
//! immediate reconnect loop.
//!
//! rumqttc refuses outgoing packets above its configured limit (10 KiB by
//! default), so the limit is raised to fit the largest inline image. A packet
//! that is still too large surfaces as [`TransportError::PayloadTooLarge`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use rumqttc::{
    Client, ConnectReturnCode, ConnectionError, Event, MqttOptions, Outgoing, Packet, StateError,
};
use tracing::{debug, info, warn};

use crate::bus::{Ack, BusEvent, MessageBus, QoS};
use crate::common::{TransportError, TransportResult};
use crate::encoding::{EncodingPolicy, DEFAULT_INLINE_THRESHOLD};

/// rumqttc rejects shorter keep-alive intervals
const MIN_KEEPALIVE: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 64;
/// rumqttc's own default; never go below it
const MIN_PACKET_SIZE: usize = 10 * 1024;

#[derive(Debug, Clone)]
pub struct MqttBusConfig {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keepalive: Duration,
    /// Largest packet sent or accepted, in bytes
    pub max_packet_size: usize,
}

impl MqttBusConfig {
    /// Packet limit large enough for an inline image of `inline_threshold` bytes
    pub fn packet_size_for_inline(inline_threshold: usize) -> usize {
        EncodingPolicy::new(inline_threshold)
            .max_envelope_bytes()
            .max(MIN_PACKET_SIZE)
    }
}

impl Default for MqttBusConfig {
    fn default() -> Self {
        Self {
            client_id: "pi_sorter".to_string(),
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            keepalive: Duration::from_secs(60),
            max_packet_size: Self::packet_size_for_inline(DEFAULT_INLINE_THRESHOLD),
        }
    }
}

#[derive(Debug)]
enum Signal {
    ConnAck(ConnectReturnCode),
    OutgoingPublish(u16),
    PubAck(u16),
    Message { topic: String, payload: Vec<u8> },
    TooLarge { size: usize, max: usize },
    Error(String),
}

struct Session {
    client: Client,
    signals: Receiver<Signal>,
    stop: Arc<AtomicBool>,
}

impl Session {
    fn close(self) {
        self.stop.store(true, Ordering::Release);
        if let Err(e) = self.client.disconnect() {
            debug!("[LINK] disconnect request not delivered: {}", e);
        }
    }
}

pub struct MqttBus {
    config: MqttBusConfig,
    session: Option<Session>,
    subscriptions: Vec<(String, QoS)>,
    pending: VecDeque<BusEvent>,
    connected: bool,
}

impl MqttBus {
    pub fn new(config: MqttBusConfig) -> Self {
        Self {
            config,
            session: None,
            subscriptions: Vec::new(),
            pending: VecDeque::new(),
            connected: false,
        }
    }

    pub fn config(&self) -> &MqttBusConfig {
        &self.config
    }

    fn options(&self) -> MqttOptions {
        let mut options =
            MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keepalive.max(MIN_KEEPALIVE));
        options.set_clean_session(true);
        let limit = self.config.max_packet_size.max(MIN_PACKET_SIZE);
        options.set_max_packet_size(limit, limit);
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        options
    }

    fn drop_session(&mut self) {
        self.connected = false;
        if let Some(session) = self.session.take() {
            session.close();
        }
    }

    /// Route a signal that is not the one a caller is waiting for
    fn stash(&mut self, signal: Signal) {
        match signal {
            Signal::Message { topic, payload } => {
                self.pending.push_back(BusEvent::Command { topic, payload })
            }
            Signal::TooLarge { size, max } => {
                if self.connected {
                    self.connected = false;
                    self.pending.push_back(BusEvent::Disconnected(format!(
                        "{} byte packet over the {} byte limit",
                        size, max
                    )));
                }
            }
            Signal::Error(reason) => {
                if self.connected {
                    self.connected = false;
                    self.pending.push_back(BusEvent::Disconnected(reason));
                }
            }
            _ => {}
        }
    }
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
    }
}

fn spawn_event_thread(
    mut connection: rumqttc::Connection,
    signals: Sender<Signal>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<()> {
    thread::Builder::new()
        .name("sorter-mqtt-events".to_string())
        .spawn(move || {
            for notification in connection.iter() {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                let signal = match notification {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => Signal::ConnAck(ack.code),
                    Ok(Event::Incoming(Packet::PubAck(ack))) => Signal::PubAck(ack.pkid),
                    Ok(Event::Incoming(Packet::Publish(publish))) => Signal::Message {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    },
                    Ok(Event::Outgoing(Outgoing::Publish(pkid))) => Signal::OutgoingPublish(pkid),
                    Ok(_) => continue,
                    Err(ConnectionError::MqttState(StateError::OutgoingPacketTooLarge {
                        pkt_size,
                        max,
                    })) => {
                        let _ = signals.send(Signal::TooLarge {
                            size: pkt_size,
                            max,
                        });
                        break;
                    }
                    Err(e) => {
                        let _ = signals.send(Signal::Error(e.to_string()));
                        break;
                    }
                };
                if signals.send(signal).is_err() {
                    break;
                }
            }
            debug!("[LINK] mqtt event thread exiting");
        })
        .map(|_| ())
}

impl MessageBus for MqttBus {
    fn connect(&mut self, timeout: Duration) -> TransportResult<()> {
        self.drop_session();

        let (client, connection) = Client::new(self.options(), REQUEST_CAPACITY);
        let (tx, rx) = channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        spawn_event_thread(connection, tx, Arc::clone(&stop))?;
        let session = Session {
            client,
            signals: rx,
            stop,
        };

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match session.signals.recv_timeout(remaining) {
                Ok(Signal::ConnAck(ConnectReturnCode::Success)) => break,
                Ok(Signal::ConnAck(code)) => {
                    session.close();
                    return Err(TransportError::ConnectFailed(format!(
                        "broker refused connection: {:?}",
                        code
                    )));
                }
                Ok(Signal::Error(reason)) => {
                    session.close();
                    return Err(TransportError::ConnectFailed(reason));
                }
                Ok(other) => debug!("[LINK] ignoring {:?} before CONNACK", other),
                Err(RecvTimeoutError::Timeout) => {
                    session.close();
                    return Err(TransportError::Timeout);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    session.close();
                    return Err(TransportError::ConnectionClosed);
                }
            }
        }

        for (topic, qos) in &self.subscriptions {
            if let Err(e) = session.client.subscribe(topic.as_str(), to_mqtt_qos(*qos)) {
                warn!("[LINK] failed to resubscribe to {}: {}", topic, e);
            }
        }

        info!(
            "[LINK] connected to mqtt://{}:{} as {}",
            self.config.host, self.config.port, self.config.client_id
        );
        self.session = Some(session);
        self.connected = true;
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> TransportResult<()> {
        if !self.subscriptions.iter().any(|(t, _)| t == topic) {
            self.subscriptions.push((topic.to_string(), qos));
        }
        if let Some(session) = &self.session {
            session
                .client
                .subscribe(topic, to_mqtt_qos(qos))
                .map_err(|e| TransportError::PublishFailed(e.to_string()))?;
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
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let Some(session) = &self.session else {
            return Err(TransportError::NotConnected);
        };

        session
            .client
            .publish(topic, to_mqtt_qos(qos), false, payload.to_vec())
            .map_err(|e| TransportError::PublishFailed(e.to_string()))?;

        // One publish in flight at a time, so the next outgoing packet id is ours
        let signals = session.signals.clone();
        let deadline = Instant::now() + timeout;
        let mut packet_id: Option<u16> = None;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match signals.recv_timeout(remaining) {
                Ok(Signal::OutgoingPublish(pkid)) if packet_id.is_none() => {
                    if qos == QoS::AtMostOnce {
                        return Ok(Ack { packet_id: pkid });
                    }
                    packet_id = Some(pkid);
                }
                Ok(Signal::PubAck(pkid)) if Some(pkid) == packet_id => {
                    return Ok(Ack { packet_id: pkid });
                }
                Ok(Signal::Error(reason)) => {
                    // reported through the returned error, not as an event
                    self.connected = false;
                    return Err(TransportError::PublishFailed(reason));
                }
                Ok(Signal::TooLarge { size, max }) => {
                    // the event loop is gone; the caller drops the message and reconnects
                    self.connected = false;
                    return Err(TransportError::PayloadTooLarge { size, max });
                }
                Ok(other) => self.stash(other),
                Err(RecvTimeoutError::Timeout) => return Err(TransportError::Timeout),
                Err(RecvTimeoutError::Disconnected) => {
                    self.connected = false;
                    return Err(TransportError::ConnectionClosed);
                }
            }
        }
    }

    fn poll_event(&mut self) -> Option<BusEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        loop {
            let signal = match &self.session {
                Some(session) => session.signals.try_recv(),
                None => return None,
            };
            match signal {
                Ok(signal) => {
                    self.stash(signal);
                    if let Some(event) = self.pending.pop_front() {
                        return Some(event);
                    }
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    if self.connected {
                        self.connected = false;
                        return Some(BusEvent::Disconnected(
                            "mqtt event loop stopped".to_string(),
                        ));
                    }
                    return None;
                }
            }
        }
    }

    fn disconnect(&mut self) -> TransportResult<()> {
        self.drop_session();
        self.pending.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn name(&self) -> &str {
        "mqtt"
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        self.drop_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_before_connect_is_refused() {
        let mut bus = MqttBus::new(MqttBusConfig::default());
        assert!(matches!(
            bus.publish("t", b"x", QoS::AtLeastOnce, Duration::from_millis(10)),
            Err(TransportError::NotConnected)
        ));
        assert!(bus.poll_event().is_none());
    }

    #[test]
    fn subscriptions_are_remembered_before_connect() {
        let mut bus = MqttBus::new(MqttBusConfig::default());
        bus.subscribe("pi_sorter/commands", QoS::AtLeastOnce).unwrap();
        bus.subscribe("pi_sorter/commands", QoS::AtLeastOnce).unwrap();
        assert_eq!(bus.subscriptions.len(), 1);
    }

    #[test]
    fn keepalive_is_clamped() {
        let bus = MqttBus::new(MqttBusConfig {
            keepalive: Duration::from_secs(1),
            ..MqttBusConfig::default()
        });
        assert_eq!(bus.options().keep_alive(), MIN_KEEPALIVE);
    }

    #[test]
    fn packet_limit_fits_a_maximal_inline_image() {
        use crate::encoding::FsImageStore;
        use crate::publisher::Topics;

        for threshold in [7_500, 48_000, DEFAULT_INLINE_THRESHOLD] {
            let bus = MqttBus::new(MqttBusConfig {
                max_packet_size: MqttBusConfig::packet_size_for_inline(threshold),
                ..MqttBusConfig::default()
            });
            let message = EncodingPolicy::new(threshold)
                .encode_image(
                    "item_000001_20250101_120000.jpg",
                    &vec![0xD8; threshold],
                    &FsImageStore::new("unused"),
                )
                .unwrap();
            let payload = message.to_payload().unwrap().len();
            // fixed header (<= 5) + topic length prefix + topic + packet id
            let packet = 5 + 2 + Topics::default().images.len() + 2 + payload;
            assert!(
                bus.options().max_packet_size() >= packet,
                "threshold {}: limit {} < packet {}",
                threshold,
                bus.options().max_packet_size(),
                packet
            );
        }
    }

    #[test]
    fn default_packet_limit_is_above_rumqttc_default() {
        let bus = MqttBus::new(MqttBusConfig::default());
        assert!(bus.options().max_packet_size() > 512_000);

        let tiny = MqttBus::new(MqttBusConfig {
            max_packet_size: 100,
            ..MqttBusConfig::default()
        });
        assert_eq!(tiny.options().max_packet_size(), MIN_PACKET_SIZE);
    }
}
