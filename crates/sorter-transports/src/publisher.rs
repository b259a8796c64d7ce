// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Publish pipeline
//!
//! [`PublishPipeline`] owns the bus, the outbound buffer and the link state
//! machine. Every message goes through the buffer, so order is preserved
//! across disconnects; while the link is up the buffer is flushed
//! immediately. The pipeline is single-threaded and clock-driven: tests call
//! [`PublishPipeline::tick`] with a manual clock, production wraps it in a
//! [`PublisherService`] thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use sorter_hal::TimeProvider;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::{BufferPush, OutboundBuffer};
use crate::bus::{BusEvent, MessageBus, QoS};
use crate::common::{NowMs, TransportError, TransportResult};
use crate::connection::{ConnectionState, ConnectionStateMachine, LinkAction, LinkEvent};
use crate::control::{parse_command, topic_matches, ControlCommand};
use crate::envelope::{OutboundMessage, TopicFamily};
use crate::reconnect::ReconnectionStrategy;

/// Fixed topic per envelope family, plus the inbound command filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub images: String,
    pub status: String,
    pub results: String,
    pub alerts: String,
    pub heartbeat: String,
    pub commands: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            images: "pi_sorter/images".to_string(),
            status: "pi_sorter/status".to_string(),
            results: "pi_sorter/results".to_string(),
            alerts: "pi_sorter/alerts".to_string(),
            heartbeat: "pi_sorter/heartbeat".to_string(),
            commands: "pi_sorter/commands".to_string(),
        }
    }
}

impl Topics {
    pub fn for_family(&self, family: TopicFamily) -> &str {
        match family {
            TopicFamily::Images => &self.images,
            TopicFamily::Status => &self.status,
            TopicFamily::Results => &self.results,
            TopicFamily::Alerts => &self.alerts,
            TopicFamily::Heartbeat => &self.heartbeat,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub client_id: String,
    pub buffer_capacity: usize,
    /// Zero disables heartbeats
    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub max_reconnect_attempts: u32,
    pub qos: QoS,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            client_id: "pi_sorter".to_string(),
            buffer_capacity: 1000,
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(5),
            reconnect_base_ms: 1000,
            reconnect_max_ms: 60_000,
            max_reconnect_attempts: 10,
            qos: QoS::AtLeastOnce,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishStats {
    pub messages_sent: u64,
    /// Currently waiting in the buffer
    pub messages_buffered: u64,
    pub messages_evicted: u64,
    pub messages_dropped: u64,
    pub connection_attempts: u64,
    pub disconnections: u64,
    pub reconnects: u64,
    pub commands_received: u64,
    pub commands_rejected: u64,
}

pub struct PublishPipeline<B: MessageBus> {
    bus: B,
    topics: Topics,
    settings: PublisherSettings,
    buffer: OutboundBuffer,
    link: ConnectionStateMachine,
    clock: Arc<dyn TimeProvider>,
    stats: PublishStats,
    last_heartbeat_ms: Option<NowMs>,
    fatal_reason: Option<String>,
}

impl<B: MessageBus> PublishPipeline<B> {
    pub fn new(
        bus: B,
        topics: Topics,
        settings: PublisherSettings,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        let strategy = ReconnectionStrategy::new(
            settings.reconnect_base_ms,
            settings.reconnect_max_ms,
            settings.max_reconnect_attempts,
        );
        Self {
            bus,
            buffer: OutboundBuffer::new(settings.buffer_capacity),
            link: ConnectionStateMachine::new(strategy),
            topics,
            settings,
            clock,
            stats: PublishStats::default(),
            last_heartbeat_ms: None,
            fatal_reason: None,
        }
    }

    fn now(&self) -> NowMs {
        self.clock.get_time_ms()
    }

    /// First connection attempt
    pub fn start(&mut self) {
        let actions = self.link.start(self.now());
        self.run(actions);
    }

    /// Queue a message; sent immediately while the link is up
    pub fn submit(&mut self, message: OutboundMessage) {
        self.enqueue(message);
        if self.link.is_connected() {
            let actions = self.flush(None);
            self.run(actions);
        }
    }

    /// Drive inbound events, retry timers, heartbeats and pending sends
    pub fn tick(&mut self) -> Vec<ControlCommand> {
        let mut commands = Vec::new();

        while let Some(event) = self.bus.poll_event() {
            match event {
                BusEvent::Disconnected(reason) => {
                    let actions = self.link.handle(self.now(), LinkEvent::ConnectionLost(reason));
                    self.run(actions);
                }
                BusEvent::Command { topic, payload } => {
                    if !topic_matches(&self.topics.commands, &topic) {
                        debug!("[PUBLISH] no handler for inbound topic {}", topic);
                        continue;
                    }
                    match parse_command(&payload) {
                        Ok(command) => {
                            self.stats.commands_received += 1;
                            info!("[PUBLISH] control command {:?}", command);
                            commands.push(command);
                        }
                        Err(e) => {
                            self.stats.commands_rejected += 1;
                            warn!("[PUBLISH] ignoring command on {}: {}", topic, e);
                        }
                    }
                }
            }
        }

        if let Some(action) = self.link.poll_timer(self.now()) {
            self.run(vec![action]);
        }

        if self.link.is_connected() {
            let now = self.now();
            if self.heartbeat_due(now) {
                self.last_heartbeat_ms = Some(now);
                self.enqueue(OutboundMessage::heartbeat());
            }
            if !self.buffer.is_empty() {
                let actions = self.flush(None);
                self.run(actions);
            }
        }

        commands
    }

    /// Send the final status best-effort, drain what fits in `grace`, close
    pub fn shutdown(
        &mut self,
        final_status: Option<OutboundMessage>,
        grace: Duration,
    ) -> PublishStats {
        let deadline = self.now() + grace.as_millis() as u64;
        if let Some(status) = final_status {
            self.enqueue(status);
        }

        if self.link.state() == ConnectionState::Reconnecting {
            // one last try for the backlog
            self.run(vec![LinkAction::AttemptConnect]);
        }
        if self.link.is_connected() {
            let actions = self.flush(Some(deadline));
            if !actions.is_empty() {
                debug!("[PUBLISH] link lost during shutdown drain");
            }
        }

        let abandoned = self.buffer.len() as u64;
        if abandoned > 0 {
            warn!(
                "[PUBLISH] shutting down with {} undelivered message(s)",
                abandoned
            );
            self.stats.messages_dropped += abandoned;
            while self.buffer.pop_front().is_some() {}
        }

        if let Err(e) = self.bus.disconnect() {
            warn!("[PUBLISH] disconnect failed: {}", e);
        }
        self.link.shutdown();
        info!("[PUBLISH] closed {} bus", self.bus.name());
        self.stats()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn is_fatal(&self) -> bool {
        self.link.is_fatal()
    }

    pub fn fatal_reason(&self) -> Option<&str> {
        self.fatal_reason.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn stats(&self) -> PublishStats {
        PublishStats {
            messages_buffered: self.buffer.len() as u64,
            disconnections: self.link.disconnections(),
            reconnects: self.link.reconnects(),
            ..self.stats.clone()
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    fn heartbeat_due(&self, now: NowMs) -> bool {
        let interval = self.settings.heartbeat_interval.as_millis() as u64;
        if interval == 0 {
            return false;
        }
        match self.last_heartbeat_ms {
            None => true,
            Some(last) => now.saturating_sub(last) >= interval,
        }
    }

    fn enqueue(&mut self, message: OutboundMessage) {
        match self.buffer.push(message) {
            BufferPush::Buffered => {}
            BufferPush::Evicted(victim) => {
                self.stats.messages_evicted += 1;
                warn!(
                    "[PUBLISH] buffer full ({}), evicted oldest {}",
                    self.buffer.capacity(),
                    victim.kind()
                );
            }
            BufferPush::Rejected(message) => {
                self.stats.messages_evicted += 1;
                warn!(
                    "[PUBLISH] buffer full of results/alerts, dropped {}",
                    message.kind()
                );
            }
        }
    }

    fn run(&mut self, actions: Vec<LinkAction>) {
        let mut work: std::collections::VecDeque<LinkAction> = actions.into();
        while let Some(action) = work.pop_front() {
            match action {
                LinkAction::AttemptConnect => {
                    self.stats.connection_attempts += 1;
                    let event = match self.bus.connect(self.settings.connect_timeout) {
                        Ok(()) => {
                            if let Err(e) =
                                self.bus.subscribe(&self.topics.commands, self.settings.qos)
                            {
                                warn!(
                                    "[PUBLISH] subscribe to {} failed: {}",
                                    self.topics.commands, e
                                );
                            }
                            LinkEvent::ConnectSucceeded
                        }
                        Err(e) => LinkEvent::ConnectFailed(e.to_string()),
                    };
                    work.extend(self.link.handle(self.now(), event));
                }
                LinkAction::FlushBuffer => {
                    if !self.buffer.is_empty() {
                        info!("[PUBLISH] flushing {} buffered message(s)", self.buffer.len());
                    }
                    work.extend(self.flush(None));
                }
                LinkAction::ReportFatal { attempts, reason } => {
                    error!(
                        "[PUBLISH] link is down for good after {} attempt(s): {}",
                        attempts, reason
                    );
                    self.fatal_reason = Some(reason);
                }
            }
        }
    }

    /// Send buffered messages in order until empty, the link drops or `deadline`
    ///
    /// With a deadline, no single publish may wait past it.
    fn flush(&mut self, deadline: Option<NowMs>) -> Vec<LinkAction> {
        while self.link.is_connected() {
            let publish_timeout = match deadline {
                Some(d) => {
                    let left = d.saturating_sub(self.now());
                    if left == 0 {
                        break;
                    }
                    self.settings.publish_timeout.min(Duration::from_millis(left))
                }
                None => self.settings.publish_timeout,
            };
            let Some(message) = self.buffer.pop_front() else {
                break;
            };

            let payload = match message.to_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    self.stats.messages_dropped += 1;
                    warn!("[PUBLISH] could not encode {}: {}", message.kind(), e);
                    continue;
                }
            };

            let topic = self.topics.for_family(message.family());
            match self
                .bus
                .publish(topic, &payload, self.settings.qos, publish_timeout)
            {
                Ok(ack) => {
                    self.stats.messages_sent += 1;
                    trace!(
                        "[PUBLISH] {} -> {} ({} bytes, packet {})",
                        message.kind(),
                        topic,
                        payload.len(),
                        ack.packet_id
                    );
                }
                Err(e) if e.is_retryable() => {
                    warn!("[PUBLISH] {} not delivered: {}", message.kind(), e);
                    if let Some(victim) = self.buffer.push_front(message) {
                        self.stats.messages_evicted += 1;
                        warn!("[PUBLISH] buffer full on requeue, evicted {}", victim.kind());
                    }
                    return self
                        .link
                        .handle(self.now(), LinkEvent::ConnectionLost(e.to_string()));
                }
                Err(e) => {
                    self.stats.messages_dropped += 1;
                    error!("[PUBLISH] dropping {}: {}", message.kind(), e);
                    // some buses lose the session along with the message
                    if !self.bus.is_connected() {
                        return self
                            .link
                            .handle(self.now(), LinkEvent::ConnectionLost(e.to_string()));
                    }
                }
            }
        }
        Vec::new()
    }
}

/// Requests to the network thread
#[derive(Debug)]
pub enum PublisherCommand {
    Publish(OutboundMessage),
    Shutdown {
        final_status: Option<OutboundMessage>,
        grace: Duration,
    },
}

#[derive(Debug)]
struct LinkShared {
    connected: AtomicBool,
    fatal: AtomicBool,
    fatal_reason: Mutex<Option<String>>,
    state: Mutex<ConnectionState>,
    stats: Mutex<PublishStats>,
}

impl LinkShared {
    fn sync<B: MessageBus>(&self, pipeline: &PublishPipeline<B>) {
        self.connected
            .store(pipeline.is_connected(), Ordering::Release);
        self.fatal.store(pipeline.is_fatal(), Ordering::Release);
        *self.state.lock() = pipeline.state();
        *self.stats.lock() = pipeline.stats();
        if let Some(reason) = pipeline.fatal_reason() {
            let mut slot = self.fatal_reason.lock();
            if slot.is_none() {
                *slot = Some(reason.to_string());
            }
        }
    }
}

/// Cheap handle for submitting messages from other threads
#[derive(Debug, Clone)]
pub struct PublisherHandle {
    tx: Sender<PublisherCommand>,
    shared: Arc<LinkShared>,
}

impl PublisherHandle {
    pub fn publish(&self, message: OutboundMessage) -> TransportResult<()> {
        self.tx
            .send(PublisherCommand::Publish(message))
            .map_err(|_| TransportError::ServiceStopped)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn is_fatal(&self) -> bool {
        self.shared.fatal.load(Ordering::Acquire)
    }

    pub fn fatal_reason(&self) -> Option<String> {
        self.shared.fatal_reason.lock().clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    pub fn stats(&self) -> PublishStats {
        self.shared.stats.lock().clone()
    }
}

/// The network context: a thread that exclusively owns the pipeline
pub struct PublisherService {
    handle: PublisherHandle,
    control_rx: Receiver<ControlCommand>,
    thread: Option<JoinHandle<PublishStats>>,
}

impl PublisherService {
    pub fn spawn<B>(mut pipeline: PublishPipeline<B>, tick_interval: Duration) -> TransportResult<Self>
    where
        B: MessageBus + 'static,
    {
        let (tx, rx) = channel::unbounded::<PublisherCommand>();
        let (control_tx, control_rx) = channel::unbounded::<ControlCommand>();
        let shared = Arc::new(LinkShared {
            connected: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
            fatal_reason: Mutex::new(None),
            state: Mutex::new(pipeline.state()),
            stats: Mutex::new(PublishStats::default()),
        });
        let thread_shared = Arc::clone(&shared);
        let tick_interval = tick_interval.max(Duration::from_millis(1));

        let thread = thread::Builder::new()
            .name("sorter-publisher".to_string())
            .spawn(move || {
                pipeline.start();
                thread_shared.sync(&pipeline);

                loop {
                    match rx.recv_timeout(tick_interval) {
                        Ok(PublisherCommand::Publish(message)) => pipeline.submit(message),
                        Ok(PublisherCommand::Shutdown {
                            final_status,
                            grace,
                        }) => {
                            let stats = pipeline.shutdown(final_status, grace);
                            thread_shared.sync(&pipeline);
                            return stats;
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => {
                            let stats = pipeline.shutdown(None, Duration::ZERO);
                            thread_shared.sync(&pipeline);
                            return stats;
                        }
                    }

                    for command in pipeline.tick() {
                        if control_tx.send(command).is_err() {
                            debug!("[PUBLISH] no listener for control commands");
                        }
                    }
                    thread_shared.sync(&pipeline);
                }
            })?;

        Ok(Self {
            handle: PublisherHandle { tx, shared },
            control_rx,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> PublisherHandle {
        self.handle.clone()
    }

    /// Inbound commands parsed by the network thread
    pub fn control_commands(&self) -> Receiver<ControlCommand> {
        self.control_rx.clone()
    }

    /// Blocks until the network thread has drained and disconnected
    pub fn shutdown(mut self, final_status: Option<OutboundMessage>, grace: Duration) -> PublishStats {
        self.stop(final_status, grace)
    }

    fn stop(&mut self, final_status: Option<OutboundMessage>, grace: Duration) -> PublishStats {
        let Some(thread) = self.thread.take() else {
            return self.handle.stats();
        };
        if self
            .handle
            .tx
            .send(PublisherCommand::Shutdown {
                final_status,
                grace,
            })
            .is_err()
        {
            debug!("[PUBLISH] network thread already gone");
        }
        match thread.join() {
            Ok(stats) => stats,
            Err(_) => {
                error!("[PUBLISH] network thread panicked");
                self.handle.stats()
            }
        }
    }
}

impl Drop for PublisherService {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop(None, Duration::ZERO);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::AlertLevel;
    use crate::memory::{BusProbe, InMemoryBus};
    use sorter_hal::{Grade, GradeRecord, ManualClock};

    fn pipeline(capacity: usize) -> (PublishPipeline<InMemoryBus>, BusProbe, ManualClock) {
        let bus = InMemoryBus::new();
        let probe = bus.probe();
        let clock = ManualClock::new();
        let settings = PublisherSettings {
            buffer_capacity: capacity,
            heartbeat_interval: Duration::ZERO,
            reconnect_base_ms: 100,
            reconnect_max_ms: 1000,
            max_reconnect_attempts: 3,
            ..PublisherSettings::default()
        };
        let pipeline =
            PublishPipeline::new(bus, Topics::default(), settings, Arc::new(clock.clone()));
        (pipeline, probe, clock)
    }

    fn result(id: &str) -> OutboundMessage {
        let mut record = GradeRecord::new(Grade::A, 190.0, 14.0);
        record.item_id = id.to_string();
        OutboundMessage::Result(record)
    }

    fn result_ids(probe: &BusProbe) -> Vec<String> {
        probe
            .json_on("pi_sorter/results")
            .iter()
            .map(|v| v["item_id"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn connected_pipeline_sends_immediately() {
        let (mut pipeline, probe, _clock) = pipeline(10);
        pipeline.start();
        assert!(pipeline.is_connected());
        assert_eq!(probe.subscriptions(), vec!["pi_sorter/commands".to_string()]);

        pipeline.submit(result("r1"));
        assert_eq!(result_ids(&probe), vec!["r1"]);
        assert_eq!(pipeline.stats().messages_sent, 1);
    }

    #[test]
    fn offline_results_are_flushed_in_order_after_reconnect() {
        let (mut pipeline, probe, clock) = pipeline(10);
        pipeline.start();

        probe.set_online(false);
        pipeline.tick();
        assert_eq!(pipeline.state(), ConnectionState::Reconnecting);

        for id in ["r1", "r2", "r3"] {
            pipeline.submit(result(id));
        }
        assert_eq!(pipeline.buffered(), 3);

        // first retry fails while the broker is still down
        clock.advance_ms(100);
        pipeline.tick();
        assert_eq!(pipeline.state(), ConnectionState::Reconnecting);

        probe.set_online(true);
        clock.advance_ms(200);
        pipeline.tick();

        assert!(pipeline.is_connected());
        assert_eq!(result_ids(&probe), vec!["r1", "r2", "r3"]);
        let stats = pipeline.stats();
        assert_eq!(stats.reconnects, 1);
        assert_eq!(stats.disconnections, 1);
        assert_eq!(stats.messages_buffered, 0);
    }

    #[test]
    fn full_buffer_evicts_status_before_results() {
        let (mut pipeline, probe, _clock) = pipeline(3);
        probe.set_online(false);
        pipeline.start();

        pipeline.submit(OutboundMessage::status("pi_sorter", "online"));
        pipeline.submit(result("r1"));
        pipeline.submit(OutboundMessage::alert("capture", AlertLevel::Error, "x"));
        pipeline.submit(result("r2"));

        assert_eq!(pipeline.buffered(), 3);
        assert_eq!(pipeline.stats().messages_evicted, 1);
        assert!(pipeline.buffer.iter().all(|m| m.is_protected()));
    }

    #[test]
    fn exhausted_reconnects_become_fatal() {
        let (mut pipeline, probe, clock) = pipeline(10);
        probe.set_online(false);
        pipeline.start();

        for _ in 0..10 {
            clock.advance_ms(1000);
            pipeline.tick();
        }

        assert!(pipeline.is_fatal());
        assert!(pipeline.fatal_reason().is_some());
        assert_eq!(probe.connect_attempts(), 4);
    }

    #[test]
    fn oversized_message_is_dropped_without_blocking_the_queue() {
        let (mut pipeline, probe, clock) = pipeline(10);
        probe.set_max_packet_size(Some(1024));
        pipeline.start();

        probe.set_online(false);
        pipeline.tick();
        pipeline.submit(result("r1"));
        pipeline.submit(OutboundMessage::ImageInline {
            filename: "big.jpg".to_string(),
            size_bytes: 4096,
            content: "A".repeat(4096),
            timestamp: "2025-01-01T00:00:00Z".to_string(),
        });
        pipeline.submit(result("r2"));

        probe.set_online(true);
        for _ in 0..5 {
            clock.advance_ms(1000);
            pipeline.tick();
        }

        assert_eq!(result_ids(&probe), vec!["r1", "r2"]);
        assert!(probe.published_on("pi_sorter/images").is_empty());
        let stats = pipeline.stats();
        assert_eq!(stats.messages_dropped, 1);
        assert_eq!(stats.messages_buffered, 0);
        assert!(pipeline.is_connected());
        assert!(!pipeline.is_fatal());
    }

    #[test]
    fn shutdown_drain_caps_each_publish_at_the_grace_deadline() {
        let bus = InMemoryBus::new();
        let probe = bus.probe();
        let clock = ManualClock::new();
        let settings = PublisherSettings {
            heartbeat_interval: Duration::ZERO,
            publish_timeout: Duration::from_secs(5),
            ..PublisherSettings::default()
        };
        let mut pipeline =
            PublishPipeline::new(bus, Topics::default(), settings, Arc::new(clock.clone()));
        pipeline.start();
        pipeline.submit(result("r1"));

        pipeline.shutdown(
            Some(OutboundMessage::status("pi_sorter", "offline")),
            Duration::from_millis(300),
        );

        let timeouts = probe.publish_timeouts();
        assert_eq!(timeouts.len(), 2);
        assert_eq!(timeouts[0], Duration::from_secs(5));
        assert_eq!(timeouts[1], Duration::from_millis(300));
    }

    #[test]
    fn commands_are_parsed_and_bad_ones_ignored() {
        let (mut pipeline, probe, _clock) = pipeline(10);
        pipeline.start();

        probe.inject_command("pi_sorter/commands", br#"{"command":"pause"}"#);
        probe.inject_command("pi_sorter/commands", b"garbage");
        probe.inject_command("other/topic", br#"{"command":"resume"}"#);

        assert_eq!(pipeline.tick(), vec![ControlCommand::Pause]);
        let stats = pipeline.stats();
        assert_eq!(stats.commands_received, 1);
        assert_eq!(stats.commands_rejected, 1);
    }

    #[test]
    fn heartbeat_follows_interval() {
        let bus = InMemoryBus::new();
        let probe = bus.probe();
        let clock = ManualClock::new();
        let settings = PublisherSettings {
            heartbeat_interval: Duration::from_millis(1000),
            ..PublisherSettings::default()
        };
        let mut pipeline =
            PublishPipeline::new(bus, Topics::default(), settings, Arc::new(clock.clone()));
        pipeline.start();

        pipeline.tick();
        clock.advance_ms(500);
        pipeline.tick();
        clock.advance_ms(500);
        pipeline.tick();

        assert_eq!(probe.published_on("pi_sorter/heartbeat").len(), 2);
    }

    #[test]
    fn shutdown_sends_final_status_and_disconnects() {
        let (mut pipeline, probe, _clock) = pipeline(10);
        pipeline.start();

        let stats = pipeline.shutdown(
            Some(OutboundMessage::status("pi_sorter", "offline")),
            Duration::from_secs(1),
        );

        let statuses = probe.json_on("pi_sorter/status");
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0]["status"], "offline");
        assert!(!probe.is_connected());
        assert_eq!(stats.messages_dropped, 0);
    }

    #[test]
    fn service_thread_publishes_and_forwards_commands() {
        let bus = InMemoryBus::new();
        let probe = bus.probe();
        let pipeline = PublishPipeline::new(
            bus,
            Topics::default(),
            PublisherSettings {
                heartbeat_interval: Duration::ZERO,
                ..PublisherSettings::default()
            },
            Arc::new(sorter_hal::SystemClock::new()),
        );
        let service = PublisherService::spawn(pipeline, Duration::from_millis(5)).unwrap();
        let handle = service.handle();
        let commands = service.control_commands();

        handle.publish(result("r1")).unwrap();
        probe.inject_command("pi_sorter/commands", br#"{"command":"status"}"#);

        assert_eq!(
            commands.recv_timeout(Duration::from_secs(2)).unwrap(),
            ControlCommand::Status
        );
        let stats = service.shutdown(None, Duration::from_secs(1));
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(result_ids(&probe), vec!["r1"]);
        assert!(handle.publish(result("r2")).is_err());
    }
}
