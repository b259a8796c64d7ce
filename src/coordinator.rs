// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! System coordinator
//!
//! Owns every component and the three execution contexts:
//!
//! - **sampler**: reads the encoder, evaluates the trigger, enqueues
//!   captures, applies control commands and watches the link
//! - **worker**: capture -> image envelope -> classification -> result,
//!   strictly in trigger order
//! - **network**: the [`PublisherService`] thread
//!
//! Startup brings up the camera, then the trigger logic, then the network;
//! sampling begins only once all three exist. Shutdown stops triggers,
//! drains pending captures within the grace period, releases the camera and
//! finally publishes an `offline` status before disconnecting.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use serde::Serialize;
use sorter_config::SorterConfig;
use sorter_hal::{Camera, Grader, PositionTracker, SpeedEstimator, TimeProvider};
use sorter_pipeline::{
    CaptureOrchestrator, CaptureQueue, CaptureResult, ClassificationAdapter, PushOutcome,
    QueuePop, RetryPolicy, TriggerController, TriggerDecision, TriggerEvent,
};
use sorter_transports::{
    image_filename, AlertLevel, ConnectionState, ControlCommand, EncodingPolicy, ImageStore,
    MessageBus, OutboundMessage, PublishPipeline, PublisherHandle, PublisherService,
};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SorterError};
use crate::history::{ExportFormat, HistoryEntry, ResultHistory, DEFAULT_HISTORY_CAPACITY};
use crate::statistics::{StatisticsCollector, SystemStatistics};
use crate::wiring;

const QUEUE_POLL: Duration = Duration::from_millis(20);
/// Floor for the final status flush when the grace period is already spent
const MIN_FINAL_FLUSH: Duration = Duration::from_millis(250);
const ENCODER_ALERT_INTERVAL_MS: u64 = 1000;

/// Hardware and external capabilities handed to the coordinator
pub struct SorterHardware {
    pub tracker: Arc<PositionTracker>,
    pub camera: Box<dyn Camera>,
    pub grader: Arc<dyn Grader>,
    pub image_store: Arc<dyn ImageStore>,
    pub clock: Arc<dyn TimeProvider>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub client_id: String,
    pub trigger_distance: i64,
    pub debounce_ms: u64,
    pub triggers_enabled: bool,
    pub sample_interval: Duration,
    pub retry: RetryPolicy,
    pub queue_depth: usize,
    pub inline_threshold: usize,
    pub publish_tick: Duration,
    pub grace_period: Duration,
    pub history_capacity: usize,
}

impl CoordinatorSettings {
    pub fn from_config(config: &SorterConfig) -> Self {
        Self {
            client_id: config.system.client_id.clone(),
            trigger_distance: config.trigger.trigger_distance,
            debounce_ms: config.trigger.debounce_ms,
            triggers_enabled: config.trigger.enabled,
            sample_interval: config.encoder.sample_interval(),
            retry: wiring::retry_policy(&config.capture),
            queue_depth: config.capture.queue_depth,
            inline_threshold: config.publish.inline_threshold_bytes,
            publish_tick: Duration::from_millis(config.publish.tick_interval_ms),
            grace_period: config.shutdown.grace_period(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&SorterConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Paused,
    /// Trigger acceptance stopped after a fatal fault; resume is refused
    Halted,
}

struct Shared {
    settings: CoordinatorSettings,
    tracker: Arc<PositionTracker>,
    clock: Arc<dyn TimeProvider>,
    trigger: Mutex<TriggerController>,
    queue: CaptureQueue,
    publisher: PublisherHandle,
    stats: StatisticsCollector,
    history: Mutex<ResultHistory>,
    paused: AtomicBool,
    halt_reason: Mutex<Option<String>>,
    sampling: AtomicBool,
    draining: AtomicBool,
    drain_deadline_ms: AtomicU64,
}

impl Shared {
    fn publish(&self, message: OutboundMessage) {
        if let Err(e) = self.publisher.publish(message) {
            debug!("[COORDINATOR] publisher unavailable: {}", e);
        }
    }

    fn alert(&self, kind: &str, level: AlertLevel, message: impl Into<String>) {
        self.publish(OutboundMessage::alert(kind, level, message));
    }

    fn status(&self, status: impl Into<String>) {
        self.publish(OutboundMessage::status(&self.settings.client_id, status));
    }

    fn run_state(&self) -> RunState {
        if self.halt_reason.lock().is_some() {
            RunState::Halted
        } else if self.paused.load(Ordering::Acquire) {
            RunState::Paused
        } else {
            RunState::Running
        }
    }

    fn status_text(&self) -> String {
        match self.halt_reason.lock().as_deref() {
            Some(reason) => format!("halted: {}", reason),
            None if self.paused.load(Ordering::Acquire) => "paused".to_string(),
            None => "running".to_string(),
        }
    }

    /// Stop accepting triggers for good
    fn halt(&self, kind: &str, reason: String) {
        {
            let mut slot = self.halt_reason.lock();
            if slot.is_some() {
                return;
            }
            *slot = Some(reason.clone());
        }
        self.trigger.lock().set_enabled(false);
        error!("[COORDINATOR] trigger acceptance halted: {}", reason);
        self.alert(kind, AlertLevel::Critical, reason.clone());
        self.status(format!("halted: {}", reason));
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        self.trigger.lock().set_enabled(false);
        info!("[COORDINATOR] paused");
        self.status("paused");
    }

    fn resume(&self) -> bool {
        if let Some(reason) = self.halt_reason.lock().as_deref() {
            warn!("[COORDINATOR] resume refused, halted: {}", reason);
            return false;
        }
        self.paused.store(false, Ordering::Release);
        self.trigger.lock().set_enabled(true);
        info!("[COORDINATOR] resumed");
        self.status("running");
        true
    }

    fn reset_position(&self) {
        self.tracker.reset_position();
        self.trigger.lock().reset();
        info!("[COORDINATOR] encoder position reset");
    }

    fn apply_command(&self, command: ControlCommand) {
        match command {
            ControlCommand::Pause => self.pause(),
            ControlCommand::Resume => {
                self.resume();
            }
            ControlCommand::ResetPosition => self.reset_position(),
            ControlCommand::SetTriggerDistance(distance) => {
                if let Err(e) = self.trigger.lock().set_trigger_distance(distance) {
                    warn!("[COORDINATOR] {}", e);
                }
            }
            ControlCommand::Status => self.status(self.status_text()),
        }
    }

    /// Past the shutdown grace period
    fn abandon_pending(&self) -> bool {
        self.draining.load(Ordering::Acquire)
            && self.clock.get_time_ms() > self.drain_deadline_ms.load(Ordering::Acquire)
    }
}

/// Sampler-local bookkeeping
struct Sampler {
    speed: SpeedEstimator,
    pending_dropped: u64,
    pending_invalid: u64,
    last_encoder_alert_ms: Option<u64>,
}

impl Sampler {
    fn new() -> Self {
        Self {
            speed: SpeedEstimator::default(),
            pending_dropped: 0,
            pending_invalid: 0,
            last_encoder_alert_ms: None,
        }
    }

    fn run(mut self, shared: Arc<Shared>, control: Receiver<ControlCommand>) {
        debug!("[COORDINATOR] sampler started");
        while shared.sampling.load(Ordering::Acquire) {
            while let Ok(command) = control.try_recv() {
                shared.apply_command(command);
            }

            if shared.publisher.is_fatal() && shared.halt_reason.lock().is_none() {
                let reason = shared
                    .publisher
                    .fatal_reason()
                    .unwrap_or_else(|| "reconnect attempts exhausted".to_string());
                shared.halt("link", format!("message bus unreachable: {}", reason));
            }

            self.sample(&shared);
            shared.clock.delay(shared.settings.sample_interval);
        }
        debug!("[COORDINATOR] sampler stopped");
    }

    fn sample(&mut self, shared: &Shared) {
        let now_us = shared.clock.get_time_us();
        let now_ms = now_us / 1000;
        self.report_encoder_faults(shared, now_ms);

        let snapshot = shared.tracker.snapshot();
        let speed = self.speed.update(&snapshot, now_us);
        let decision = shared.trigger.lock().evaluate(&snapshot, now_ms);
        shared.stats.update(|s| {
            s.encoder_position = snapshot.position;
            s.encoder_speed = speed;
            s.zero_references = shared.tracker.zero_references();
        });

        match decision {
            TriggerDecision::None => {}
            TriggerDecision::Suppressed { .. } => {
                shared.stats.update(|s| s.triggers_suppressed += 1);
            }
            TriggerDecision::Fired(event) => {
                shared.stats.update(|s| s.triggers_fired += 1);
                enqueue(shared, event);
            }
        }
    }

    /// Interrupt-path counters become warnings and at most one alert per interval
    fn report_encoder_faults(&mut self, shared: &Shared, now_ms: u64) {
        let dropped = shared.tracker.take_dropped_edges();
        let invalid = shared.tracker.take_invalid_transitions();
        if dropped > 0 || invalid > 0 {
            shared.stats.update(|s| {
                s.encoder_dropped_edges += dropped;
                s.encoder_invalid_transitions += invalid;
            });
            self.pending_dropped += dropped;
            self.pending_invalid += invalid;
        }

        if self.pending_dropped == 0 && self.pending_invalid == 0 {
            return;
        }
        let due = self
            .last_encoder_alert_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= ENCODER_ALERT_INTERVAL_MS);
        if !due {
            return;
        }

        let message = format!(
            "{} edge(s) dropped over the rate limit, {} invalid transition(s)",
            self.pending_dropped, self.pending_invalid
        );
        warn!("[ENCODER] {}", message);
        shared.alert("encoder", AlertLevel::Warning, message);
        self.pending_dropped = 0;
        self.pending_invalid = 0;
        self.last_encoder_alert_ms = Some(now_ms);
    }
}

fn enqueue(shared: &Shared, event: TriggerEvent) {
    let sequence_id = event.sequence_id;
    match shared.queue.push(event) {
        PushOutcome::Queued => {
            debug!("[COORDINATOR] trigger #{} queued", sequence_id);
        }
        PushOutcome::DroppedOldest(old) => {
            shared.stats.update(|s| s.triggers_dropped += 1);
            let message = format!(
                "capture queue full, dropped trigger #{} for #{}",
                old.sequence_id, sequence_id
            );
            warn!("[COORDINATOR] {}", message);
            shared.alert("capture_queue", AlertLevel::Warning, message);
        }
        PushOutcome::Rejected(event) => {
            debug!(
                "[COORDINATOR] queue closed, trigger #{} ignored",
                event.sequence_id
            );
        }
    }
}

struct Worker {
    orchestrator: CaptureOrchestrator,
    classifier: ClassificationAdapter,
    encoding: EncodingPolicy,
    store: Arc<dyn ImageStore>,
}

impl Worker {
    /// Returns the orchestrator so the camera is released by the coordinator
    fn run(mut self, shared: Arc<Shared>) -> CaptureOrchestrator {
        debug!("[COORDINATOR] worker started");
        loop {
            if shared.abandon_pending() {
                let abandoned = shared.queue.drain();
                if !abandoned.is_empty() {
                    warn!(
                        "[COORDINATOR] grace period over, abandoning {} pending trigger(s)",
                        abandoned.len()
                    );
                }
                break;
            }
            match shared.queue.pop_timeout(QUEUE_POLL) {
                QueuePop::Event(trigger) => self.process(&shared, trigger),
                QueuePop::Empty => {}
                QueuePop::Closed => break,
            }
        }
        debug!("[COORDINATOR] worker stopped");
        self.orchestrator
    }

    fn process(&mut self, shared: &Shared, trigger: TriggerEvent) {
        let sequence_id = trigger.sequence_id;
        let outcome = self.orchestrator.capture(&trigger);
        if outcome.transient_failures > 0 {
            shared
                .stats
                .update(|s| s.capture_transient_failures += outcome.transient_failures as u64);
        }

        let frame = match outcome.result {
            CaptureResult::Success(frame) => {
                shared.stats.update(|s| s.captures_succeeded += 1);
                frame
            }
            CaptureResult::Failure {
                reason,
                retry_count,
            } => {
                shared.stats.update(|s| s.capture_failures += 1);
                if reason.is_transient() {
                    shared.alert(
                        "capture",
                        AlertLevel::Error,
                        format!(
                            "capture for item #{} failed after {} retries: {}",
                            sequence_id, retry_count, reason
                        ),
                    );
                } else {
                    shared.stats.update(|s| s.capture_permanent_failures += 1);
                    shared.halt(
                        "capture",
                        format!("camera failure on item #{}: {}", sequence_id, reason),
                    );
                }
                return;
            }
        };

        if shared.abandon_pending() {
            warn!("[COORDINATOR] item #{} abandoned after capture", sequence_id);
            return;
        }

        let filename = image_filename(sequence_id, frame.captured_at);
        match self
            .encoding
            .encode_image(&filename, &frame.data, self.store.as_ref())
        {
            Ok(message) => {
                let inline = matches!(message, OutboundMessage::ImageInline { .. });
                shared.stats.update(|s| {
                    if inline {
                        s.images_inline += 1;
                    } else {
                        s.images_referenced += 1;
                    }
                });
                shared.publish(message);
            }
            Err(e) => {
                warn!("[COORDINATOR] image for item #{} not stored: {}", sequence_id, e);
                shared.alert(
                    "storage",
                    AlertLevel::Error,
                    format!("image for item #{} not published: {}", sequence_id, e),
                );
            }
        }

        if shared.abandon_pending() {
            warn!("[COORDINATOR] item #{} abandoned before grading", sequence_id);
            return;
        }

        match self.classifier.classify(&frame, &trigger) {
            Ok(record) => {
                info!(
                    "[COORDINATOR] item #{} graded {} ({:.1} x {:.1} mm)",
                    sequence_id, record.grade, record.length_mm, record.diameter_mm
                );
                shared.stats.update(|s| s.graded.record(record.grade));
                shared.history.lock().push(HistoryEntry {
                    sequence_id,
                    trigger_position: trigger.trigger_position,
                    recorded_at: chrono::Utc::now(),
                    record: record.clone(),
                });
                shared.publish(OutboundMessage::Result(record));
            }
            Err(e) => {
                shared.stats.update(|s| s.grading_errors += 1);
                shared.alert(
                    "grading",
                    AlertLevel::Error,
                    format!("item #{} not graded: {}", sequence_id, e),
                );
            }
        }
    }
}

pub struct SystemCoordinator {
    shared: Arc<Shared>,
    sampler: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<CaptureOrchestrator>>,
    publisher: Option<PublisherService>,
}

impl SystemCoordinator {
    pub fn start<B>(
        hardware: SorterHardware,
        settings: CoordinatorSettings,
        pipeline: PublishPipeline<B>,
    ) -> Result<Self>
    where
        B: MessageBus + 'static,
    {
        info!("[COORDINATOR] starting '{}'", settings.client_id);

        // Hardware
        let mut orchestrator = CaptureOrchestrator::new(
            hardware.camera,
            settings.retry.clone(),
            Arc::clone(&hardware.clock),
        );
        orchestrator.initialize()?;

        // Trigger logic
        let mut trigger = TriggerController::new(settings.trigger_distance, settings.debounce_ms)?;
        trigger.set_enabled(settings.triggers_enabled);
        let queue = CaptureQueue::new(settings.queue_depth);
        let worker = Worker {
            orchestrator,
            classifier: ClassificationAdapter::new(hardware.grader),
            encoding: EncodingPolicy::new(settings.inline_threshold),
            store: hardware.image_store,
        };

        // Network
        let publisher = PublisherService::spawn(pipeline, settings.publish_tick)?;
        let control = publisher.control_commands();

        let shared = Arc::new(Shared {
            tracker: hardware.tracker,
            clock: hardware.clock,
            trigger: Mutex::new(trigger),
            queue,
            publisher: publisher.handle(),
            stats: StatisticsCollector::new(),
            history: Mutex::new(ResultHistory::new(settings.history_capacity)),
            paused: AtomicBool::new(!settings.triggers_enabled),
            halt_reason: Mutex::new(None),
            sampling: AtomicBool::new(true),
            draining: AtomicBool::new(false),
            drain_deadline_ms: AtomicU64::new(u64::MAX),
            settings,
        });
        shared.status("online");

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("sorter-worker".to_string())
                .spawn(move || worker.run(shared))?
        };
        let sampler = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("sorter-sampler".to_string())
                .spawn(move || Sampler::new().run(shared, control))?
        };

        info!("[COORDINATOR] running");
        Ok(Self {
            shared,
            sampler: Some(sampler),
            worker: Some(worker),
            publisher: Some(publisher),
        })
    }

    /// Wire a coordinator from configuration
    pub fn from_config<B>(config: &SorterConfig, hardware: SorterHardware, bus: B) -> Result<Self>
    where
        B: MessageBus + 'static,
    {
        let pipeline = wiring::publish_pipeline(config, bus, Arc::clone(&hardware.clock));
        Self::start(hardware, CoordinatorSettings::from_config(config), pipeline)
    }

    pub fn statistics(&self) -> SystemStatistics {
        self.shared.stats.snapshot(self.shared.publisher.stats())
    }

    pub fn run_state(&self) -> RunState {
        self.shared.run_state()
    }

    pub fn halt_reason(&self) -> Option<String> {
        self.shared.halt_reason.lock().clone()
    }

    pub fn link_state(&self) -> ConnectionState {
        self.shared.publisher.state()
    }

    pub fn tracker(&self) -> &Arc<PositionTracker> {
        &self.shared.tracker
    }

    pub fn pause(&self) {
        self.shared.pause();
    }

    /// False if trigger acceptance was halted
    pub fn resume(&self) -> bool {
        self.shared.resume()
    }

    pub fn reset_position(&self) {
        self.shared.reset_position();
    }

    pub fn set_trigger_distance(&self, distance: i64) -> Result<()> {
        self.shared.trigger.lock().set_trigger_distance(distance)?;
        Ok(())
    }

    pub fn apply_command(&self, command: ControlCommand) {
        self.shared.apply_command(command);
    }

    /// Most recent graded items, newest last
    pub fn recent_results(&self, count: usize) -> Vec<HistoryEntry> {
        self.shared.history.lock().recent(count)
    }

    /// CSV for a `.csv` path, JSON otherwise
    pub fn export_history(&self, path: &Path) -> Result<usize> {
        self.export_history_as(path, ExportFormat::for_path(path))
    }

    pub fn export_history_as(&self, path: &Path, format: ExportFormat) -> Result<usize> {
        self.shared.history.lock().export(path, format)
    }

    pub fn shutdown(mut self) -> Result<SystemStatistics> {
        self.stop()
    }

    fn stop(&mut self) -> Result<SystemStatistics> {
        let grace = self.shared.settings.grace_period;
        let started_ms = self.shared.clock.get_time_ms();
        info!("[COORDINATOR] shutting down (grace {:?})", grace);
        let mut panicked: Option<&'static str> = None;

        // Stop accepting triggers
        self.shared.sampling.store(false, Ordering::Release);
        self.shared.trigger.lock().set_enabled(false);
        self.shared.queue.close();
        if let Some(sampler) = self.sampler.take() {
            if sampler.join().is_err() {
                panicked = Some("sampler");
            }
        }

        // Drain pending captures within the grace period
        self.shared.drain_deadline_ms.store(
            started_ms.saturating_add(grace.as_millis() as u64),
            Ordering::Release,
        );
        self.shared.draining.store(true, Ordering::Release);
        let orchestrator = match self.worker.take() {
            Some(worker) => match worker.join() {
                Ok(orchestrator) => Some(orchestrator),
                Err(_) => {
                    panicked = Some("worker");
                    None
                }
            },
            None => None,
        };

        // Release hardware
        if let Some(mut orchestrator) = orchestrator {
            orchestrator.release();
        }

        // Close the network with a final status
        let elapsed = Duration::from_millis(
            self.shared
                .clock
                .get_time_ms()
                .saturating_sub(started_ms),
        );
        let remaining = grace.saturating_sub(elapsed).max(MIN_FINAL_FLUSH);
        let publish = match self.publisher.take() {
            Some(publisher) => publisher.shutdown(
                Some(OutboundMessage::status(
                    &self.shared.settings.client_id,
                    "offline",
                )),
                remaining,
            ),
            None => self.shared.publisher.stats(),
        };

        let stats = self.shared.stats.snapshot(publish);
        info!(
            "[COORDINATOR] stopped: {} fired, {} graded, {} sent",
            stats.triggers_fired,
            stats.graded.total(),
            stats.publish.messages_sent
        );
        match panicked {
            Some(name) => Err(SorterError::ThreadPanicked(name)),
            None => Ok(stats),
        }
    }
}

impl Drop for SystemCoordinator {
    fn drop(&mut self) {
        if self.publisher.is_some() {
            if let Err(e) = self.stop() {
                error!("[COORDINATOR] shutdown on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sorter_hal::sim::{FixedGrader, SimulatedCamera};
    use sorter_hal::{Grade, GradeRecord, SystemClock};
    use sorter_transports::{FsImageStore, InMemoryBus, PublisherSettings, Topics};

    fn coordinator(dir: &Path) -> (SystemCoordinator, sorter_transports::BusProbe) {
        let clock: Arc<dyn TimeProvider> = Arc::new(SystemClock::new());
        let bus = InMemoryBus::new();
        let probe = bus.probe();
        let pipeline = PublishPipeline::new(
            bus,
            Topics::default(),
            PublisherSettings {
                heartbeat_interval: Duration::ZERO,
                ..PublisherSettings::default()
            },
            Arc::clone(&clock),
        );
        let hardware = SorterHardware {
            tracker: Arc::new(PositionTracker::new(Arc::clone(&clock), 0)),
            camera: Box::new(SimulatedCamera::new(64)),
            grader: Arc::new(FixedGrader::new(GradeRecord::new(Grade::B, 150.0, 12.0))),
            image_store: Arc::new(FsImageStore::new(dir)),
            clock,
        };
        let settings = CoordinatorSettings {
            publish_tick: Duration::from_millis(5),
            grace_period: Duration::from_secs(2),
            ..CoordinatorSettings::default()
        };
        let coordinator = SystemCoordinator::start(hardware, settings, pipeline).unwrap();
        (coordinator, probe)
    }

    #[test]
    fn pause_resume_and_halt_states() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _probe) = coordinator(dir.path());
        assert_eq!(coordinator.run_state(), RunState::Running);

        coordinator.pause();
        assert_eq!(coordinator.run_state(), RunState::Paused);
        assert!(coordinator.resume());

        coordinator.shared.halt("test", "operator fault".to_string());
        assert_eq!(coordinator.run_state(), RunState::Halted);
        assert!(!coordinator.resume());
        assert_eq!(coordinator.halt_reason().as_deref(), Some("operator fault"));

        coordinator.shutdown().unwrap();
    }

    #[test]
    fn rejects_invalid_trigger_distance() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _probe) = coordinator(dir.path());
        assert!(coordinator.set_trigger_distance(0).is_err());
        assert!(coordinator.set_trigger_distance(300).is_ok());
        coordinator.shutdown().unwrap();
    }

    #[test]
    fn online_and_offline_status_bracket_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, probe) = coordinator(dir.path());
        coordinator.shutdown().unwrap();

        let statuses: Vec<String> = probe
            .json_on("pi_sorter/status")
            .iter()
            .map(|v| v["status"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(statuses.first().map(String::as_str), Some("online"));
        assert_eq!(statuses.last().map(String::as_str), Some("offline"));
    }

    #[test]
    fn camera_init_failure_aborts_startup() {
        let clock: Arc<dyn TimeProvider> = Arc::new(SystemClock::new());
        let dir = tempfile::tempdir().unwrap();
        let hardware = SorterHardware {
            tracker: Arc::new(PositionTracker::new(Arc::clone(&clock), 0)),
            camera: Box::new(
                SimulatedCamera::new(64)
                    .with_init_error(sorter_hal::CaptureError::DeviceNotFound("/dev/video0".into())),
            ),
            grader: Arc::new(FixedGrader::new(GradeRecord::new(Grade::A, 1.0, 1.0))),
            image_store: Arc::new(FsImageStore::new(dir.path())),
            clock: Arc::clone(&clock),
        };
        let pipeline = PublishPipeline::new(
            InMemoryBus::new(),
            Topics::default(),
            PublisherSettings::default(),
            clock,
        );

        assert!(matches!(
            SystemCoordinator::start(hardware, CoordinatorSettings::default(), pipeline),
            Err(SorterError::HardwareInit(_))
        ));
    }
}
