// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Capture with bounded retry
//!
//! Transient failures (timeout, busy) are retried up to `max_retries` extra
//! attempts with a fixed delay taken from the injected clock. Permanent
//! failures end the attempt sequence immediately.
//!
//! Each attempt is timed on the injected clock. A frame that arrives after
//! the capture timeout is discarded and counted as a transient timeout, so a
//! camera that overruns its deadline cannot silently stretch the pipeline.

use std::sync::Arc;
use std::time::Duration;

use sorter_hal::{Camera, CaptureError, Frame, TimeProvider};
use tracing::{debug, warn};

use crate::trigger::TriggerEvent;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            max_retries: 2,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Final outcome of one trigger's capture
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureResult {
    Success(Frame),
    Failure { reason: CaptureError, retry_count: u32 },
}

impl CaptureResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CaptureResult::Success(_))
    }
}

#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub trigger: TriggerEvent,
    pub result: CaptureResult,
    /// Transient failures seen before the final outcome
    pub transient_failures: u32,
}

/// Owns the camera; one capture in flight at a time
pub struct CaptureOrchestrator {
    camera: Box<dyn Camera>,
    policy: RetryPolicy,
    clock: Arc<dyn TimeProvider>,
    initialized: bool,
}

impl CaptureOrchestrator {
    pub fn new(camera: Box<dyn Camera>, policy: RetryPolicy, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            camera,
            policy,
            clock,
            initialized: false,
        }
    }

    pub fn initialize(&mut self) -> Result<(), CaptureError> {
        self.camera.initialize()?;
        self.initialized = true;
        debug!("[CAPTURE] Camera '{}' initialized", self.camera.name());
        Ok(())
    }

    pub fn capture(&mut self, trigger: &TriggerEvent) -> CaptureOutcome {
        let mut transient_failures = 0u32;

        loop {
            match self.attempt() {
                Ok(frame) => {
                    debug!(
                        "[CAPTURE] #{} captured {} bytes ({}x{}) after {} retries",
                        trigger.sequence_id,
                        frame.size_bytes(),
                        frame.width,
                        frame.height,
                        transient_failures
                    );
                    return CaptureOutcome {
                        trigger: trigger.clone(),
                        result: CaptureResult::Success(frame),
                        transient_failures,
                    };
                }
                Err(error) if error.is_transient() && transient_failures < self.policy.max_retries => {
                    transient_failures += 1;
                    debug!(
                        "[CAPTURE] #{} transient failure {}/{}: {}",
                        trigger.sequence_id, transient_failures, self.policy.max_retries, error
                    );
                    self.clock.delay(self.policy.retry_delay);
                }
                Err(error) => {
                    if error.is_transient() {
                        transient_failures += 1;
                    }
                    warn!(
                        "[CAPTURE] #{} failed after {} retries: {}",
                        trigger.sequence_id,
                        transient_failures.min(self.policy.max_retries),
                        error
                    );
                    return CaptureOutcome {
                        trigger: trigger.clone(),
                        result: CaptureResult::Failure {
                            reason: error,
                            retry_count: transient_failures.min(self.policy.max_retries),
                        },
                        transient_failures,
                    };
                }
            }
        }
    }

    /// One bounded capture call
    fn attempt(&mut self) -> Result<Frame, CaptureError> {
        let timeout = self.policy.timeout;
        let started_us = self.clock.get_time_us();
        let frame = self.camera.capture_still(timeout)?;
        let elapsed = Duration::from_micros(self.clock.get_time_us().saturating_sub(started_us));
        if elapsed > timeout {
            warn!(
                "[CAPTURE] Camera '{}' returned after {:?}, past the {:?} deadline",
                self.camera.name(),
                elapsed,
                timeout
            );
            return Err(CaptureError::Timeout(timeout));
        }
        Ok(frame)
    }

    /// Release the camera; idempotent
    pub fn release(&mut self) {
        if self.initialized {
            self.camera.release();
            self.initialized = false;
            debug!("[CAPTURE] Camera '{}' released", self.camera.name());
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl Drop for CaptureOrchestrator {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sorter_hal::sim::SimulatedCamera;
    use sorter_hal::ManualClock;

    fn trigger() -> TriggerEvent {
        TriggerEvent {
            trigger_position: 150,
            sequence_id: 1,
            timestamp_ms: 0,
            created_at: Utc::now(),
        }
    }

    fn orchestrator(camera: SimulatedCamera, clock: ManualClock) -> CaptureOrchestrator {
        let mut orchestrator =
            CaptureOrchestrator::new(Box::new(camera), RetryPolicy::default(), Arc::new(clock));
        orchestrator.initialize().unwrap();
        orchestrator
    }

    #[test]
    fn two_transient_failures_then_success() {
        let camera = SimulatedCamera::new(64);
        let probe = camera.probe();
        probe.push_failure(CaptureError::Timeout(Duration::from_secs(2)));
        probe.push_failure(CaptureError::DeviceBusy);
        let clock = ManualClock::new();
        let mut orchestrator = orchestrator(camera, clock.clone());

        let outcome = orchestrator.capture(&trigger());

        assert!(outcome.result.is_success());
        assert_eq!(outcome.transient_failures, 2);
        assert_eq!(probe.attempts(), 3);
        // Two fixed retry delays on the virtual clock
        assert_eq!(clock.get_time_us(), 200_000);
    }

    #[test]
    fn retries_are_bounded() {
        let camera = SimulatedCamera::new(64);
        let probe = camera.probe();
        for _ in 0..5 {
            probe.push_failure(CaptureError::DeviceBusy);
        }
        let mut orchestrator = orchestrator(camera, ManualClock::new());

        let outcome = orchestrator.capture(&trigger());

        assert_eq!(
            outcome.result,
            CaptureResult::Failure {
                reason: CaptureError::DeviceBusy,
                retry_count: 2
            }
        );
        assert_eq!(outcome.transient_failures, 3);
        assert_eq!(probe.attempts(), 3);
    }

    #[test]
    fn permanent_failure_is_not_retried() {
        let camera = SimulatedCamera::new(64);
        let probe = camera.probe();
        probe.push_failure(CaptureError::DeviceNotFound("/dev/video0".into()));
        let clock = ManualClock::new();
        let mut orchestrator = orchestrator(camera, clock.clone());

        let outcome = orchestrator.capture(&trigger());

        assert!(matches!(
            outcome.result,
            CaptureResult::Failure {
                reason: CaptureError::DeviceNotFound(_),
                retry_count: 0
            }
        ));
        assert_eq!(probe.attempts(), 1);
        assert_eq!(clock.get_time_us(), 0);
    }

    /// Ignores the timeout it is given and takes `latencies_ms` in turn
    struct OverrunningCamera {
        clock: ManualClock,
        latencies_ms: Vec<u64>,
        calls: usize,
    }

    impl Camera for OverrunningCamera {
        fn initialize(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }

        fn capture_still(&mut self, _timeout: Duration) -> Result<Frame, CaptureError> {
            let latency = self.latencies_ms.get(self.calls).copied().unwrap_or(0);
            self.calls += 1;
            self.clock.advance_ms(latency);
            Ok(Frame {
                data: vec![0; 16],
                width: 4,
                height: 4,
                captured_at: Utc::now(),
            })
        }

        fn release(&mut self) {}
    }

    #[test]
    fn late_frame_counts_as_a_timeout() {
        let clock = ManualClock::new();
        let camera = OverrunningCamera {
            clock: clock.clone(),
            latencies_ms: vec![3_000, 10],
            calls: 0,
        };
        let mut orchestrator =
            CaptureOrchestrator::new(Box::new(camera), RetryPolicy::default(), Arc::new(clock));
        orchestrator.initialize().unwrap();

        let outcome = orchestrator.capture(&trigger());

        assert!(outcome.result.is_success());
        assert_eq!(outcome.transient_failures, 1);
    }

    #[test]
    fn camera_that_always_overruns_fails_with_timeout() {
        let clock = ManualClock::new();
        let camera = OverrunningCamera {
            clock: clock.clone(),
            latencies_ms: vec![2_500; 5],
            calls: 0,
        };
        let mut orchestrator =
            CaptureOrchestrator::new(Box::new(camera), RetryPolicy::default(), Arc::new(clock));
        orchestrator.initialize().unwrap();

        let outcome = orchestrator.capture(&trigger());

        assert_eq!(
            outcome.result,
            CaptureResult::Failure {
                reason: CaptureError::Timeout(Duration::from_secs(2)),
                retry_count: 2
            }
        );
        assert_eq!(outcome.transient_failures, 3);
    }

    #[test]
    fn release_is_idempotent_and_runs_on_drop() {
        let camera = SimulatedCamera::new(8);
        let probe = camera.probe();
        let mut orchestrator = orchestrator(camera, ManualClock::new());
        orchestrator.release();
        assert!(probe.is_released());
        orchestrator.release();
        drop(orchestrator);
        assert!(probe.is_released());
    }
}
