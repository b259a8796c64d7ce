// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Simulated hardware
//!
//! Scripted stand-ins for the encoder, camera and grader used by the
//! `sorter-sim` tool and the test suites.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use crate::camera::{Camera, CaptureError, Frame};
use crate::encoder::{Channel, PositionTracker};
use crate::grading::{GradeRecord, Grader, GradingError};

/// AB states in forward order (A leads B)
const FORWARD_CYCLE: [u8; 4] = [0b00, 0b10, 0b11, 0b01];

/// Generates quadrature edges for a [`PositionTracker`]
///
/// Each call to [`advance`](Self::advance) emits one edge per count, spaced
/// `spacing_us` apart on the simulator's own timeline.
#[derive(Debug, Clone)]
pub struct SimulatedEncoder {
    phase: usize,
    next_timestamp_us: u64,
    spacing_us: u64,
}

impl SimulatedEncoder {
    pub fn new(spacing_us: u64) -> Self {
        Self {
            phase: 0,
            next_timestamp_us: spacing_us.max(1),
            spacing_us: spacing_us.max(1),
        }
    }

    /// Emit `counts` edges; negative values rotate backwards
    pub fn advance(&mut self, tracker: &PositionTracker, counts: i64) {
        let forward = counts >= 0;
        for _ in 0..counts.unsigned_abs() {
            let current = FORWARD_CYCLE[self.phase];
            self.phase = if forward {
                (self.phase + 1) % 4
            } else {
                (self.phase + 3) % 4
            };
            let next = FORWARD_CYCLE[self.phase];
            let changed = current ^ next;
            let (channel, mask) = if changed & 0b10 != 0 {
                (Channel::A, 0b10)
            } else {
                (Channel::B, 0b01)
            };
            tracker.on_edge_at(channel, next & mask != 0, self.next_timestamp_us);
            self.next_timestamp_us += self.spacing_us;
        }
    }
}

/// Shared view into a [`SimulatedCamera`] for scripting and assertions
#[derive(Debug, Clone, Default)]
pub struct CameraProbe {
    script: Arc<Mutex<VecDeque<CaptureError>>>,
    attempts: Arc<AtomicU32>,
    frames: Arc<AtomicU32>,
    released: Arc<AtomicBool>,
}

impl CameraProbe {
    /// Queue failures returned by the next capture attempts, in order
    pub fn push_failure(&self, error: CaptureError) {
        self.script.lock().push_back(error);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn frames_delivered(&self) -> u32 {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Camera returning synthetic frames unless a failure is scripted
pub struct SimulatedCamera {
    probe: CameraProbe,
    frame_size: usize,
    width: u32,
    height: u32,
    latency: Duration,
    init_error: Option<CaptureError>,
    initialized: bool,
}

impl SimulatedCamera {
    pub fn new(frame_size: usize) -> Self {
        Self {
            probe: CameraProbe::default(),
            frame_size,
            width: 640,
            height: 480,
            latency: Duration::ZERO,
            init_error: None,
            initialized: false,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make `initialize` fail, e.g. to simulate a missing device
    pub fn with_init_error(mut self, error: CaptureError) -> Self {
        self.init_error = Some(error);
        self
    }

    pub fn probe(&self) -> CameraProbe {
        self.probe.clone()
    }
}

impl Camera for SimulatedCamera {
    fn initialize(&mut self) -> Result<(), CaptureError> {
        if let Some(error) = self.init_error.clone() {
            return Err(error);
        }
        self.initialized = true;
        self.probe.released.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn capture_still(&mut self, timeout: Duration) -> Result<Frame, CaptureError> {
        self.probe.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.initialized {
            return Err(CaptureError::Device("camera not initialized".to_string()));
        }
        if let Some(error) = self.probe.script.lock().pop_front() {
            return Err(error);
        }
        if self.latency > timeout {
            std::thread::sleep(timeout);
            return Err(CaptureError::Timeout(timeout));
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        self.probe.frames.fetch_add(1, Ordering::SeqCst);
        Ok(Frame {
            data: (0..self.frame_size).map(|i| (i % 251) as u8).collect(),
            width: self.width,
            height: self.height,
            captured_at: Utc::now(),
        })
    }

    fn release(&mut self) {
        self.initialized = false;
        self.probe.released.store(true, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

/// Grader that returns the same record for every non-empty image
#[derive(Debug, Clone)]
pub struct FixedGrader {
    record: GradeRecord,
}

impl FixedGrader {
    pub fn new(record: GradeRecord) -> Self {
        Self { record }
    }
}

impl Grader for FixedGrader {
    fn grade(&self, image: &[u8]) -> Result<GradeRecord, GradingError> {
        if image.is_empty() {
            return Err(GradingError::MalformedImage("empty image".to_string()));
        }
        Ok(self.record.clone())
    }
}
