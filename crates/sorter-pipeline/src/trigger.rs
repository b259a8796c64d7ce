// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Threshold-crossing detection with debounce
//!
//! Pure and clock-free: the sampler passes the encoder snapshot and the
//! current monotonic time in milliseconds.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sorter_hal::EncoderSnapshot;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Milliseconds in the sampler's monotonic clock domain
pub type NowMs = u64;

/// One qualifying threshold crossing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerEvent {
    pub trigger_position: i64,
    pub sequence_id: u64,
    /// Monotonic time of the crossing
    pub timestamp_ms: NowMs,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Armed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerDecision {
    /// No crossing
    None,
    Fired(TriggerEvent),
    /// Crossing inside the debounce window; the sequence id is consumed
    Suppressed { sequence_id: u64, position: i64 },
}

/// `Idle -> Armed -> Idle` crossing detector
///
/// Every crossing, fired or suppressed, consumes a sequence id and moves the
/// baseline to the observed position. A zero-reference moves the baseline
/// back to 0 without touching anything already emitted.
#[derive(Debug, Clone)]
pub struct TriggerController {
    state: TriggerState,
    trigger_distance: i64,
    debounce_ms: u64,
    enabled: bool,
    last_trigger_position: i64,
    next_sequence_id: u64,
    last_fired_at_ms: Option<NowMs>,
    seen_zero_references: Option<u32>,
    fired: u64,
    suppressed: u64,
}

impl TriggerController {
    pub fn new(trigger_distance: i64, debounce_ms: u64) -> Result<Self> {
        if trigger_distance <= 0 {
            return Err(PipelineError::InvalidTriggerDistance(trigger_distance));
        }
        Ok(Self {
            state: TriggerState::Idle,
            trigger_distance,
            debounce_ms,
            enabled: true,
            last_trigger_position: 0,
            next_sequence_id: 1,
            last_fired_at_ms: None,
            seen_zero_references: None,
            fired: 0,
            suppressed: 0,
        })
    }

    /// Compare one position read against the threshold
    pub fn evaluate(&mut self, snapshot: &EncoderSnapshot, now_ms: NowMs) -> TriggerDecision {
        if let Some(seen) = self.seen_zero_references {
            if seen != snapshot.zero_reference_count {
                debug!(
                    "[TRIGGER] Zero reference #{}: baseline {} -> 0",
                    snapshot.zero_reference_count, self.last_trigger_position
                );
                self.last_trigger_position = 0;
            }
        }
        self.seen_zero_references = Some(snapshot.zero_reference_count);

        if !self.enabled {
            // Distance is measured from where triggering resumes.
            self.last_trigger_position = snapshot.position;
            return TriggerDecision::None;
        }

        if snapshot.position < self.last_trigger_position + self.trigger_distance {
            return TriggerDecision::None;
        }

        self.state = TriggerState::Armed;
        let sequence_id = self.next_sequence_id;
        self.next_sequence_id += 1;
        self.last_trigger_position = snapshot.position;

        let debounced = self
            .last_fired_at_ms
            .is_some_and(|last| now_ms.saturating_sub(last) < self.debounce_ms);

        let decision = if debounced {
            self.suppressed += 1;
            debug!(
                "[TRIGGER] Crossing #{} at {} suppressed (debounce {} ms)",
                sequence_id, snapshot.position, self.debounce_ms
            );
            TriggerDecision::Suppressed {
                sequence_id,
                position: snapshot.position,
            }
        } else {
            self.fired += 1;
            self.last_fired_at_ms = Some(now_ms);
            debug!("[TRIGGER] Fired #{} at {}", sequence_id, snapshot.position);
            TriggerDecision::Fired(TriggerEvent {
                trigger_position: snapshot.position,
                sequence_id,
                timestamp_ms: now_ms,
                created_at: Utc::now(),
            })
        };

        self.state = TriggerState::Idle;
        decision
    }

    pub fn set_trigger_distance(&mut self, distance: i64) -> Result<()> {
        if distance <= 0 {
            return Err(PipelineError::InvalidTriggerDistance(distance));
        }
        info!(
            "[TRIGGER] Trigger distance {} -> {}",
            self.trigger_distance, distance
        );
        self.trigger_distance = distance;
        Ok(())
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            info!(
                "[TRIGGER] Triggering {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
        self.enabled = enabled;
    }

    /// Baseline back to 0, e.g. after an operator position reset
    pub fn reset(&mut self) {
        self.last_trigger_position = 0;
        self.state = TriggerState::Idle;
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn trigger_distance(&self) -> i64 {
        self.trigger_distance
    }

    pub fn last_trigger_position(&self) -> i64 {
        self.last_trigger_position
    }

    pub fn fired_count(&self) -> u64 {
        self.fired
    }

    pub fn suppressed_count(&self) -> u64 {
        self.suppressed
    }
}
