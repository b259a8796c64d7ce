// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Quadrature position tracking
//!
//! The edge handlers run in the GPIO interrupt context: they never block,
//! allocate or log. Position, channel phase and zero-reference count share a
//! single `AtomicU64` so readers always observe a consistent snapshot.
//!
//! Word layout:
//! ```text
//! bits  0..48  position (i48, two's complement)
//! bits 48..50  last decoded AB state (A = bit 1, B = bit 0)
//! bits 50..64  zero-reference epoch (wrapping, 14 bits)
//! ```
//!
//! 2^47 counts is decades of continuous travel at any realistic edge rate,
//! so a belt without a zero-reference never wraps in practice.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::time::TimeProvider;

const POSITION_BITS: u32 = 48;
const POSITION_MASK: u64 = (1 << POSITION_BITS) - 1;
const STATE_SHIFT: u32 = POSITION_BITS;
const STATE_MASK: u64 = 0b11;
const ZREF_SHIFT: u32 = 50;
const ZREF_MASK: u64 = (1 << 14) - 1;

/// Largest position the packed word holds; one more count wraps to the minimum
pub const MAX_POSITION: i64 = (1 << (POSITION_BITS - 1)) - 1;

const NO_EDGE: u64 = u64::MAX;
const INVALID: i8 = 2;

/// 4x decode table indexed by `(previous_state << 2) | new_state`.
///
/// Forward rotation walks `00 -> 10 -> 11 -> 01 -> 00` (A leads B).
const TRANSITIONS: [i8; 16] = [
    0, -1, 1, INVALID, //
    1, 0, INVALID, -1, //
    -1, INVALID, 0, 1, //
    INVALID, 1, -1, 0,
];

/// Quadrature input channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    A,
    B,
}

impl Channel {
    fn mask(self) -> u8 {
        match self {
            Channel::A => 0b10,
            Channel::B => 0b01,
        }
    }
}

/// Consistent view of the encoder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSnapshot {
    pub position: i64,
    /// Zero-references seen, modulo 2^14. Compare for change only;
    /// [`PositionTracker::zero_references`] has the running total.
    pub zero_reference_count: u32,
    /// Timestamp of the last accepted edge, `None` before the first one
    pub last_edge_us: Option<u64>,
}

#[inline]
fn pack(position: i64, state: u8, zero_refs: u32) -> u64 {
    ((position as u64) & POSITION_MASK)
        | (((state as u64) & STATE_MASK) << STATE_SHIFT)
        | (((zero_refs as u64) & ZREF_MASK) << ZREF_SHIFT)
}

#[inline]
fn unpack(word: u64) -> (i64, u8, u32) {
    // sign-extend from bit 47
    let shift = 64 - POSITION_BITS;
    let position = (((word & POSITION_MASK) << shift) as i64) >> shift;
    let state = ((word >> STATE_SHIFT) & STATE_MASK) as u8;
    let zero_refs = ((word >> ZREF_SHIFT) & ZREF_MASK) as u32;
    (position, state, zero_refs)
}

#[inline]
fn with_level(state: u8, channel: Channel, level: bool) -> u8 {
    if level {
        state | channel.mask()
    } else {
        state & !channel.mask()
    }
}

/// Interrupt-safe quadrature decoder
///
/// Edges closer together than `1 / max_edge_rate_hz` are dropped and counted
/// rather than decoded. The channel phase is still updated for a dropped
/// edge, so later edges decode against the real pin levels; only the count
/// diverges.
pub struct PositionTracker {
    word: AtomicU64,
    last_edge_us: AtomicU64,
    dropped_edges: AtomicU64,
    invalid_transitions: AtomicU64,
    zero_references: AtomicU64,
    min_edge_interval_us: u64,
    clock: Arc<dyn TimeProvider>,
}

impl PositionTracker {
    /// `max_edge_rate_hz == 0` disables rate limiting.
    pub fn new(clock: Arc<dyn TimeProvider>, max_edge_rate_hz: u32) -> Self {
        let min_edge_interval_us = if max_edge_rate_hz == 0 {
            0
        } else {
            (1_000_000 / max_edge_rate_hz as u64).max(1)
        };
        Self {
            word: AtomicU64::new(pack(0, 0, 0)),
            last_edge_us: AtomicU64::new(NO_EDGE),
            dropped_edges: AtomicU64::new(0),
            invalid_transitions: AtomicU64::new(0),
            zero_references: AtomicU64::new(0),
            min_edge_interval_us,
            clock,
        }
    }

    /// Align the decoder with the pin levels read at startup
    pub fn sync_levels(&self, a: bool, b: bool) {
        let state = ((a as u8) << 1) | (b as u8);
        let _ = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                let (position, _, zero_refs) = unpack(w);
                Some(pack(position, state, zero_refs))
            });
    }

    /// Edge handler, timestamped with the tracker's clock
    #[inline]
    pub fn on_edge(&self, channel: Channel, level: bool) {
        let now = self.clock.get_time_us();
        self.on_edge_at(channel, level, now);
    }

    /// Edge handler with a caller-supplied timestamp (e.g. from the GPIO event)
    pub fn on_edge_at(&self, channel: Channel, level: bool, timestamp_us: u64) {
        if self.is_saturated(timestamp_us) {
            self.dropped_edges.fetch_add(1, Ordering::Relaxed);
            let _ = self
                .word
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                    let (position, state, zero_refs) = unpack(w);
                    Some(pack(position, with_level(state, channel, level), zero_refs))
                });
            return;
        }

        self.last_edge_us.store(timestamp_us, Ordering::Release);
        let mut invalid = false;
        let _ = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                let (position, state, zero_refs) = unpack(w);
                let next = with_level(state, channel, level);
                if next == state {
                    // Same level twice on one channel: an edge was missed.
                    invalid = true;
                    return None;
                }
                invalid = false;
                let delta = TRANSITIONS[((state << 2) | next) as usize];
                Some(pack(position.wrapping_add(delta as i64), next, zero_refs))
            });
        if invalid {
            self.invalid_transitions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Decode a sampled `(A, B)` pair instead of a single-channel edge
    pub fn on_sample_at(&self, a: bool, b: bool, timestamp_us: u64) {
        let next = ((a as u8) << 1) | (b as u8);
        if self.is_saturated(timestamp_us) {
            self.dropped_edges.fetch_add(1, Ordering::Relaxed);
            self.sync_levels(a, b);
            return;
        }

        let mut invalid = false;
        let mut moved = false;
        let _ = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                let (position, state, zero_refs) = unpack(w);
                let delta = TRANSITIONS[((state << 2) | next) as usize];
                invalid = delta == INVALID;
                moved = state != next;
                if invalid {
                    // Both channels changed: direction unknown, resync phase only.
                    return Some(pack(position, next, zero_refs));
                }
                if !moved {
                    return None;
                }
                Some(pack(position.wrapping_add(delta as i64), next, zero_refs))
            });
        if moved {
            self.last_edge_us.store(timestamp_us, Ordering::Release);
        }
        if invalid {
            self.invalid_transitions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Reference-channel falling edge: position to 0, count the event
    pub fn on_zero_reference(&self) {
        let _ = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                let (_, state, zero_refs) = unpack(w);
                Some(pack(0, state, zero_refs.wrapping_add(1)))
            });
        self.zero_references.fetch_add(1, Ordering::Relaxed);
    }

    /// Operator reset: position to 0 without counting a zero-reference
    pub fn reset_position(&self) {
        let _ = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                let (_, state, zero_refs) = unpack(w);
                Some(pack(0, state, zero_refs))
            });
    }

    pub fn read_position(&self) -> i64 {
        unpack(self.word.load(Ordering::Acquire)).0
    }

    /// Total zero-references since startup
    pub fn zero_references(&self) -> u64 {
        self.zero_references.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> EncoderSnapshot {
        let (position, _, zero_reference_count) = unpack(self.word.load(Ordering::Acquire));
        let last = self.last_edge_us.load(Ordering::Acquire);
        EncoderSnapshot {
            position,
            zero_reference_count,
            last_edge_us: (last != NO_EDGE).then_some(last),
        }
    }

    /// Edges dropped under saturation since the previous call
    pub fn take_dropped_edges(&self) -> u64 {
        self.dropped_edges.swap(0, Ordering::AcqRel)
    }

    /// Missed or illegal transitions since the previous call
    pub fn take_invalid_transitions(&self) -> u64 {
        self.invalid_transitions.swap(0, Ordering::AcqRel)
    }

    pub fn min_edge_interval_us(&self) -> u64 {
        self.min_edge_interval_us
    }

    #[inline]
    fn is_saturated(&self, timestamp_us: u64) -> bool {
        if self.min_edge_interval_us == 0 {
            return false;
        }
        let last = self.last_edge_us.load(Ordering::Acquire);
        last != NO_EDGE && timestamp_us.saturating_sub(last) < self.min_edge_interval_us
    }
}

impl std::fmt::Debug for PositionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionTracker")
            .field("snapshot", &self.snapshot())
            .field("min_edge_interval_us", &self.min_edge_interval_us)
            .finish()
    }
}

/// Belt speed in counts per second, exponentially smoothed
#[derive(Debug, Clone)]
pub struct SpeedEstimator {
    smoothing: f64,
    last: Option<(i64, u32, u64)>,
    speed: f64,
}

impl SpeedEstimator {
    /// `smoothing` in `(0, 1]`; 1.0 means no smoothing.
    pub fn new(smoothing: f64) -> Self {
        Self {
            smoothing: smoothing.clamp(f64::EPSILON, 1.0),
            last: None,
            speed: 0.0,
        }
    }

    pub fn update(&mut self, snapshot: &EncoderSnapshot, now_us: u64) -> f64 {
        let current = (snapshot.position, snapshot.zero_reference_count, now_us);
        if let Some((last_pos, last_zero_refs, last_us)) = self.last {
            let dt_us = now_us.saturating_sub(last_us);
            // A zero-reference in between makes the delta meaningless.
            if dt_us > 0 && last_zero_refs == snapshot.zero_reference_count {
                let instant = (snapshot.position - last_pos) as f64 * 1_000_000.0 / dt_us as f64;
                self.speed += self.smoothing * (instant - self.speed);
            }
        }
        self.last = Some(current);
        self.speed
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }
}

impl Default for SpeedEstimator {
    fn default() -> Self {
        Self::new(0.3)
    }
}
