// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Time and delay abstraction
///
/// Every timer-driven policy (edge rate limiting, debounce, capture retry,
/// reconnect backoff, heartbeats) reads time through this trait so tests can
/// substitute a [`ManualClock`].
pub trait TimeProvider: Send + Sync {
    /// Monotonic timestamp in microseconds since the clock was created
    fn get_time_us(&self) -> u64;

    /// Block for the specified number of microseconds
    fn delay_us(&self, us: u64);

    fn get_time_ms(&self) -> u64 {
        self.get_time_us() / 1000
    }

    fn delay_ms(&self, ms: u64) {
        self.delay_us(ms.saturating_mul(1000));
    }

    fn delay(&self, duration: Duration) {
        self.delay_us(duration.as_micros().min(u64::MAX as u128) as u64);
    }
}

/// Wall-clock implementation backed by [`Instant`]
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProvider for SystemClock {
    fn get_time_us(&self) -> u64 {
        self.origin.elapsed().as_micros().min(u64::MAX as u128) as u64
    }

    fn delay_us(&self, us: u64) {
        std::thread::sleep(Duration::from_micros(us));
    }
}

/// Virtual clock for deterministic tests
///
/// Clones share the same time. Delays advance virtual time instead of
/// sleeping.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_us: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at_ms(ms: u64) -> Self {
        let clock = Self::new();
        clock.set_us(ms * 1000);
        clock
    }

    pub fn set_us(&self, us: u64) {
        self.now_us.store(us, Ordering::SeqCst);
    }

    pub fn advance_us(&self, us: u64) {
        self.now_us.fetch_add(us, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance_us(ms * 1000);
    }
}

impl TimeProvider for ManualClock {
    fn get_time_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }

    fn delay_us(&self, us: u64) {
        self.advance_us(us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_delay_advances_time() {
        let clock = ManualClock::starting_at_ms(10);
        let shared = clock.clone();

        clock.delay_ms(5);
        shared.delay(Duration::from_micros(250));

        assert_eq!(clock.get_time_us(), 15_250);
        assert_eq!(shared.get_time_ms(), 15);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.get_time_us();
        clock.delay_us(200);
        assert!(clock.get_time_us() >= first + 200);
    }
}
