// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Reconnection backoff
//!
//! Pure arithmetic: the caller schedules the next attempt on its own clock.

use std::time::Duration;

/// Exponential backoff with a ceiling and an attempt budget
#[derive(Debug, Clone)]
pub struct ReconnectionStrategy {
    base_backoff_ms: u64,
    max_backoff_ms: u64,
    current_attempt: u32,
    /// 0 = unlimited
    max_attempts: u32,
}

impl ReconnectionStrategy {
    pub fn new(base_backoff_ms: u64, max_backoff_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_backoff_ms,
            max_backoff_ms: max_backoff_ms.max(base_backoff_ms),
            current_attempt: 0,
            max_attempts,
        }
    }

    /// Delay before the next attempt, or `None` once the budget is spent
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        self.current_attempt += 1;

        // base * 2^(attempt - 1), capped
        let exp = 2u64.saturating_pow(self.current_attempt - 1);
        let backoff_ms = self
            .base_backoff_ms
            .saturating_mul(exp)
            .min(self.max_backoff_ms);

        Some(Duration::from_millis(backoff_ms))
    }

    /// After a successful connection
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    pub fn attempt_number(&self) -> u32 {
        self.current_attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_attempts > 0 && self.current_attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let mut strategy = ReconnectionStrategy::new(100, 60_000, 5);

        assert_eq!(strategy.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(strategy.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(strategy.next_backoff(), Some(Duration::from_millis(400)));
        assert_eq!(strategy.next_backoff(), Some(Duration::from_millis(800)));
        assert_eq!(strategy.next_backoff(), Some(Duration::from_millis(1600)));
        assert_eq!(strategy.next_backoff(), None);
    }

    #[test]
    fn test_backoff_capped() {
        let mut strategy = ReconnectionStrategy::new(1000, 60_000, 20);
        for _ in 0..10 {
            strategy.next_backoff();
        }
        assert_eq!(strategy.next_backoff(), Some(Duration::from_millis(60_000)));
    }

    #[test]
    fn test_reset() {
        let mut strategy = ReconnectionStrategy::new(100, 1000, 5);
        strategy.next_backoff();
        strategy.next_backoff();
        assert_eq!(strategy.attempt_number(), 2);

        strategy.reset();
        assert_eq!(strategy.attempt_number(), 0);
        assert_eq!(strategy.next_backoff(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_is_exhausted() {
        let mut strategy = ReconnectionStrategy::new(100, 1000, 2);
        assert!(!strategy.is_exhausted());
        strategy.next_backoff();
        assert!(!strategy.is_exhausted());
        strategy.next_backoff();
        assert!(strategy.is_exhausted());
    }

    #[test]
    fn test_unlimited_attempts_do_not_overflow() {
        let mut strategy = ReconnectionStrategy::new(100, 5000, 0);
        for _ in 0..200 {
            assert!(strategy.next_backoff().is_some());
        }
        assert!(!strategy.is_exhausted());
    }
}
