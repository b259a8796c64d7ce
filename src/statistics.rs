// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Runtime counters shared by the coordinator threads

use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use sorter_hal::Grade;
use sorter_transports::PublishStats;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GradeCounts {
    pub a: u64,
    pub b: u64,
    pub c: u64,
}

impl GradeCounts {
    pub fn record(&mut self, grade: Grade) {
        match grade {
            Grade::A => self.a += 1,
            Grade::B => self.b += 1,
            Grade::C => self.c += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.a + self.b + self.c
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemStatistics {
    // Triggering
    pub triggers_fired: u64,
    pub triggers_suppressed: u64,
    /// Oldest pending triggers dropped from a full capture queue
    pub triggers_dropped: u64,

    // Capture
    pub captures_succeeded: u64,
    /// Transient failures that were retried or exhausted the retries
    pub capture_transient_failures: u64,
    /// Triggers whose capture ultimately failed
    pub capture_failures: u64,
    pub capture_permanent_failures: u64,

    // Grading
    pub graded: GradeCounts,
    pub grading_errors: u64,

    // Images
    pub images_inline: u64,
    pub images_referenced: u64,

    // Encoder
    pub encoder_position: i64,
    pub encoder_speed: f64,
    pub zero_references: u64,
    pub encoder_dropped_edges: u64,
    pub encoder_invalid_transitions: u64,

    pub publish: PublishStats,
    pub uptime_secs: u64,
}

#[derive(Debug)]
pub struct StatisticsCollector {
    inner: Mutex<SystemStatistics>,
    started: Instant,
}

impl StatisticsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SystemStatistics::default()),
            started: Instant::now(),
        }
    }

    /// Apply a mutation under the lock
    pub fn update<F: FnOnce(&mut SystemStatistics)>(&self, f: F) {
        f(&mut *self.inner.lock());
    }

    pub fn snapshot(&self, publish: PublishStats) -> SystemStatistics {
        let mut stats = self.inner.lock().clone();
        stats.publish = publish;
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

impl Default for StatisticsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_are_visible_in_snapshot() {
        let collector = StatisticsCollector::new();
        collector.update(|s| {
            s.triggers_fired += 2;
            s.graded.record(Grade::A);
            s.graded.record(Grade::C);
        });

        let publish = PublishStats {
            messages_sent: 9,
            ..PublishStats::default()
        };
        let stats = collector.snapshot(publish);
        assert_eq!(stats.triggers_fired, 2);
        assert_eq!(stats.graded.total(), 2);
        assert_eq!(stats.publish.messages_sent, 9);
    }
}
