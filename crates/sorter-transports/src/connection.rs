// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Broker link state machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reconnecting -> Connected
//!                     |                           |
//!                     +-> Reconnecting            +-> Disconnected (fatal)
//! ```
//!
//! The machine performs no I/O and never sleeps. It is fed link events and
//! the current time, and answers with actions for the owner to carry out.
//! Retries are scheduled as deadlines and fired from [`ConnectionStateMachine::poll_timer`].

use std::fmt;

use tracing::{error, info, warn};

use crate::common::NowMs;
use crate::reconnect::ReconnectionStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected { fatal: bool },
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected { fatal: true } => write!(f, "disconnected (fatal)"),
            ConnectionState::Disconnected { fatal: false } => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectSucceeded,
    /// Includes connect timeouts
    ConnectFailed(String),
    ConnectionLost(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    AttemptConnect,
    FlushBuffer,
    ReportFatal { attempts: u32, reason: String },
}

pub struct ConnectionStateMachine {
    state: ConnectionState,
    strategy: ReconnectionStrategy,
    next_attempt_at: Option<NowMs>,
    attempt_in_flight: bool,
    ever_connected: bool,
    disconnections: u64,
    reconnects: u64,
    last_error: Option<String>,
}

impl ConnectionStateMachine {
    pub fn new(strategy: ReconnectionStrategy) -> Self {
        Self {
            state: ConnectionState::Disconnected { fatal: false },
            strategy,
            next_attempt_at: None,
            attempt_in_flight: false,
            ever_connected: false,
            disconnections: 0,
            reconnects: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_fatal(&self) -> bool {
        self.state == ConnectionState::Disconnected { fatal: true }
    }

    pub fn next_attempt_at(&self) -> Option<NowMs> {
        self.next_attempt_at
    }

    pub fn disconnections(&self) -> u64 {
        self.disconnections
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// First connection attempt; ignored unless idle and not fatal
    pub fn start(&mut self, _now: NowMs) -> Vec<LinkAction> {
        if self.state != (ConnectionState::Disconnected { fatal: false }) {
            return Vec::new();
        }
        self.state = ConnectionState::Connecting;
        self.attempt_in_flight = true;
        info!("[LINK] connecting");
        vec![LinkAction::AttemptConnect]
    }

    pub fn handle(&mut self, now: NowMs, event: LinkEvent) -> Vec<LinkAction> {
        match (self.state, event) {
            (
                ConnectionState::Connecting | ConnectionState::Reconnecting,
                LinkEvent::ConnectSucceeded,
            ) => {
                if self.ever_connected {
                    self.reconnects += 1;
                    info!(
                        "[LINK] reconnected after {} attempt(s)",
                        self.strategy.attempt_number()
                    );
                } else {
                    info!("[LINK] connected");
                }
                self.state = ConnectionState::Connected;
                self.ever_connected = true;
                self.attempt_in_flight = false;
                self.next_attempt_at = None;
                self.last_error = None;
                self.strategy.reset();
                vec![LinkAction::FlushBuffer]
            }
            (
                ConnectionState::Connecting | ConnectionState::Reconnecting,
                LinkEvent::ConnectFailed(reason),
            ) => {
                self.attempt_in_flight = false;
                warn!("[LINK] connect attempt failed: {}", reason);
                self.schedule_retry(now, reason)
            }
            (ConnectionState::Connected, LinkEvent::ConnectionLost(reason)) => {
                self.disconnections += 1;
                warn!("[LINK] connection lost: {}", reason);
                self.schedule_retry(now, reason)
            }
            (state, event) => {
                tracing::debug!("[LINK] ignoring {:?} in state {}", event, state);
                Vec::new()
            }
        }
    }

    /// Fire a due retry
    pub fn poll_timer(&mut self, now: NowMs) -> Option<LinkAction> {
        if self.state != ConnectionState::Reconnecting || self.attempt_in_flight {
            return None;
        }
        match self.next_attempt_at {
            Some(due) if now >= due => {
                self.next_attempt_at = None;
                self.attempt_in_flight = true;
                info!(
                    "[LINK] reconnect attempt {}/{}",
                    self.strategy.attempt_number(),
                    self.strategy.max_attempts()
                );
                Some(LinkAction::AttemptConnect)
            }
            _ => None,
        }
    }

    /// Deliberate close; no retries follow
    pub fn shutdown(&mut self) {
        if !self.is_fatal() {
            self.state = ConnectionState::Disconnected { fatal: false };
        }
        self.next_attempt_at = None;
        self.attempt_in_flight = false;
    }

    fn schedule_retry(&mut self, now: NowMs, reason: String) -> Vec<LinkAction> {
        self.last_error = Some(reason.clone());
        match self.strategy.next_backoff() {
            Some(backoff) => {
                self.state = ConnectionState::Reconnecting;
                self.next_attempt_at = Some(now + backoff.as_millis() as u64);
                info!("[LINK] retrying in {:?}", backoff);
                Vec::new()
            }
            None => {
                let attempts = self.strategy.attempt_number();
                self.state = ConnectionState::Disconnected { fatal: true };
                self.next_attempt_at = None;
                error!(
                    "[LINK] giving up after {} reconnect attempt(s): {}",
                    attempts, reason
                );
                vec![LinkAction::ReportFatal { attempts, reason }]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(max_attempts: u32) -> ConnectionStateMachine {
        ConnectionStateMachine::new(ReconnectionStrategy::new(100, 1000, max_attempts))
    }

    #[test]
    fn connect_then_flush() {
        let mut link = machine(3);
        assert_eq!(link.start(0), vec![LinkAction::AttemptConnect]);
        assert_eq!(link.state(), ConnectionState::Connecting);

        assert_eq!(
            link.handle(5, LinkEvent::ConnectSucceeded),
            vec![LinkAction::FlushBuffer]
        );
        assert!(link.is_connected());
    }

    #[test]
    fn loss_schedules_backoff_retry() {
        let mut link = machine(3);
        link.start(0);
        link.handle(0, LinkEvent::ConnectSucceeded);

        assert!(link
            .handle(1000, LinkEvent::ConnectionLost("reset".into()))
            .is_empty());
        assert_eq!(link.state(), ConnectionState::Reconnecting);
        assert_eq!(link.next_attempt_at(), Some(1100));

        assert_eq!(link.poll_timer(1099), None);
        assert_eq!(link.poll_timer(1100), Some(LinkAction::AttemptConnect));
        // only one attempt in flight
        assert_eq!(link.poll_timer(5000), None);

        link.handle(1101, LinkEvent::ConnectFailed("refused".into()));
        assert_eq!(link.next_attempt_at(), Some(1301));

        link.poll_timer(1301);
        assert_eq!(
            link.handle(1302, LinkEvent::ConnectSucceeded),
            vec![LinkAction::FlushBuffer]
        );
        assert_eq!(link.reconnects(), 1);
        assert_eq!(link.disconnections(), 1);
    }

    #[test]
    fn exhausted_attempts_are_fatal() {
        let mut link = machine(2);
        link.start(0);
        let mut now = 0;
        link.handle(now, LinkEvent::ConnectFailed("timeout".into()));

        for _ in 0..2 {
            now = link.next_attempt_at().unwrap();
            assert_eq!(link.poll_timer(now), Some(LinkAction::AttemptConnect));
            let actions = link.handle(now, LinkEvent::ConnectFailed("timeout".into()));
            if link.is_fatal() {
                assert_eq!(
                    actions,
                    vec![LinkAction::ReportFatal {
                        attempts: 2,
                        reason: "timeout".into()
                    }]
                );
            }
        }

        assert!(link.is_fatal());
        assert_eq!(link.poll_timer(u64::MAX), None);
        assert!(link.start(now).is_empty());
    }

    #[test]
    fn backoff_resets_after_success() {
        let mut link = machine(5);
        link.start(0);
        link.handle(0, LinkEvent::ConnectFailed("x".into()));
        link.poll_timer(100);
        link.handle(100, LinkEvent::ConnectFailed("x".into()));
        link.poll_timer(300);
        link.handle(300, LinkEvent::ConnectSucceeded);

        link.handle(400, LinkEvent::ConnectionLost("y".into()));
        assert_eq!(link.next_attempt_at(), Some(500));
    }

    #[test]
    fn shutdown_stops_retries() {
        let mut link = machine(5);
        link.start(0);
        link.handle(0, LinkEvent::ConnectFailed("x".into()));
        link.shutdown();
        assert_eq!(link.poll_timer(10_000), None);
        assert_eq!(link.state(), ConnectionState::Disconnected { fatal: false });
    }
}
