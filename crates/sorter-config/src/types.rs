// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `sorter_configuration.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SorterConfig {
    pub system: SystemConfig,
    pub encoder: EncoderConfig,
    pub trigger: TriggerConfig,
    pub capture: CaptureConfig,
    pub publish: PublishConfig,
    pub mqtt: MqttConfig,
    pub topics: TopicsConfig,
    pub shutdown: ShutdownConfig,
    pub logging: LoggingConfig,
}

/// System-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Identifier reported in status envelopes and used as the MQTT client id
    pub client_id: String,
    pub log_level: String,
    pub data_dir: PathBuf,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            client_id: "pi_sorter".to_string(),
            log_level: "info".to_string(),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Rotary encoder wiring and sampling
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// BCM pin numbers, recorded for the GPIO layer that feeds edges in
    pub pin_a: u8,
    pub pin_b: u8,
    pub pin_z: Option<u8>,
    /// Edges arriving faster than this are dropped and counted
    pub max_edge_rate_hz: u32,
    /// How often the trigger sampler reads the position snapshot
    pub sample_interval_ms: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            pin_a: 5,
            pin_b: 6,
            pin_z: Some(13),
            max_edge_rate_hz: 200_000,
            sample_interval_ms: 1,
        }
    }
}

impl EncoderConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// Threshold crossing and debounce policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Encoder counts between two captures
    pub trigger_distance: i64,
    /// Minimum wall-clock interval between two fired triggers
    pub debounce_ms: u64,
    pub enabled: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            trigger_distance: 150,
            debounce_ms: 200,
            enabled: true,
        }
    }
}

/// Camera capture orchestration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub timeout_ms: u64,
    /// Additional attempts after the first one, transient failures only
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Pending trigger events kept while a capture is in flight
    pub queue_depth: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            max_retries: 2,
            retry_delay_ms: 100,
            queue_depth: 8,
        }
    }
}

impl CaptureConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Outbound encoding and buffering
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Images up to this size are sent inline as base64
    pub inline_threshold_bytes: usize,
    /// Where oversized images are persisted before an `image_ref` is sent
    pub image_dir: PathBuf,
    /// Messages kept while the broker link is down
    pub buffer_capacity: usize,
    /// 0 disables heartbeats
    pub heartbeat_interval_ms: u64,
    /// Cadence of the network context loop
    pub tick_interval_ms: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            inline_threshold_bytes: 512_000,
            image_dir: PathBuf::from("data/images"),
            buffer_capacity: 1_000,
            heartbeat_interval_ms: 30_000,
            tick_interval_ms: 50,
        }
    }
}

/// Broker connection
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keepalive_secs: u64,
    pub connect_timeout_ms: u64,
    pub publish_timeout_ms: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            keepalive_secs: 60,
            connect_timeout_ms: 5_000,
            publish_timeout_ms: 5_000,
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 60_000,
            max_reconnect_attempts: 10,
        }
    }
}

impl MqttConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

/// Fixed topic names, one per envelope family
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TopicsConfig {
    pub images: String,
    pub status: String,
    pub results: String,
    pub alerts: String,
    pub heartbeat: String,
    /// Inbound control commands
    pub commands: String,
}

impl Default for TopicsConfig {
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

impl TopicsConfig {
    /// All topics with their configuration key, for validation
    pub fn all_topics(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("topics.images", self.images.as_str()),
            ("topics.status", self.status.as_str()),
            ("topics.results", self.results.as_str()),
            ("topics.alerts", self.alerts.as_str()),
            ("topics.heartbeat", self.heartbeat.as_str()),
            ("topics.commands", self.commands.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Budget for draining in-flight capture and publish work
    pub grace_period_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 5_000,
        }
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Log file output and retention
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub retention_days: u64,
    pub retention_runs: usize,
    pub file_logging: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            retention_days: 30,
            retention_runs: 10,
            file_logging: true,
        }
    }
}
