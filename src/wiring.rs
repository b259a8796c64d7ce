// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration to component settings

use std::sync::Arc;
use std::time::Duration;

use sorter_config::{CaptureConfig, SorterConfig, TopicsConfig};
use sorter_hal::TimeProvider;
use sorter_pipeline::RetryPolicy;
use sorter_transports::{MessageBus, PublishPipeline, PublisherSettings, QoS, Topics};

pub fn topics(config: &TopicsConfig) -> Topics {
    Topics {
        images: config.images.clone(),
        status: config.status.clone(),
        results: config.results.clone(),
        alerts: config.alerts.clone(),
        heartbeat: config.heartbeat.clone(),
        commands: config.commands.clone(),
    }
}

pub fn retry_policy(config: &CaptureConfig) -> RetryPolicy {
    RetryPolicy {
        timeout: config.timeout(),
        max_retries: config.max_retries,
        retry_delay: config.retry_delay(),
    }
}

pub fn publisher_settings(config: &SorterConfig) -> PublisherSettings {
    PublisherSettings {
        client_id: config.system.client_id.clone(),
        buffer_capacity: config.publish.buffer_capacity,
        heartbeat_interval: Duration::from_millis(config.publish.heartbeat_interval_ms),
        connect_timeout: config.mqtt.connect_timeout(),
        publish_timeout: config.mqtt.publish_timeout(),
        reconnect_base_ms: config.mqtt.reconnect_base_ms,
        reconnect_max_ms: config.mqtt.reconnect_max_ms,
        max_reconnect_attempts: config.mqtt.max_reconnect_attempts,
        qos: QoS::AtLeastOnce,
    }
}

/// Publish pipeline over `bus`, configured from `config`
pub fn publish_pipeline<B: MessageBus>(
    config: &SorterConfig,
    bus: B,
    clock: Arc<dyn TimeProvider>,
) -> PublishPipeline<B> {
    PublishPipeline::new(bus, topics(&config.topics), publisher_settings(config), clock)
}

#[cfg(feature = "mqtt")]
pub fn mqtt_bus(config: &SorterConfig) -> sorter_transports::MqttBus {
    sorter_transports::MqttBus::new(sorter_transports::MqttBusConfig {
        client_id: config.system.client_id.clone(),
        host: config.mqtt.host.clone(),
        port: config.mqtt.port,
        username: config.mqtt.username.clone(),
        password: config.mqtt.password.clone(),
        keepalive: Duration::from_secs(config.mqtt.keepalive_secs),
        max_packet_size: sorter_transports::MqttBusConfig::packet_size_for_inline(
            config.publish.inline_threshold_bytes,
        ),
    })
}
