// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! Every problem is collected so a single run reports all of them.

use crate::{ConfigError, ConfigResult, SorterConfig};
use std::collections::HashMap;

/// Validation errors that can occur during config validation
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    MissingRequired { field: String },
    InvalidValue { field: String, reason: String },
    TopicConflict { topic1: String, topic2: String, topic: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
            Self::TopicConflict {
                topic1,
                topic2,
                topic,
            } => {
                write!(
                    f,
                    "Topic conflict: {} and {} both use '{}'",
                    topic1, topic2, topic
                )
            }
        }
    }
}

/// Validate the complete configuration
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every failed rule
pub fn validate_config(config: &SorterConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_required_fields(config, &mut errors);
    validate_value_ranges(config, &mut errors);
    validate_topics(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn validate_required_fields(config: &SorterConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.system.client_id.trim().is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "system.client_id".to_string(),
        });
    }
    if config.mqtt.host.trim().is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "mqtt.host".to_string(),
        });
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigValidationError {
    ConfigValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn validate_value_ranges(config: &SorterConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.mqtt.port == 0 {
        errors.push(invalid("mqtt.port", "must not be 0"));
    }
    if config.trigger.trigger_distance <= 0 {
        errors.push(invalid(
            "trigger.trigger_distance",
            format!("must be > 0, got {}", config.trigger.trigger_distance),
        ));
    }
    if config.encoder.max_edge_rate_hz == 0 {
        errors.push(invalid("encoder.max_edge_rate_hz", "must be > 0"));
    }
    if config.capture.queue_depth == 0 {
        errors.push(invalid("capture.queue_depth", "must be at least 1"));
    }
    if config.publish.buffer_capacity == 0 {
        errors.push(invalid("publish.buffer_capacity", "must be at least 1"));
    }
    if config.publish.inline_threshold_bytes == 0 {
        errors.push(invalid("publish.inline_threshold_bytes", "must be > 0"));
    }
    if config.mqtt.reconnect_base_ms > config.mqtt.reconnect_max_ms {
        errors.push(invalid(
            "mqtt.reconnect_base_ms",
            format!(
                "{} exceeds mqtt.reconnect_max_ms ({})",
                config.mqtt.reconnect_base_ms, config.mqtt.reconnect_max_ms
            ),
        ));
    }
    if config.mqtt.max_reconnect_attempts == 0 {
        errors.push(invalid("mqtt.max_reconnect_attempts", "must be at least 1"));
    }
    if config.logging.retention_runs == 0 {
        errors.push(invalid(
            "logging.retention_runs",
            "must be at least 1 to keep the current run's logs",
        ));
    }
}

fn validate_topics(config: &SorterConfig, errors: &mut Vec<ConfigValidationError>) {
    let mut seen: HashMap<&str, &str> = HashMap::new();

    for (key, topic) in config.topics.all_topics() {
        if topic.trim().is_empty() {
            errors.push(ConfigValidationError::MissingRequired {
                field: key.to_string(),
            });
            continue;
        }
        if topic.contains('+') || topic.contains('#') {
            errors.push(invalid(key, "publish topics must not contain MQTT wildcards"));
        }
        if let Some(existing) = seen.get(topic) {
            errors.push(ConfigValidationError::TopicConflict {
                topic1: existing.to_string(),
                topic2: key.to_string(),
                topic: topic.to_string(),
            });
        } else {
            seen.insert(topic, key);
        }
    }
}
