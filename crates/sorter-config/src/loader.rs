// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! Three tiers, later tiers win:
//! 1. TOML file (base values, missing keys fall back to defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{ConfigError, ConfigResult, SorterConfig};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "sorter_configuration.toml";

/// Find the sorter configuration file
///
/// Search order:
/// 1. `SORTER_CONFIG_PATH` environment variable
/// 2. Current working directory
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("SORTER_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by SORTER_CONFIG_PATH not found: {}",
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));

        let mut current = cwd.clone();
        for _ in 0..5 {
            match current.parent() {
                Some(parent) => {
                    search_paths.push(parent.join(CONFIG_FILE_NAME));
                    current = parent.to_path_buf();
                }
                None => break,
            }
        }
    }

    if let Some(found) = search_paths.iter().find(|p| p.exists()) {
        return Ok(found.clone());
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "'{}' not found in any of these locations:\n{}\n\nSet SORTER_CONFIG_PATH to specify a custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides
///
/// # Errors
///
/// Returns error if config file is not found or contains invalid TOML.
/// Validation is a separate step, see [`crate::validate_config`].
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<SorterConfig> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: SorterConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli);
    }

    Ok(config)
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `SORTER_MQTT_HOST` -> `mqtt.host`
/// - `SORTER_MQTT_PORT` -> `mqtt.port`
/// - `SORTER_MQTT_USERNAME` -> `mqtt.username`
/// - `SORTER_MQTT_PASSWORD` -> `mqtt.password`
/// - `SORTER_CLIENT_ID` -> `system.client_id`
/// - `SORTER_LOG_LEVEL` -> `system.log_level`
/// - `SORTER_DATA_DIR` -> `system.data_dir`
/// - `SORTER_TRIGGER_DISTANCE` -> `trigger.trigger_distance`
/// - `SORTER_INLINE_THRESHOLD` -> `publish.inline_threshold_bytes`
///
/// Values that fail to parse are ignored.
pub fn apply_environment_overrides(config: &mut SorterConfig) {
    if let Ok(value) = env::var("SORTER_MQTT_HOST") {
        config.mqtt.host = value;
    }
    if let Ok(value) = env::var("SORTER_MQTT_PORT") {
        if let Ok(port) = value.parse::<u16>() {
            config.mqtt.port = port;
        }
    }
    if let Ok(value) = env::var("SORTER_MQTT_USERNAME") {
        config.mqtt.username = Some(value);
    }
    if let Ok(value) = env::var("SORTER_MQTT_PASSWORD") {
        config.mqtt.password = Some(value);
    }

    if let Ok(value) = env::var("SORTER_CLIENT_ID") {
        config.system.client_id = value;
    }
    if let Ok(value) = env::var("SORTER_LOG_LEVEL") {
        config.system.log_level = value;
    }
    if let Ok(value) = env::var("SORTER_DATA_DIR") {
        config.system.data_dir = PathBuf::from(value);
    }

    if let Ok(value) = env::var("SORTER_TRIGGER_DISTANCE") {
        if let Ok(distance) = value.parse::<i64>() {
            config.trigger.trigger_distance = distance;
        }
    }
    if let Ok(value) = env::var("SORTER_INLINE_THRESHOLD") {
        if let Ok(threshold) = value.parse::<usize>() {
            config.publish.inline_threshold_bytes = threshold;
        }
    }
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - HashMap of CLI arguments (e.g., `{"mqtt_host": "10.0.0.5", "trigger_distance": "300"}`)
pub fn apply_cli_overrides(config: &mut SorterConfig, cli_args: &HashMap<String, String>) {
    if let Some(value) = cli_args.get("mqtt_host") {
        config.mqtt.host = value.clone();
    }
    if let Some(value) = cli_args.get("mqtt_port") {
        if let Ok(port) = value.parse::<u16>() {
            config.mqtt.port = port;
        }
    }

    if let Some(value) = cli_args.get("client_id") {
        config.system.client_id = value.clone();
    }
    if let Some(value) = cli_args.get("log_level") {
        config.system.log_level = value.clone();
    }

    if let Some(value) = cli_args.get("trigger_distance") {
        if let Ok(distance) = value.parse::<i64>() {
            config.trigger.trigger_distance = distance;
        }
    }
    if let Some(value) = cli_args.get("debounce_ms") {
        if let Ok(debounce) = value.parse::<u64>() {
            config.trigger.debounce_ms = debounce;
        }
    }
    if let Some(value) = cli_args.get("inline_threshold") {
        if let Ok(threshold) = value.parse::<usize>() {
            config.publish.inline_threshold_bytes = threshold;
        }
    }
}
