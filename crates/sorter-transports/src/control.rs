// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Inbound control commands
//!
//! Payloads are `{"command": "<name>", "value": <optional>}`. Anything that
//! does not parse is a `TransportError::Protocol`, which callers log and
//! ignore.

use serde::Deserialize;

use crate::common::{TransportError, TransportResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Stop accepting triggers
    Pause,
    Resume,
    ResetPosition,
    SetTriggerDistance(i64),
    /// Publish a status message now
    Status,
}

#[derive(Debug, Deserialize)]
struct CommandWire {
    command: String,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

pub fn parse_command(payload: &[u8]) -> TransportResult<ControlCommand> {
    let wire: CommandWire = serde_json::from_slice(payload)
        .map_err(|e| TransportError::Protocol(format!("malformed command: {}", e)))?;

    match wire.command.trim() {
        "pause" | "stop_sorting" => Ok(ControlCommand::Pause),
        "resume" | "start_sorting" => Ok(ControlCommand::Resume),
        "reset_position" => Ok(ControlCommand::ResetPosition),
        "status" | "get_status" => Ok(ControlCommand::Status),
        "set_trigger_distance" => {
            let distance = wire
                .value
                .as_ref()
                .and_then(|v| v.as_i64())
                .ok_or_else(|| {
                    TransportError::Protocol(
                        "set_trigger_distance requires an integer value".to_string(),
                    )
                })?;
            if distance <= 0 {
                return Err(TransportError::Protocol(format!(
                    "trigger distance must be positive, got {}",
                    distance
                )));
            }
            Ok(ControlCommand::SetTriggerDistance(distance))
        }
        other => Err(TransportError::Protocol(format!(
            "unknown command '{}'",
            other
        ))),
    }
}

/// MQTT topic filter matching with `+` (one level) and `#` (remaining levels)
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!(
            parse_command(br#"{"command":"pause"}"#).unwrap(),
            ControlCommand::Pause
        );
        assert_eq!(
            parse_command(br#"{"command":"start_sorting"}"#).unwrap(),
            ControlCommand::Resume
        );
        assert_eq!(
            parse_command(br#"{"command":"set_trigger_distance","value":300}"#).unwrap(),
            ControlCommand::SetTriggerDistance(300)
        );
    }

    #[test]
    fn malformed_commands_are_protocol_errors() {
        let payloads: [&[u8]; 6] = [
            b"not json",
            br#"{"cmd":"pause"}"#,
            br#"{"command":"explode"}"#,
            br#"{"command":"set_trigger_distance"}"#,
            br#"{"command":"set_trigger_distance","value":-5}"#,
            br#"{"command":"set_trigger_distance","value":"ten"}"#,
        ];
        for payload in payloads {
            assert!(
                matches!(parse_command(payload), Err(TransportError::Protocol(_))),
                "{}",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[test]
    fn wildcard_matching() {
        assert!(topic_matches("pi_sorter/commands", "pi_sorter/commands"));
        assert!(topic_matches("pi_sorter/+", "pi_sorter/commands"));
        assert!(!topic_matches("pi_sorter/+", "pi_sorter/commands/extra"));
        assert!(topic_matches("pi_sorter/#", "pi_sorter/commands/extra"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("pi_sorter/commands", "pi_sorter/status"));
        assert!(!topic_matches("pi_sorter/commands/x", "pi_sorter/commands"));
    }
}
