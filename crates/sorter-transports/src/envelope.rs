// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Outbound message envelopes and their wire JSON
//!
//! Field names and order are consumed by external subscribers and must not
//! change:
//!
//! | Family    | JSON |
//! |-----------|------|
//! | images    | `{type:"image", filename, size_bytes, encoding:"base64", content, timestamp}` |
//! | images    | `{type:"image_ref", filename, path, size_bytes, timestamp, note}` |
//! | status    | `{timestamp, client_id, status}` |
//! | results   | `{item_id, grade, length, diameter, defects}` |
//! | alerts    | `{type, level, message, timestamp}` |
//! | heartbeat | `{type:"heartbeat", timestamp}` |

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sorter_hal::GradeRecord;

use crate::common::TransportResult;

pub const IMAGE_REF_NOTE: &str = "image too large to inline; sending path only";

/// Wire timestamp for envelopes created now
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

/// One topic per envelope family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicFamily {
    Images,
    Status,
    Results,
    Alerts,
    Heartbeat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    ImageInline {
        filename: String,
        size_bytes: usize,
        /// Base64 of the image bytes
        content: String,
        timestamp: String,
    },
    ImageRef {
        filename: String,
        path: String,
        size_bytes: usize,
        timestamp: String,
    },
    Status {
        timestamp: String,
        client_id: String,
        status: String,
    },
    Result(GradeRecord),
    Alert {
        alert_type: String,
        level: AlertLevel,
        message: String,
        timestamp: String,
    },
    Heartbeat {
        timestamp: String,
    },
}

#[derive(Serialize)]
struct ImageInlineWire<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    filename: &'a str,
    size_bytes: usize,
    encoding: &'static str,
    content: &'a str,
    timestamp: &'a str,
}

#[derive(Serialize)]
struct ImageRefWire<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    filename: &'a str,
    path: &'a str,
    size_bytes: usize,
    timestamp: &'a str,
    note: &'static str,
}

#[derive(Serialize)]
struct StatusWire<'a> {
    timestamp: &'a str,
    client_id: &'a str,
    status: &'a str,
}

#[derive(Serialize)]
struct ResultWire<'a> {
    item_id: &'a str,
    grade: &'static str,
    length: f64,
    diameter: f64,
    defects: &'a [String],
}

#[derive(Serialize)]
struct AlertWire<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    level: AlertLevel,
    message: &'a str,
    timestamp: &'a str,
}

#[derive(Serialize)]
struct HeartbeatWire<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: &'a str,
}

impl OutboundMessage {
    pub fn status(client_id: impl Into<String>, status: impl Into<String>) -> Self {
        OutboundMessage::Status {
            timestamp: timestamp_now(),
            client_id: client_id.into(),
            status: status.into(),
        }
    }

    pub fn alert(alert_type: impl Into<String>, level: AlertLevel, message: impl Into<String>) -> Self {
        OutboundMessage::Alert {
            alert_type: alert_type.into(),
            level,
            message: message.into(),
            timestamp: timestamp_now(),
        }
    }

    pub fn heartbeat() -> Self {
        OutboundMessage::Heartbeat {
            timestamp: timestamp_now(),
        }
    }

    pub fn family(&self) -> TopicFamily {
        match self {
            OutboundMessage::ImageInline { .. } | OutboundMessage::ImageRef { .. } => {
                TopicFamily::Images
            }
            OutboundMessage::Status { .. } => TopicFamily::Status,
            OutboundMessage::Result(_) => TopicFamily::Results,
            OutboundMessage::Alert { .. } => TopicFamily::Alerts,
            OutboundMessage::Heartbeat { .. } => TopicFamily::Heartbeat,
        }
    }

    /// Results and alerts are the last to be evicted from a full buffer
    pub fn is_protected(&self) -> bool {
        matches!(
            self,
            OutboundMessage::Result(_) | OutboundMessage::Alert { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::ImageInline { .. } => "image",
            OutboundMessage::ImageRef { .. } => "image_ref",
            OutboundMessage::Status { .. } => "status",
            OutboundMessage::Result(_) => "result",
            OutboundMessage::Alert { .. } => "alert",
            OutboundMessage::Heartbeat { .. } => "heartbeat",
        }
    }

    /// Serialize to the wire JSON bytes
    pub fn to_payload(&self) -> TransportResult<Vec<u8>> {
        let bytes = match self {
            OutboundMessage::ImageInline {
                filename,
                size_bytes,
                content,
                timestamp,
            } => serde_json::to_vec(&ImageInlineWire {
                kind: "image",
                filename,
                size_bytes: *size_bytes,
                encoding: "base64",
                content,
                timestamp,
            })?,
            OutboundMessage::ImageRef {
                filename,
                path,
                size_bytes,
                timestamp,
            } => serde_json::to_vec(&ImageRefWire {
                kind: "image_ref",
                filename,
                path,
                size_bytes: *size_bytes,
                timestamp,
                note: IMAGE_REF_NOTE,
            })?,
            OutboundMessage::Status {
                timestamp,
                client_id,
                status,
            } => serde_json::to_vec(&StatusWire {
                timestamp,
                client_id,
                status,
            })?,
            OutboundMessage::Result(record) => serde_json::to_vec(&ResultWire {
                item_id: &record.item_id,
                grade: record.grade.as_str(),
                length: record.length_mm,
                diameter: record.diameter_mm,
                defects: &record.defects,
            })?,
            OutboundMessage::Alert {
                alert_type,
                level,
                message,
                timestamp,
            } => serde_json::to_vec(&AlertWire {
                kind: alert_type,
                level: *level,
                message,
                timestamp,
            })?,
            OutboundMessage::Heartbeat { timestamp } => serde_json::to_vec(&HeartbeatWire {
                kind: "heartbeat",
                timestamp,
            })?,
        };
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use sorter_hal::Grade;

    fn wire(message: &OutboundMessage) -> Value {
        serde_json::from_slice(&message.to_payload().unwrap()).unwrap()
    }

    #[test]
    fn result_has_exactly_five_fields() {
        let mut record = GradeRecord::new(Grade::A, 190.0, 14.0);
        record.item_id = "item_000001".to_string();
        let value = wire(&OutboundMessage::Result(record));

        assert_eq!(
            value,
            json!({
                "item_id": "item_000001",
                "grade": "A",
                "length": 190.0,
                "diameter": 14.0,
                "defects": []
            })
        );
    }

    #[test]
    fn alert_wire_format() {
        let value = wire(&OutboundMessage::alert("capture", AlertLevel::Error, "camera busy"));
        assert_eq!(value["type"], "capture");
        assert_eq!(value["level"], "error");
        assert_eq!(value["message"], "camera busy");
        assert!(value["timestamp"].is_string());
        assert_eq!(value.as_object().unwrap().len(), 4);
    }

    #[test]
    fn status_and_heartbeat_wire_format() {
        let status = wire(&OutboundMessage::status("pi_sorter", "online"));
        assert_eq!(status["client_id"], "pi_sorter");
        assert_eq!(status["status"], "online");
        assert_eq!(status.as_object().unwrap().len(), 3);

        let heartbeat = wire(&OutboundMessage::heartbeat());
        assert_eq!(heartbeat["type"], "heartbeat");
    }

    #[test]
    fn image_ref_carries_note_and_no_content() {
        let message = OutboundMessage::ImageRef {
            filename: "a.jpg".into(),
            path: "/data/images/a.jpg".into(),
            size_bytes: 900_000,
            timestamp: timestamp_now(),
        };
        let value = wire(&message);
        assert_eq!(value["type"], "image_ref");
        assert_eq!(value["note"], IMAGE_REF_NOTE);
        assert!(value.get("content").is_none());
    }

    #[test]
    fn protection_and_families() {
        assert!(OutboundMessage::Result(GradeRecord::new(Grade::B, 1.0, 1.0)).is_protected());
        assert!(OutboundMessage::alert("x", AlertLevel::Info, "y").is_protected());
        assert!(!OutboundMessage::heartbeat().is_protected());
        assert_eq!(OutboundMessage::status("c", "s").family(), TopicFamily::Status);
    }
}
