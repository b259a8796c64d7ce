// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Common error types for all buses

use thiserror::Error;

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Broker unreachable or connection refused
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Broker rejected or never acknowledged a publish
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Not connected")]
    NotConnected,

    /// Malformed inbound command
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The bus refuses packets this large; resending cannot succeed
    #[error("Payload of {size} bytes exceeds the {max} byte packet limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The network context has exited
    #[error("Publisher service stopped")]
    ServiceStopped,
}

impl TransportError {
    /// Network failures worth another attempt after backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed(_)
                | Self::PublishFailed(_)
                | Self::Timeout
                | Self::ConnectionClosed
                | Self::NotConnected
        )
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_are_retryable() {
        assert!(TransportError::Timeout.is_retryable());
        assert!(TransportError::ConnectFailed("refused".into()).is_retryable());
        assert!(!TransportError::Protocol("bad json".into()).is_retryable());
        assert!(!TransportError::Serialization("nan".into()).is_retryable());
        assert!(!TransportError::PayloadTooLarge { size: 20_000, max: 10_240 }.is_retryable());
    }
}
