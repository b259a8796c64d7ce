// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Application-level errors

use sorter_config::ConfigError;
use sorter_hal::CaptureError;
use sorter_pipeline::PipelineError;
use sorter_transports::TransportError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SorterError>;

#[derive(Debug, Error)]
pub enum SorterError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Camera could not be brought up at startup
    #[error("Hardware initialization failed: {0}")]
    HardwareInit(#[from] CaptureError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Coordinator thread '{0}' panicked")]
    ThreadPanicked(&'static str),
}
