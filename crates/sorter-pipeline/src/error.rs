// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use sorter_hal::{CaptureError, GradingError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("trigger distance must be positive, got {0}")]
    InvalidTriggerDistance(i64),

    #[error("capture queue is closed")]
    QueueClosed,

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Grading(#[from] GradingError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
