// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Raw still image as returned by the camera driver
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Capture failures
///
/// Transient variants are retried by the capture orchestrator, the rest fail
/// the trigger immediately.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture timed out after {0:?}")]
    Timeout(Duration),
    #[error("camera busy")]
    DeviceBusy,
    #[error("camera not found: {0}")]
    DeviceNotFound(String),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("camera error: {0}")]
    Device(String),
}

impl CaptureError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::Timeout(_) | CaptureError::DeviceBusy)
    }
}

/// Camera capability
///
/// The camera is a single physical resource: one caller at a time, enforced
/// by `&mut self`.
pub trait Camera: Send {
    /// Open and configure the device
    fn initialize(&mut self) -> Result<(), CaptureError>;

    /// Acquire one still frame within `timeout`
    ///
    /// Implementations must return by the deadline, with
    /// [`CaptureError::Timeout`] if no frame arrived: the caller's capture
    /// worker is blocked for as long as this call runs. Callers treat a frame
    /// delivered after the deadline as a timeout.
    fn capture_still(&mut self, timeout: Duration) -> Result<Frame, CaptureError>;

    /// Release the device. Must be safe to call more than once.
    fn release(&mut self);

    fn name(&self) -> &str {
        "camera"
    }
}

impl<C: Camera + ?Sized> Camera for Box<C> {
    fn initialize(&mut self) -> Result<(), CaptureError> {
        (**self).initialize()
    }

    fn capture_still(&mut self, timeout: Duration) -> Result<Frame, CaptureError> {
        (**self).capture_still(timeout)
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(CaptureError::Timeout(Duration::from_millis(5)).is_transient());
        assert!(CaptureError::DeviceBusy.is_transient());
        assert!(!CaptureError::DeviceNotFound("/dev/video0".into()).is_transient());
        assert!(!CaptureError::UnsupportedFormat("YUYV".into()).is_transient());
        assert!(!CaptureError::Device("sensor fault".into()).is_transient());
    }
}
