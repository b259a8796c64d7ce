// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Hardware Abstraction Layer (HAL) for the inspection sorter
//!
//! Platform-agnostic capabilities the pipeline is built on:
//! - Time management ([`TimeProvider`])
//! - Quadrature position tracking ([`PositionTracker`])
//! - Frame acquisition ([`Camera`])
//! - Grading ([`Grader`])
//!
//! The [`sim`] module provides scripted implementations for tools and tests.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod camera;
pub mod encoder;
pub mod grading;
pub mod sim;
pub mod time;

pub use camera::{Camera, CaptureError, Frame};
pub use encoder::{Channel, EncoderSnapshot, PositionTracker, SpeedEstimator, MAX_POSITION};
pub use grading::{FnGrader, Grade, GradeRecord, Grader, GradingError};
pub use time::{ManualClock, SystemClock, TimeProvider};
