// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # sorter-pipeline
//!
//! The worker-side stages between the encoder and the network:
//!
//! ```text
//! EncoderSnapshot -> TriggerController -> CaptureQueue -> CaptureOrchestrator
//!                                                      -> ClassificationAdapter
//! ```
//!
//! Nothing in here touches the network; the coordinator turns stage
//! outcomes into outbound messages.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod capture;
pub mod classify;
pub mod error;
pub mod queue;
pub mod trigger;

pub use capture::{CaptureOrchestrator, CaptureOutcome, CaptureResult, RetryPolicy};
pub use classify::ClassificationAdapter;
pub use error::{PipelineError, Result};
pub use queue::{CaptureQueue, PushOutcome, QueuePop};
pub use trigger::{TriggerController, TriggerDecision, TriggerEvent, TriggerState};
