// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Common types shared by every bus implementation

pub mod error;

pub use error::{TransportError, TransportResult};

/// Milliseconds in the network context's monotonic clock domain
pub type NowMs = u64;
