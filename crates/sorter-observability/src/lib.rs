// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # sorter-observability
//!
//! Logging infrastructure shared by every sorter crate, with per-crate
//! debug flag support.
//!
//! ## Features
//! - `file-logging`: JSON run logs with retention (enabled by default)

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod init;

pub use cli::*;
pub use init::*;

/// Known sorter crate names for debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "sorter",
    "sorter-config",
    "sorter-hal",
    "sorter-pipeline",
    "sorter-transports",
];

/// Tracing target for a crate name (`sorter-hal` -> `sorter_hal`)
pub fn crate_target(crate_name: &str) -> String {
    crate_name.replace('-', "_")
}
