// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # sorter - encoder-triggered inspection sorter
//!
//! Tracks a conveyor with a quadrature encoder, fires a capture every
//! `trigger_distance` counts, grades each image and publishes images,
//! results, alerts and status over a message bus that survives broker
//! outages.
//!
//! ## Crates
//!
//! - [`config`]: TOML configuration with environment and CLI overrides
//! - [`observability`]: tracing setup and log retention
//! - [`hal`]: clocks, encoder decoding, camera and grader seams, simulators
//! - [`pipeline`]: trigger controller, capture queue, retries, classification
//! - [`transports`]: envelopes, outbound buffer, link state machine, buses
//!
//! This crate wires them together in [`coordinator::SystemCoordinator`].
//!
//! ## Feature Flags
//!
//! - **`mqtt`** (default): MQTT bus over `rumqttc`
//! - **`file-logging`** (default): JSON run logs with retention
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sorter::prelude::*;
//!
//! let config = SorterConfig::default();
//! let clock: Arc<dyn TimeProvider> = Arc::new(SystemClock::new());
//! let hardware = SorterHardware {
//!     tracker: Arc::new(PositionTracker::new(Arc::clone(&clock), 0)),
//!     camera: Box::new(SimulatedCamera::new(4096)),
//!     grader: Arc::new(FixedGrader::new(GradeRecord::new(Grade::A, 190.0, 14.0))),
//!     image_store: Arc::new(FsImageStore::new(&config.publish.image_dir)),
//!     clock,
//! };
//!
//! let coordinator = SystemCoordinator::from_config(&config, hardware, InMemoryBus::new())?;
//! let stats = coordinator.shutdown()?;
//! println!("{} item(s) graded", stats.graded.total());
//! # Ok::<(), sorter::SorterError>(())
//! ```

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use sorter_config as config;
pub use sorter_hal as hal;
pub use sorter_observability as observability;
pub use sorter_pipeline as pipeline;
pub use sorter_transports as transports;

pub mod coordinator;
pub mod error;
pub mod history;
pub mod statistics;
pub mod wiring;

pub use coordinator::{CoordinatorSettings, RunState, SorterHardware, SystemCoordinator};
pub use error::{Result, SorterError};
pub use history::{CsvRow, ExportFormat, GradeDistribution, HistoryEntry, ResultHistory};
pub use statistics::{GradeCounts, StatisticsCollector, SystemStatistics};

/// Prelude - commonly used types and traits
pub mod prelude {
    pub use crate::coordinator::{CoordinatorSettings, RunState, SorterHardware, SystemCoordinator};
    pub use crate::error::{Result, SorterError};
    pub use crate::statistics::SystemStatistics;

    pub use sorter_config::{load_config, SorterConfig};
    pub use sorter_hal::sim::{FixedGrader, SimulatedCamera, SimulatedEncoder};
    pub use sorter_hal::{
        Camera, Grade, GradeRecord, Grader, PositionTracker, SystemClock, TimeProvider,
    };
    pub use sorter_transports::{
        ControlCommand, FsImageStore, InMemoryBus, MessageBus, OutboundMessage,
    };

    #[cfg(feature = "mqtt")]
    pub use sorter_transports::MqttBus;
}
