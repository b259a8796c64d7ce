// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # sorter-transports
//!
//! Outbound side of the inspection sorter: wire envelopes, the
//! inline-vs-reference image policy, a priority-aware outbound buffer, the
//! broker link state machine with exponential backoff, and the publish
//! pipeline that ties them to a [`bus::MessageBus`].
//!
//! ## Buses
//!
//! - [`mqtt::MqttBus`] (feature `mqtt`, on by default) over `rumqttc`
//! - [`memory::InMemoryBus`] for simulation and tests
//!
//! ## Threading
//!
//! [`publisher::PublishPipeline`] is single-threaded and driven by `tick`.
//! [`publisher::PublisherService`] runs it on a dedicated network thread and
//! hands out cloneable [`publisher::PublisherHandle`]s.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sorter_hal::SystemClock;
//! use sorter_transports::prelude::*;
//!
//! let pipeline = PublishPipeline::new(
//!     InMemoryBus::new(),
//!     Topics::default(),
//!     PublisherSettings::default(),
//!     Arc::new(SystemClock::new()),
//! );
//! let service = PublisherService::spawn(pipeline, Duration::from_millis(50))?;
//! service.handle().publish(OutboundMessage::status("pi_sorter", "online"))?;
//! service.shutdown(None, Duration::from_secs(1));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod buffer;
pub mod bus;
pub mod common;
pub mod connection;
pub mod control;
pub mod encoding;
pub mod envelope;
pub mod memory;
pub mod publisher;
pub mod reconnect;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use common::{NowMs, TransportError, TransportResult};

pub use buffer::{BufferPush, OutboundBuffer};
pub use bus::{Ack, BusEvent, MessageBus, QoS};
pub use connection::{ConnectionState, ConnectionStateMachine, LinkAction, LinkEvent};
pub use control::{parse_command, topic_matches, ControlCommand};
pub use encoding::{
    decode_inline, image_filename, EncodingPolicy, FsImageStore, ImageStore,
    DEFAULT_INLINE_THRESHOLD,
};
pub use envelope::{AlertLevel, OutboundMessage, TopicFamily};
pub use memory::{BusProbe, InMemoryBus, PublishedMessage};
pub use publisher::{
    PublishPipeline, PublishStats, PublisherHandle, PublisherService, PublisherSettings, Topics,
};
pub use reconnect::ReconnectionStrategy;

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttBus, MqttBusConfig};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bus::*;
    pub use crate::common::*;
    pub use crate::encoding::{EncodingPolicy, FsImageStore, ImageStore};
    pub use crate::envelope::*;
    pub use crate::memory::{BusProbe, InMemoryBus};
    pub use crate::publisher::*;

    #[cfg(feature = "mqtt")]
    pub use crate::mqtt::{MqttBus, MqttBusConfig};
}
