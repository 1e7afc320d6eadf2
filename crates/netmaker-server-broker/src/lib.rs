// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Change broker.
//!
//! Consumes the `NetworkDirty` signals emitted by the overlay service,
//! reconciles each dirty network into per-host [`PeerUpdate`]s and hands
//! them to a [`Publisher`]. Delivery is at-least-once; every update carries
//! a sequence number that only grows, so hosts can drop duplicates.
//!
//! [`PeerUpdate`]: netmaker_common_model::PeerUpdate

pub mod broker;
pub mod config;
pub mod error;
pub mod publisher;
pub mod sequence;

pub use broker::{Broker, BrokerStats};
pub use config::BrokerConfig;
pub use error::{BrokerError, Result};
pub use publisher::{BroadcastPublisher, MemoryPublisher, Publisher};
pub use sequence::SequenceClock;
