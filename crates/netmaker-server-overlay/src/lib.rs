// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Overlay network state engine.
//!
//! [`OverlayService`] owns every mutation of networks, hosts, nodes,
//! ext-clients, ACLs and enrollment keys. Each mutation runs under the
//! locks of the networks it touches, is checked against the network
//! invariants before commit, and signals [`DirtyNotifier::network_dirty`]
//! once per touched network after commit. The [`resolver`] turns a
//! [`NetworkSnapshot`] into per-node peer maps.

pub mod acl;
pub mod alloc;
pub mod config;
pub mod context;
pub mod error;
pub mod invariants;
pub mod locks;
pub mod metrics;
pub mod notify;
pub mod relay;
pub mod repo;
pub mod resolver;
pub mod service;
pub mod snapshot;

pub use config::OverlayConfig;
pub use context::{CancellationToken, OpContext};
pub use error::{ErrorKind, OverlayError, Result};
pub use invariants::Violation;
pub use metrics::{HostMetrics, MetricsMap};
pub use notify::{ChannelNotifier, DirtyNotifier, NoopNotifier, RecordingNotifier};
pub use resolver::{resolve, resolve_all};
pub use service::{
	CheckInOutcome, EnrollOutcome, EnrollmentKeySpec, ExtClientSpec, ExtClientUpdate, HostUpdate, NetworkUpdate,
	NodeOptions, NodeUpdate, OverlayService,
};
pub use snapshot::NetworkSnapshot;
