// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Overlay-network data model shared by the netmaker server crates.
//!
//! Every persisted entity carries a `schema_version`; payloads written
//! before the field existed deserialize with the current version.

pub mod acl;
pub mod checkin;
pub mod enrollment;
pub mod error;
pub mod ext_client;
pub mod host;
pub mod ids;
pub mod keys;
pub mod network;
pub mod node;
pub mod peer_update;
pub mod relay_state;
pub mod validate;

pub use acl::{AclContainer, AclMatrix, AclValue};
pub use checkin::{CheckIn, PeerMetric, StunObservation};
pub use enrollment::{EnrollmentKey, EnrollmentKeyKind};
pub use error::{Result, ValidationError};
pub use ext_client::{ExtClient, ExtClientConfig};
pub use host::{Host, NatType};
pub use ids::{ExtClientId, HostId, NetId, NodeId};
pub use keys::WgPublicKey;
pub use network::{DefaultAcl, Network};
pub use node::{EgressConfig, EgressRange, FailoverRoute, GatewayConfig, Node, NodeAcl};
pub use peer_update::{EgressRoute, ExtClientEntry, InterfaceConfig, PeerConfig, PeerUpdate};
pub use relay_state::{PeerHealth, RelayState};

pub const SCHEMA_VERSION: u32 = 1;

pub(crate) fn schema_version() -> u32 {
	SCHEMA_VERSION
}
