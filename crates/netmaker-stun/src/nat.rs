// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! NAT classification from successive check-in observations.
//!
//! Rules, applied in order:
//! 1. Against the same STUN server, a mapped port that changed since the
//!    last observation means symmetric NAT (unless the host pins its port).
//! 2. A mapped port equal to the declared listen port on two consecutive
//!    observations means no port translation: `Public` when the mapped IP
//!    is the host's own interface address, `FullCone` otherwise.
//! 3. A stable mapped port that differs from the declared one means
//!    port-restricted cone.
//! 4. Otherwise the previous classification stands. Symmetric is sticky
//!    under rule 3 since a symmetric NAT keeps one mapping per destination.

use netmaker_common_model::{HostId, NatType, StunObservation};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

const STABLE_OBSERVATIONS: u32 = 2;

/// Per-host classification input beyond the observation itself.
#[derive(Debug, Clone, Copy)]
pub struct HostContext {
	pub declared_port: u16,
	pub interface_ip: Option<IpAddr>,
	pub is_static_port: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationRecord {
	pub latest: StunObservation,
	pub declared_port_streak: u32,
	pub nat_type: NatType,
}

/// Outcome of recording an observation that was fresher than the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified {
	pub public_endpoint: SocketAddr,
	pub nat_type: NatType,
	pub changed: bool,
}

pub fn classify(previous: Option<&ObservationRecord>, current: &StunObservation, ctx: HostContext) -> ObservationRecord {
	let prev_type = previous.map(|p| p.nat_type).unwrap_or_default();
	let mapped_port = current.public_endpoint.port();

	let streak = if mapped_port == ctx.declared_port {
		previous.map(|p| p.declared_port_streak).unwrap_or(0) + 1
	} else {
		0
	};

	let same_server_prev = previous.filter(|p| p.latest.server == current.server);
	let port_changed = same_server_prev.is_some_and(|p| p.latest.public_endpoint.port() != mapped_port);
	let port_stable = same_server_prev.is_some_and(|p| p.latest.public_endpoint.port() == mapped_port);

	let nat_type = if port_changed && !ctx.is_static_port {
		NatType::Symmetric
	} else if streak >= STABLE_OBSERVATIONS {
		if ctx.interface_ip == Some(current.public_endpoint.ip()) {
			NatType::Public
		} else {
			NatType::FullCone
		}
	} else if port_stable && mapped_port != ctx.declared_port && prev_type != NatType::Symmetric {
		NatType::PortRestrictedCone
	} else if ctx.is_static_port && prev_type == NatType::Symmetric {
		NatType::Unknown
	} else {
		prev_type
	};

	ObservationRecord {
		latest: *current,
		declared_port_streak: streak,
		nat_type,
	}
}

/// Latest STUN observation per host, shared across check-ins.
#[derive(Clone, Default)]
pub struct ObservationMap {
	inner: Arc<RwLock<HashMap<HostId, ObservationRecord>>>,
}

impl ObservationMap {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records `observation` unless a fresher one is already held.
	pub async fn record(&self, host: HostId, observation: StunObservation, ctx: HostContext) -> Option<Classified> {
		let mut map = self.inner.write().await;
		let previous = map.get(&host).copied();

		if let Some(prev) = &previous {
			if prev.latest.observed_at > observation.observed_at {
				debug!(%host, "ignoring stale STUN observation");
				return None;
			}
		}

		let record = classify(previous.as_ref(), &observation, ctx);
		let changed = previous
			.map(|p| p.nat_type != record.nat_type || p.latest.public_endpoint != record.latest.public_endpoint)
			.unwrap_or(true);
		map.insert(host, record);

		Some(Classified {
			public_endpoint: observation.public_endpoint,
			nat_type: record.nat_type,
			changed,
		})
	}

	pub async fn get(&self, host: &HostId) -> Option<ObservationRecord> {
		self.inner.read().await.get(host).copied()
	}

	pub async fn forget(&self, host: &HostId) {
		self.inner.write().await.remove(host);
	}

	pub async fn len(&self) -> usize {
		self.inner.read().await.len()
	}
}
