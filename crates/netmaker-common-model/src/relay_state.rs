// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::{NetId, NodeId};
use crate::schema_version;

/// Consecutive check-in outcomes for one direct peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeerHealth {
	pub consecutive_failures: u32,
	pub consecutive_successes: u32,
	#[serde(default)]
	pub last_latency_ms: Option<u32>,
}

impl PeerHealth {
	pub fn record(&mut self, connected: bool, latency_ms: u32) {
		if connected {
			self.consecutive_successes = self.consecutive_successes.saturating_add(1);
			self.consecutive_failures = 0;
			self.last_latency_ms = Some(latency_ms);
		} else {
			self.consecutive_failures = self.consecutive_failures.saturating_add(1);
			self.consecutive_successes = 0;
		}
	}
}

/// Failover bookkeeping for one node, kept at `relay_state/{netid}:{nodeid}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayState {
	#[serde(default = "schema_version")]
	pub schema_version: u32,
	pub network: NetId,
	pub node: NodeId,
	#[serde(default)]
	pub peer_health: BTreeMap<NodeId, PeerHealth>,
	pub updated_at: DateTime<Utc>,
}

impl RelayState {
	pub fn new(network: NetId, node: NodeId) -> Self {
		Self {
			schema_version: schema_version(),
			network,
			node,
			peer_health: BTreeMap::new(),
			updated_at: Utc::now(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn counters_reset_on_flip() {
		let mut h = PeerHealth::default();
		h.record(false, 0);
		h.record(false, 0);
		assert_eq!(h.consecutive_failures, 2);

		h.record(true, 12);
		assert_eq!(h.consecutive_failures, 0);
		assert_eq!(h.consecutive_successes, 1);
		assert_eq!(h.last_latency_ms, Some(12));
	}
}
