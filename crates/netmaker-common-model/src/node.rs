// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{Result, ValidationError};
use crate::ids::{HostId, NetId, NodeId};
use crate::{schema_version, validate};

pub const DEFAULT_EGRESS_METRIC: u32 = 256;

/// Per-node ACL override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAcl {
	Allow,
	Deny,
	#[default]
	Unset,
}

/// Present when the node terminates ext-clients.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
	#[serde(default)]
	pub ranges: Vec<IpNet>,
	#[serde(default)]
	pub keepalive: Option<u16>,
	#[serde(default)]
	pub mtu: Option<u16>,
	#[serde(default)]
	pub dns: Vec<IpAddr>,
}

impl GatewayConfig {
	pub fn validate(&self) -> Result<()> {
		if let Some(keepalive) = self.keepalive {
			validate::keepalive("ingress.keepalive", keepalive)?;
		}
		if let Some(mtu) = self.mtu {
			validate::mtu("ingress.mtu", mtu)?;
		}
		Ok(())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressRange {
	pub cidr: IpNet,
	pub metric: u32,
}

impl EgressRange {
	pub fn new(cidr: IpNet) -> Self {
		Self {
			cidr: cidr.trunc(),
			metric: DEFAULT_EGRESS_METRIC,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EgressConfig {
	#[serde(default)]
	pub nat: bool,
	pub ranges: Vec<EgressRange>,
}

impl EgressConfig {
	pub fn validate(&self) -> Result<()> {
		if self.ranges.is_empty() {
			return Err(ValidationError::invalid("egress.ranges", "at least one range is required"));
		}
		for range in &self.ranges {
			if range.cidr != range.cidr.trunc() {
				return Err(ValidationError::invalid(
					"egress.ranges",
					format!("{} has host bits set", range.cidr),
				));
			}
		}
		Ok(())
	}
}

/// A peer currently reached through a failover relay instead of directly.
/// `recovered_at` tombstones the route once the direct path is back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverRoute {
	pub via: NodeId,
	pub engaged_at: DateTime<Utc>,
	#[serde(default)]
	pub recovered_at: Option<DateTime<Utc>>,
}

impl FailoverRoute {
	pub fn is_active(&self) -> bool {
		self.recovered_at.is_none()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
	#[serde(default = "schema_version")]
	pub schema_version: u32,
	pub id: NodeId,
	pub host_id: HostId,
	pub network: NetId,
	#[serde(default)]
	pub address: Option<Ipv4Addr>,
	#[serde(default)]
	pub address6: Option<Ipv6Addr>,
	#[serde(default)]
	pub local_address: Option<IpAddr>,
	#[serde(default)]
	pub connected: bool,
	#[serde(default)]
	pub default_acl: NodeAcl,
	#[serde(default)]
	pub tags: BTreeSet<String>,
	#[serde(default)]
	pub pending_delete: bool,
	#[serde(default)]
	pub pending_delete_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub expiration: Option<DateTime<Utc>>,
	#[serde(default)]
	pub last_checkin: Option<DateTime<Utc>>,
	#[serde(default)]
	pub last_peer_update: Option<DateTime<Utc>>,

	#[serde(default)]
	pub ingress: Option<GatewayConfig>,
	#[serde(default)]
	pub egress: Option<EgressConfig>,

	#[serde(default)]
	pub is_internet_gw: bool,
	/// The internet gateway this node routes 0.0.0.0/0 through.
	#[serde(default)]
	pub internet_gw: Option<NodeId>,
	#[serde(default)]
	pub internet_gw_for: BTreeSet<NodeId>,

	#[serde(default)]
	pub is_relay: bool,
	#[serde(default)]
	pub relayed_by: Option<NodeId>,
	#[serde(default)]
	pub relayed_nodes: BTreeSet<NodeId>,

	#[serde(default)]
	pub failover_node: Option<NodeId>,
	#[serde(default)]
	pub failover_peers: BTreeMap<NodeId, FailoverRoute>,

	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Node {
	pub fn new(host_id: HostId, network: NetId) -> Self {
		let now = Utc::now();
		Self {
			schema_version: schema_version(),
			id: NodeId::new(),
			host_id,
			network,
			address: None,
			address6: None,
			local_address: None,
			connected: true,
			default_acl: NodeAcl::Unset,
			tags: BTreeSet::new(),
			pending_delete: false,
			pending_delete_at: None,
			expiration: None,
			last_checkin: None,
			last_peer_update: None,
			ingress: None,
			egress: None,
			is_internet_gw: false,
			internet_gw: None,
			internet_gw_for: BTreeSet::new(),
			is_relay: false,
			relayed_by: None,
			relayed_nodes: BTreeSet::new(),
			failover_node: None,
			failover_peers: BTreeMap::new(),
			created_at: now,
			updated_at: now,
		}
	}

	pub fn is_live(&self) -> bool {
		!self.pending_delete
	}

	pub fn is_ingress(&self) -> bool {
		self.ingress.is_some()
	}

	pub fn is_egress(&self) -> bool {
		self.egress.as_ref().is_some_and(|e| !e.ranges.is_empty())
	}

	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		self.expiration.is_some_and(|exp| exp <= now)
	}

	pub fn addresses(&self) -> Vec<IpAddr> {
		self
			.address
			.map(IpAddr::V4)
			.into_iter()
			.chain(self.address6.map(IpAddr::V6))
			.collect()
	}

	/// Host routes (/32, /128) for the node's overlay addresses.
	pub fn host_nets(&self) -> Vec<IpNet> {
		self.addresses().into_iter().map(IpNet::from).collect()
	}

	pub fn egress_ranges(&self) -> &[EgressRange] {
		self.egress.as_ref().map(|e| e.ranges.as_slice()).unwrap_or(&[])
	}

	/// The relay currently standing in for `peer`, if failover is engaged.
	pub fn active_failover(&self, peer: &NodeId) -> Option<NodeId> {
		self
			.failover_peers
			.get(peer)
			.filter(|route| route.is_active())
			.map(|route| route.via)
	}

	pub fn touch(&mut self) {
		self.updated_at = Utc::now();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn node() -> Node {
		Node::new(HostId::new(), NetId::new("net1").unwrap())
	}

	#[test]
	fn host_nets_cover_both_families() {
		let mut n = node();
		n.address = Some("10.0.0.1".parse().unwrap());
		n.address6 = Some("fd00::1".parse().unwrap());

		let nets: Vec<String> = n.host_nets().iter().map(|n| n.to_string()).collect();
		assert_eq!(nets, vec!["10.0.0.1/32", "fd00::1/128"]);
	}

	#[test]
	fn failover_tombstones_are_inactive() {
		let mut n = node();
		let peer = NodeId::new();
		let via = NodeId::new();
		n.failover_peers.insert(
			peer,
			FailoverRoute {
				via,
				engaged_at: Utc::now(),
				recovered_at: None,
			},
		);
		assert_eq!(n.active_failover(&peer), Some(via));

		if let Some(route) = n.failover_peers.get_mut(&peer) {
			route.recovered_at = Some(Utc::now());
		}
		assert_eq!(n.active_failover(&peer), None);
	}

	#[test]
	fn expiry() {
		let mut n = node();
		let now = Utc::now();
		assert!(!n.is_expired(now));
		n.expiration = Some(now - chrono::Duration::seconds(1));
		assert!(n.is_expired(now));
	}

	#[test]
	fn egress_validation() {
		let bad = EgressConfig {
			nat: true,
			ranges: vec![EgressRange {
				cidr: "192.168.1.7/24".parse().unwrap(),
				metric: 10,
			}],
		};
		assert!(bad.validate().is_err());

		let good = EgressConfig {
			nat: true,
			ranges: vec![EgressRange::new("192.168.1.7/24".parse().unwrap())],
		};
		assert!(good.validate().is_ok());
		assert_eq!(good.ranges[0].metric, DEFAULT_EGRESS_METRIC);
		assert!(EgressConfig::default().validate().is_err());
	}
}
