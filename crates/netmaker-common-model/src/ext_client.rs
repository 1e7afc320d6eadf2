// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::ids::{ExtClientId, NetId, NodeId};
use crate::keys::WgPublicKey;
use crate::schema_version;

/// An off-mesh WireGuard peer reachable only through its ingress node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtClient {
	#[serde(default = "schema_version")]
	pub schema_version: u32,
	pub client_id: ExtClientId,
	pub network: NetId,
	pub ingress_node: NodeId,
	pub public_key: WgPublicKey,
	#[serde(default)]
	pub address: Option<Ipv4Addr>,
	#[serde(default)]
	pub address6: Option<Ipv6Addr>,
	#[serde(default)]
	pub denied_nodes: BTreeSet<NodeId>,
	#[serde(default = "enabled_default")]
	pub enabled: bool,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

fn enabled_default() -> bool {
	true
}

impl ExtClient {
	pub fn new(client_id: ExtClientId, network: NetId, ingress_node: NodeId, public_key: WgPublicKey) -> Self {
		let now = Utc::now();
		Self {
			schema_version: schema_version(),
			client_id,
			network,
			ingress_node,
			public_key,
			address: None,
			address6: None,
			denied_nodes: BTreeSet::new(),
			enabled: true,
			created_at: now,
			updated_at: now,
		}
	}

	pub fn addresses(&self) -> Vec<IpAddr> {
		self
			.address
			.map(IpAddr::V4)
			.into_iter()
			.chain(self.address6.map(IpAddr::V6))
			.collect()
	}

	pub fn host_nets(&self) -> Vec<IpNet> {
		self.addresses().into_iter().map(IpNet::from).collect()
	}

	/// Ext-client denials are one-sided: a set of nodes this client may not reach.
	pub fn is_allowed(&self, node: &NodeId) -> bool {
		!self.denied_nodes.contains(node)
	}
}

/// What an ext-client needs to configure its single WireGuard peer: the
/// ingress gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtClientConfig {
	pub client_id: ExtClientId,
	pub network: NetId,
	pub addresses: Vec<IpNet>,
	pub dns_servers: Vec<IpAddr>,
	pub mtu: u16,
	pub gateway_public_key: WgPublicKey,
	pub gateway_endpoint: Option<SocketAddr>,
	pub allowed_ips: Vec<IpNet>,
	pub persistent_keepalive_seconds: u16,
}
