// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The per-host, per-network WireGuard configuration artifact.
//!
//! Field order and collection ordering are fixed so that identical inputs
//! encode to identical bytes.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::ids::{ExtClientId, HostId, NetId, NodeId};
use crate::keys::WgPublicKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
	pub addresses: Vec<IpNet>,
	pub listen_port: u16,
	pub mtu: u16,
	#[serde(default)]
	pub dns_servers: Vec<IpAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressRoute {
	pub cidr: IpNet,
	pub metric: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
	pub public_key: WgPublicKey,
	pub endpoint: Option<SocketAddr>,
	pub persistent_keepalive_seconds: u16,
	/// Sorted and deduplicated.
	pub allowed_ips: Vec<IpNet>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub egress_routes: Vec<EgressRoute>,
	/// Real nodes this peer stands in for as a relay or failover hop.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub is_relay_for: Vec<NodeId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub is_ingress_for_ext_clients: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub hole_punch_required: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub turn_endpoint: Option<SocketAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtClientEntry {
	pub client_id: ExtClientId,
	pub public_key: WgPublicKey,
	pub address: Option<Ipv4Addr>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub address6: Option<Ipv6Addr>,
	pub denied_node_ids: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerUpdate {
	pub network: NetId,
	pub host_id: HostId,
	pub node_id: NodeId,
	pub sequence: u64,
	pub server_time: i64,
	pub interface: InterfaceConfig,
	/// Sorted by public key.
	pub peers: Vec<PeerConfig>,
	/// Only populated for ingress nodes.
	#[serde(default)]
	pub ext_clients: Vec<ExtClientEntry>,
}

impl PeerUpdate {
	pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
		serde_json::to_vec(self)
	}

	pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
		serde_json::from_slice(bytes)
	}

	/// Equality ignoring the broker-stamped sequence and timestamp.
	pub fn same_content(&self, other: &PeerUpdate) -> bool {
		self.network == other.network
			&& self.host_id == other.host_id
			&& self.node_id == other.node_id
			&& self.interface == other.interface
			&& self.peers == other.peers
			&& self.ext_clients == other.ext_clients
	}

	pub fn peer(&self, public_key: &WgPublicKey) -> Option<&PeerConfig> {
		self.peers.iter().find(|p| &p.public_key == public_key)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ipnet::{Ipv4Net, Ipv6Net};
	use proptest::prelude::*;
	use uuid::Uuid;

	fn sample() -> PeerUpdate {
		PeerUpdate {
			network: NetId::new("net1").unwrap(),
			host_id: HostId::new(),
			node_id: NodeId::new(),
			sequence: 42,
			server_time: 1_700_000_000,
			interface: InterfaceConfig {
				addresses: vec!["10.0.0.1/24".parse().unwrap()],
				listen_port: 51821,
				mtu: 1420,
				dns_servers: vec![],
			},
			peers: vec![PeerConfig {
				public_key: WgPublicKey::from_bytes([2u8; 32]),
				endpoint: Some("203.0.113.9:51821".parse().unwrap()),
				persistent_keepalive_seconds: 20,
				allowed_ips: vec!["10.0.0.2/32".parse().unwrap()],
				egress_routes: vec![],
				is_relay_for: vec![],
				is_ingress_for_ext_clients: None,
				hole_punch_required: Some(true),
				turn_endpoint: None,
			}],
			ext_clients: vec![],
		}
	}

	fn arb_net() -> impl Strategy<Value = IpNet> {
		prop_oneof![
			(any::<Ipv4Addr>(), 0u8..=32).prop_map(|(a, p)| IpNet::V4(Ipv4Net::new(a, p).unwrap())),
			(any::<Ipv6Addr>(), 0u8..=128).prop_map(|(a, p)| IpNet::V6(Ipv6Net::new(a, p).unwrap())),
		]
	}

	fn arb_socket() -> impl Strategy<Value = SocketAddr> {
		(any::<IpAddr>(), any::<u16>()).prop_map(|(ip, port)| SocketAddr::new(ip, port))
	}

	fn arb_node_id() -> impl Strategy<Value = NodeId> {
		any::<u128>().prop_map(|n| NodeId::from_uuid(Uuid::from_u128(n)))
	}

	fn arb_key() -> impl Strategy<Value = WgPublicKey> {
		any::<[u8; 32]>().prop_map(WgPublicKey::from_bytes)
	}

	fn arb_peer() -> impl Strategy<Value = PeerConfig> {
		(
			arb_key(),
			proptest::option::of(arb_socket()),
			any::<u16>(),
			prop::collection::vec(arb_net(), 0..4),
			prop::collection::vec((arb_net(), any::<u32>()), 0..3),
			prop::collection::vec(arb_node_id(), 0..3),
			proptest::option::of(any::<bool>()),
			proptest::option::of(any::<bool>()),
			proptest::option::of(arb_socket()),
		)
			.prop_map(
				|(public_key, endpoint, keepalive, allowed_ips, egress, is_relay_for, ingress, punch, turn)| PeerConfig {
					public_key,
					endpoint,
					persistent_keepalive_seconds: keepalive,
					allowed_ips,
					egress_routes: egress
						.into_iter()
						.map(|(cidr, metric)| EgressRoute { cidr, metric })
						.collect(),
					is_relay_for,
					is_ingress_for_ext_clients: ingress,
					hole_punch_required: punch,
					turn_endpoint: turn,
				},
			)
	}

	fn arb_ext_client() -> impl Strategy<Value = ExtClientEntry> {
		(
			"[a-z][a-z0-9]{0,15}",
			arb_key(),
			proptest::option::of(any::<Ipv4Addr>()),
			proptest::option::of(any::<Ipv6Addr>()),
			prop::collection::vec(arb_node_id(), 0..3),
		)
			.prop_map(|(id, public_key, address, address6, denied_node_ids)| ExtClientEntry {
				client_id: ExtClientId::new(id).unwrap(),
				public_key,
				address,
				address6,
				denied_node_ids,
			})
	}

	fn arb_update() -> impl Strategy<Value = PeerUpdate> {
		(
			"[a-z][a-z0-9-]{0,14}[a-z0-9]",
			any::<u128>(),
			arb_node_id(),
			any::<u64>(),
			any::<i64>(),
			(
				prop::collection::vec(arb_net(), 0..3),
				any::<u16>(),
				any::<u16>(),
				prop::collection::vec(any::<IpAddr>(), 0..3),
			),
			prop::collection::vec(arb_peer(), 0..4),
			prop::collection::vec(arb_ext_client(), 0..3),
		)
			.prop_map(
				|(net, host, node_id, sequence, server_time, (addresses, listen_port, mtu, dns_servers), peers, ext_clients)| {
					PeerUpdate {
						network: NetId::new(net).unwrap(),
						host_id: HostId::from_uuid(Uuid::from_u128(host)),
						node_id,
						sequence,
						server_time,
						interface: InterfaceConfig {
							addresses,
							listen_port,
							mtu,
							dns_servers,
						},
						peers,
						ext_clients,
					}
				},
			)
	}

	proptest! {
		#[test]
		fn decode_inverts_encode(update in arb_update()) {
			let bytes = update.encode().unwrap();
			prop_assert_eq!(PeerUpdate::decode(&bytes).unwrap(), update);
		}
	}

	#[test]
	fn optional_flags_are_omitted() {
		let json = String::from_utf8(sample().encode().unwrap()).unwrap();
		assert!(json.contains("\"hole_punch_required\":true"));
		assert!(!json.contains("is_relay_for"));
		assert!(!json.contains("turn_endpoint"));
		assert!(!json.contains("is_ingress_for_ext_clients"));
	}

	#[test]
	fn same_content_ignores_stamp() {
		let a = sample();
		let mut b = a.clone();
		b.sequence += 1;
		b.server_time += 10;
		assert!(a.same_content(&b));
		b.peers.clear();
		assert!(!a.same_content(&b));
	}
}
