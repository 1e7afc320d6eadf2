// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Whole-network consistency checks run before every commit.

use netmaker_common_model::{ExtClientId, HostId, NodeId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;

use crate::snapshot::NetworkSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
	AddressOutsideRange { node: NodeId, address: IpAddr },
	DuplicateAddress { address: IpAddr },
	DuplicateMembership { host: HostId },
	AclAsymmetric,
	AclNotSquare,
	RelayMissing { node: NodeId, relay: NodeId },
	RelayDepth { node: NodeId, relay: NodeId },
	RelayNotReciprocal { node: NodeId, relay: NodeId },
	RelayCycle { node: NodeId },
	InternetGwMissing { node: NodeId, gateway: NodeId },
	InternetGwChained { node: NodeId, gateway: NodeId },
	InternetGwNotReciprocal { node: NodeId, gateway: NodeId },
	ExtClientIngress { client: ExtClientId, ingress: NodeId },
}

impl fmt::Display for Violation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::AddressOutsideRange { node, address } => {
				write!(f, "node {node} address {address} is outside the network range")
			}
			Self::DuplicateAddress { address } => write!(f, "address {address} is assigned twice"),
			Self::DuplicateMembership { host } => write!(f, "host {host} has more than one node"),
			Self::AclAsymmetric => write!(f, "acl matrix is not symmetric"),
			Self::AclNotSquare => write!(f, "acl matrix is not square"),
			Self::RelayMissing { node, relay } => {
				write!(f, "node {node} is relayed by missing or pending node {relay}")
			}
			Self::RelayDepth { node, relay } => {
				write!(f, "node {node} is relayed by {relay}, which is itself relayed")
			}
			Self::RelayNotReciprocal { node, relay } => {
				write!(f, "relay pointers between {node} and {relay} disagree")
			}
			Self::RelayCycle { node } => write!(f, "relay chain starting at {node} loops"),
			Self::InternetGwMissing { node, gateway } => {
				write!(f, "node {node} routes through missing internet gateway {gateway}")
			}
			Self::InternetGwChained { node, gateway } => {
				write!(f, "node {node} uses internet gateway {gateway}, which uses another gateway")
			}
			Self::InternetGwNotReciprocal { node, gateway } => {
				write!(f, "internet gateway pointers between {node} and {gateway} disagree")
			}
			Self::ExtClientIngress { client, ingress } => {
				write!(f, "ext client {client} references unusable ingress {ingress}")
			}
		}
	}
}

/// Returns true when following `relayed_by` from any node never revisits a
/// node.
pub fn relay_graph_is_acyclic(relayed_by: &BTreeMap<NodeId, Option<NodeId>>) -> bool {
	for start in relayed_by.keys() {
		let mut seen = BTreeSet::new();
		let mut cursor = Some(*start);
		while let Some(id) = cursor {
			if !seen.insert(id) {
				return false;
			}
			cursor = relayed_by.get(&id).copied().flatten();
		}
	}
	true
}

pub fn check(snapshot: &NetworkSnapshot) -> Vec<Violation> {
	let mut violations = Vec::new();
	check_addresses(snapshot, &mut violations);
	check_membership(snapshot, &mut violations);
	check_acl(snapshot, &mut violations);
	check_relays(snapshot, &mut violations);
	check_internet_gateways(snapshot, &mut violations);
	check_ext_clients(snapshot, &mut violations);
	violations
}

fn check_addresses(snapshot: &NetworkSnapshot, out: &mut Vec<Violation>) {
	let mut seen = BTreeSet::new();
	for node in snapshot.nodes.values() {
		for address in node.addresses() {
			if !snapshot.network.contains(address) {
				out.push(Violation::AddressOutsideRange { node: node.id, address });
			}
			if !seen.insert(address) {
				out.push(Violation::DuplicateAddress { address });
			}
		}
	}
	for client in &snapshot.ext_clients {
		for address in client.addresses() {
			if !seen.insert(address) {
				out.push(Violation::DuplicateAddress { address });
			}
		}
	}
}

fn check_membership(snapshot: &NetworkSnapshot, out: &mut Vec<Violation>) {
	let mut hosts = BTreeSet::new();
	for node in snapshot.nodes.values() {
		if !hosts.insert(node.host_id) {
			out.push(Violation::DuplicateMembership { host: node.host_id });
		}
	}
}

fn check_acl(snapshot: &NetworkSnapshot, out: &mut Vec<Violation>) {
	if !snapshot.acl.matrix.is_symmetric() {
		out.push(Violation::AclAsymmetric);
	}
	if !snapshot.acl.matrix.is_square() {
		out.push(Violation::AclNotSquare);
	}
}

fn check_relays(snapshot: &NetworkSnapshot, out: &mut Vec<Violation>) {
	for node in snapshot.nodes.values() {
		if let Some(relay_id) = node.relayed_by {
			match snapshot.live_node(&relay_id) {
				None => out.push(Violation::RelayMissing { node: node.id, relay: relay_id }),
				Some(relay) => {
					if relay.relayed_by.is_some() {
						out.push(Violation::RelayDepth { node: node.id, relay: relay_id });
					}
					if !relay.is_relay || !relay.relayed_nodes.contains(&node.id) {
						out.push(Violation::RelayNotReciprocal { node: node.id, relay: relay_id });
					}
				}
			}
		}
		for relayed in &node.relayed_nodes {
			let points_back = snapshot
				.nodes
				.get(relayed)
				.is_some_and(|n| n.relayed_by == Some(node.id));
			if !points_back {
				out.push(Violation::RelayNotReciprocal { node: *relayed, relay: node.id });
			}
		}
	}

	let graph: BTreeMap<NodeId, Option<NodeId>> =
		snapshot.nodes.values().map(|n| (n.id, n.relayed_by)).collect();
	if !relay_graph_is_acyclic(&graph) {
		if let Some(first) = graph.keys().next() {
			out.push(Violation::RelayCycle { node: *first });
		}
	}
}

fn check_internet_gateways(snapshot: &NetworkSnapshot, out: &mut Vec<Violation>) {
	for node in snapshot.nodes.values() {
		if let Some(gw_id) = node.internet_gw {
			match snapshot.live_node(&gw_id) {
				Some(gw) if gw.is_internet_gw => {
					if gw.internet_gw.is_some() {
						out.push(Violation::InternetGwChained { node: node.id, gateway: gw_id });
					}
					if !gw.internet_gw_for.contains(&node.id) {
						out.push(Violation::InternetGwNotReciprocal { node: node.id, gateway: gw_id });
					}
				}
				_ => out.push(Violation::InternetGwMissing { node: node.id, gateway: gw_id }),
			}
		}
		for client in &node.internet_gw_for {
			let points_back = snapshot
				.nodes
				.get(client)
				.is_some_and(|n| n.internet_gw == Some(node.id));
			if !points_back {
				out.push(Violation::InternetGwNotReciprocal { node: *client, gateway: node.id });
			}
		}
	}
}

fn check_ext_clients(snapshot: &NetworkSnapshot, out: &mut Vec<Violation>) {
	for client in &snapshot.ext_clients {
		let usable = snapshot
			.live_node(&client.ingress_node)
			.is_some_and(|n| n.is_ingress());
		if !usable {
			out.push(Violation::ExtClientIngress {
				client: client.client_id.clone(),
				ingress: client.ingress_node,
			});
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use netmaker_common_model::{AclContainer, AclValue, NetId, Network, Node};

	fn snapshot(nodes: Vec<Node>) -> NetworkSnapshot {
		let network = Network::new(NetId::new("net1").unwrap(), Some("10.0.0.0/24".parse().unwrap()), None);
		let mut acl = AclContainer::new(network.net_id.clone());
		for n in &nodes {
			acl.matrix.attach(n.id, AclValue::Allowed);
		}
		NetworkSnapshot {
			acl,
			nodes: nodes.into_iter().map(|n| (n.id, n)).collect(),
			hosts: BTreeMap::new(),
			ext_clients: Vec::new(),
			network,
		}
	}

	fn node(addr: &str) -> Node {
		let mut n = Node::new(HostId::new(), NetId::new("net1").unwrap());
		n.address = Some(addr.parse().unwrap());
		n
	}

	#[test]
	fn consistent_network_passes() {
		let mut a = node("10.0.0.1");
		let mut b = node("10.0.0.2");
		b.is_relay = true;
		b.relayed_nodes.insert(a.id);
		a.relayed_by = Some(b.id);
		assert!(check(&snapshot(vec![a, b])).is_empty());
	}

	#[test]
	fn duplicate_address_is_reported() {
		let v = check(&snapshot(vec![node("10.0.0.1"), node("10.0.0.1")]));
		assert!(v.contains(&Violation::DuplicateAddress {
			address: "10.0.0.1".parse().unwrap()
		}));
	}

	#[test]
	fn one_sided_relay_pointer_is_reported() {
		let a = node("10.0.0.1");
		let mut b = node("10.0.0.2");
		b.is_relay = true;
		b.relayed_nodes.insert(a.id);
		let v = check(&snapshot(vec![a, b]));
		assert!(matches!(v[0], Violation::RelayNotReciprocal { .. }));
	}

	#[test]
	fn relay_cycles_are_detected() {
		let a = NodeId::new();
		let b = NodeId::new();
		let mut graph = BTreeMap::new();
		graph.insert(a, Some(b));
		graph.insert(b, None);
		assert!(relay_graph_is_acyclic(&graph));
		graph.insert(b, Some(a));
		assert!(!relay_graph_is_acyclic(&graph));
	}

	#[test]
	fn asymmetric_acl_is_reported() {
		let a = node("10.0.0.1");
		let b = node("10.0.0.2");
		let mut snap = snapshot(vec![a.clone(), b.clone()]);
		let raw = serde_json::json!({
			a.id.to_string(): { b.id.to_string(): 2 },
			b.id.to_string(): { a.id.to_string(): 1 },
		});
		snap.acl.matrix = serde_json::from_value(raw).unwrap();
		assert!(check(&snap).contains(&Violation::AclAsymmetric));
	}
}
