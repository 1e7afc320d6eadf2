// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Relay topology validation and failover candidate election.

use netmaker_common_model::{Node, NodeId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::acl;
use crate::error::{OverlayError, Result};
use crate::invariants::relay_graph_is_acyclic;
use crate::metrics::HostMetrics;
use crate::snapshot::NetworkSnapshot;

/// Checks that `relay` may relay exactly `relayed` within `nodes`.
///
/// Relays are never relayed themselves, relayed nodes are never relays
/// with clients of their own, and the resulting graph stays acyclic.
pub fn validate_relay(nodes: &BTreeMap<NodeId, Node>, relay: &NodeId, relayed: &BTreeSet<NodeId>) -> Result<()> {
	let relay_node = nodes
		.get(relay)
		.ok_or_else(|| OverlayError::NotFound(format!("relay node {relay}")))?;
	if !relay_node.is_live() {
		return Err(OverlayError::Validation(format!("relay node {relay} is pending deletion")));
	}
	if relayed.contains(relay) {
		return Err(OverlayError::Conflict(format!("node {relay} cannot relay itself")));
	}
	if let Some(upstream) = relay_node.relayed_by {
		return Err(OverlayError::Conflict(format!(
			"node {relay} is relayed by {upstream} and cannot act as a relay"
		)));
	}

	for id in relayed {
		let node = nodes
			.get(id)
			.ok_or_else(|| OverlayError::NotFound(format!("node {id} in network {}", relay_node.network)))?;
		if !node.is_live() {
			return Err(OverlayError::Validation(format!("node {id} is pending deletion")));
		}
		if node.is_relay && !node.relayed_nodes.is_empty() {
			return Err(OverlayError::Conflict(format!(
				"node {id} relays other nodes and cannot be relayed"
			)));
		}
	}

	let mut graph: BTreeMap<NodeId, Option<NodeId>> = nodes.values().map(|n| (n.id, n.relayed_by)).collect();
	for (id, upstream) in graph.iter_mut() {
		if *upstream == Some(*relay) && !relayed.contains(id) {
			*upstream = None;
		}
	}
	for id in relayed {
		graph.insert(*id, Some(*relay));
	}
	if !relay_graph_is_acyclic(&graph) {
		return Err(OverlayError::Conflict(format!("relaying through {relay} would form a cycle")));
	}
	Ok(())
}

fn failover_eligible(snapshot: &NetworkSnapshot, node: &Node) -> bool {
	node.is_live()
		&& node.connected
		&& node.relayed_by.is_none()
		&& snapshot
			.host_of(node)
			.is_some_and(|h| h.os.eq_ignore_ascii_case("linux"))
}

/// Picks the node that should carry traffic between `failing` and `peer`.
///
/// Only nodes the ACL lets both ends talk to qualify. Candidates the
/// failing host currently reaches are ranked by reported latency, ties
/// broken by node id. Without one, the network's nominated failover node
/// is used.
pub fn select_failover(
	snapshot: &NetworkSnapshot,
	failing: &Node,
	peer: &NodeId,
	metrics: &HostMetrics,
) -> Option<NodeId> {
	let peer_node = snapshot.live_node(peer)?;
	let reachable = |via: &Node| {
		acl::is_allowed(&snapshot.acl.matrix, &snapshot.network, failing, via)
			&& acl::is_allowed(&snapshot.acl.matrix, &snapshot.network, peer_node, via)
	};

	let mut ranked: Vec<(u32, NodeId)> = snapshot
		.live_nodes()
		.filter(|n| n.id != failing.id && n.id != *peer)
		.filter(|n| failover_eligible(snapshot, n) && reachable(*n))
		.filter_map(|n| {
			let host = snapshot.host_of(n)?;
			metrics.connected_latency(&host.public_key).map(|latency| (latency, n.id))
		})
		.collect();
	ranked.sort();

	if let Some((latency, id)) = ranked.first() {
		debug!(failing = %failing.id, %peer, via = %id, latency_ms = latency, "failover candidate elected");
		return Some(*id);
	}

	snapshot
		.network
		.failover_node
		.filter(|id| *id != failing.id && id != peer)
		.filter(|id| snapshot.live_node(id).is_some_and(|n| reachable(n)))
}
