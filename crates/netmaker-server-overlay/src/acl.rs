// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! ACL resolution over the per-network matrix.
//!
//! Matrix cells hold explicit decisions. A node-level default only decides
//! pairs whose cells are `NotPresent`; a node switched to `deny` has its
//! whole row rewritten to `NotAllowed` when the default is applied.

use netmaker_common_model::{AclMatrix, AclValue, ExtClient, Network, Node, NodeAcl, NodeId};

/// Value a fresh pair receives from the defaults of both ends.
///
/// `deny` on either side beats `allow` on the other, which beats the
/// network default.
pub fn pair_value(network: &Network, a: &Node, b: &Node) -> AclValue {
	if a.default_acl == NodeAcl::Deny || b.default_acl == NodeAcl::Deny {
		AclValue::NotAllowed
	} else if a.default_acl == NodeAcl::Allow || b.default_acl == NodeAcl::Allow {
		AclValue::Allowed
	} else {
		AclValue::from_default(network.default_acl)
	}
}

/// Adds `node` to the matrix, deciding each pair with `existing` from both
/// nodes' defaults so an earlier `deny` node stays unreachable.
pub fn attach_node(matrix: &mut AclMatrix, network: &Network, node: &Node, existing: &[Node]) {
	matrix.attach(node.id, AclValue::from_default(network.default_acl));
	for other in existing.iter().filter(|n| n.id != node.id) {
		matrix.set(node.id, other.id, pair_value(network, node, other));
	}
}

/// Rewrites `node`'s row according to its own default.
///
/// `deny` forces every pair to `NotAllowed`; `allow` only fills
/// `NotPresent` cells.
pub fn apply_node_default(matrix: &mut AclMatrix, node: &Node) {
	let others: Vec<NodeId> = matrix.node_ids().filter(|id| **id != node.id).copied().collect();
	match node.default_acl {
		NodeAcl::Deny => {
			for other in others {
				matrix.set(node.id, other, AclValue::NotAllowed);
			}
		}
		NodeAcl::Allow => {
			for other in others {
				if matrix.get(&node.id, &other) == AclValue::NotPresent {
					matrix.set(node.id, other, AclValue::Allowed);
				}
			}
		}
		NodeAcl::Unset => {}
	}
}

/// Both directions must allow; an absent cell falls back to the node
/// defaults, then to the network default.
pub fn is_allowed(matrix: &AclMatrix, network: &Network, a: &Node, b: &Node) -> bool {
	let fallback = pair_value(network, a, b) == AclValue::Allowed;
	let side = |x: &NodeId, y: &NodeId| match matrix.get(x, y) {
		AclValue::Allowed => true,
		AclValue::NotAllowed => false,
		AclValue::NotPresent => fallback,
	};
	side(&a.id, &b.id) && side(&b.id, &a.id)
}

pub fn is_ext_client_allowed(client: &ExtClient, node: &NodeId) -> bool {
	client.is_allowed(node)
}

#[cfg(test)]
mod tests {
	use super::*;
	use netmaker_common_model::{DefaultAcl, HostId, NetId};

	fn network(default_acl: DefaultAcl) -> Network {
		let mut n = Network::new(NetId::new("net1").unwrap(), Some("10.0.0.0/24".parse().unwrap()), None);
		n.default_acl = default_acl;
		n
	}

	fn node(net: &Network, acl: NodeAcl) -> Node {
		let mut n = Node::new(HostId::new(), net.net_id.clone());
		n.default_acl = acl;
		n
	}

	#[test]
	fn empty_matrix_uses_network_default() {
		let allow = network(DefaultAcl::Allow);
		let a = node(&allow, NodeAcl::Unset);
		let b = node(&allow, NodeAcl::Unset);
		assert!(is_allowed(&AclMatrix::new(), &allow, &a, &b));

		let deny = network(DefaultAcl::Deny);
		assert!(!is_allowed(&AclMatrix::new(), &deny, &a, &b));
	}

	#[test]
	fn explicit_cells_win_over_defaults() {
		let net = network(DefaultAcl::Deny);
		let a = node(&net, NodeAcl::Unset);
		let b = node(&net, NodeAcl::Unset);
		let mut m = AclMatrix::new();
		m.attach(a.id, AclValue::NotAllowed);
		m.attach(b.id, AclValue::NotAllowed);
		m.set(a.id, b.id, AclValue::Allowed);
		assert!(is_allowed(&m, &net, &a, &b));
		m.set(a.id, b.id, AclValue::NotAllowed);
		assert!(!is_allowed(&m, &net, &b, &a));
	}

	#[test]
	fn deny_default_rewrites_the_row() {
		let net = network(DefaultAcl::Allow);
		let a = node(&net, NodeAcl::Unset);
		let b = node(&net, NodeAcl::Unset);
		let mut c = node(&net, NodeAcl::Unset);
		let mut m = AclMatrix::new();
		for n in [&a, &b, &c] {
			m.attach(n.id, AclValue::Allowed);
		}

		c.default_acl = NodeAcl::Deny;
		apply_node_default(&mut m, &c);
		assert!(!is_allowed(&m, &net, &a, &c));
		assert!(!is_allowed(&m, &net, &c, &b));
		assert!(is_allowed(&m, &net, &a, &b));
		assert!(m.is_symmetric());
	}

	#[test]
	fn allow_default_only_fills_gaps() {
		let net = network(DefaultAcl::Deny);
		let a = node(&net, NodeAcl::Unset);
		let b = node(&net, NodeAcl::Unset);
		let mut c = node(&net, NodeAcl::Allow);
		let mut m = AclMatrix::new();
		m.attach(a.id, AclValue::NotPresent);
		m.attach(b.id, AclValue::NotPresent);
		m.attach(c.id, AclValue::NotPresent);
		m.set(c.id, b.id, AclValue::NotAllowed);

		apply_node_default(&mut m, &c);
		assert!(is_allowed(&m, &net, &c, &a));
		assert!(!is_allowed(&m, &net, &c, &b));

		c.default_acl = NodeAcl::Unset;
		assert!(is_allowed(&m, &net, &a, &c));
	}

	#[test]
	fn pair_value_follows_node_then_network() {
		let net = network(DefaultAcl::Deny);
		let unset = node(&net, NodeAcl::Unset);
		let allow = node(&net, NodeAcl::Allow);
		let deny = node(&net, NodeAcl::Deny);
		assert_eq!(pair_value(&net, &unset, &unset), AclValue::NotAllowed);
		assert_eq!(pair_value(&net, &allow, &unset), AclValue::Allowed);
		assert_eq!(pair_value(&net, &allow, &deny), AclValue::NotAllowed);
	}

	#[test]
	fn attaching_keeps_an_earlier_deny_node_isolated() {
		let net = network(DefaultAcl::Allow);
		let hermit = node(&net, NodeAcl::Deny);
		let a = node(&net, NodeAcl::Unset);
		let b = node(&net, NodeAcl::Unset);
		let mut m = AclMatrix::new();
		attach_node(&mut m, &net, &hermit, &[]);
		attach_node(&mut m, &net, &a, std::slice::from_ref(&hermit));
		attach_node(&mut m, &net, &b, &[hermit.clone(), a.clone()]);

		assert_eq!(m.get(&a.id, &hermit.id), AclValue::NotAllowed);
		assert!(!is_allowed(&m, &net, &b, &hermit));
		assert!(is_allowed(&m, &net, &a, &b));
		assert!(m.is_symmetric());
		assert!(m.is_square());
	}
}
