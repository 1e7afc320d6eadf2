// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netmaker_common_model::{AclContainer, ExtClient, Host, HostId, NetId, Network, Node, NodeId};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::repo::OverlayTx;

/// Read-only copy of one network's state, taken at reconciliation start.
#[derive(Debug, Clone)]
pub struct NetworkSnapshot {
	pub network: Network,
	/// Every node of the network, pending-delete ones included.
	pub nodes: BTreeMap<NodeId, Node>,
	pub hosts: BTreeMap<HostId, Host>,
	pub ext_clients: Vec<ExtClient>,
	pub acl: AclContainer,
}

impl NetworkSnapshot {
	/// Loads the snapshot, or `None` if the network does not exist.
	pub async fn load(tx: &OverlayTx, net: &NetId) -> Result<Option<Self>> {
		let Some(network) = tx.network_opt(net).await? else {
			return Ok(None);
		};

		let nodes: BTreeMap<NodeId, Node> = tx.nodes_in(net).await?.into_iter().map(|n| (n.id, n)).collect();

		let mut hosts = BTreeMap::new();
		for node in nodes.values() {
			if hosts.contains_key(&node.host_id) {
				continue;
			}
			if let Some(host) = tx.host_opt(&node.host_id).await? {
				hosts.insert(host.id, host);
			}
		}

		let mut ext_clients = tx.ext_clients_in(net).await?;
		ext_clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));

		let acl = tx.acl(net).await?;

		Ok(Some(Self {
			network,
			nodes,
			hosts,
			ext_clients,
			acl,
		}))
	}

	pub fn net_id(&self) -> &NetId {
		&self.network.net_id
	}

	pub fn live_node(&self, id: &NodeId) -> Option<&Node> {
		self.nodes.get(id).filter(|n| n.is_live())
	}

	pub fn live_nodes(&self) -> impl Iterator<Item = &Node> {
		self.nodes.values().filter(|n| n.is_live())
	}

	pub fn host_of(&self, node: &Node) -> Option<&Host> {
		self.hosts.get(&node.host_id)
	}
}
