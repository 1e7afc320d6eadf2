// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use netmaker_common_model::{HostId, NetId, Node, NodeAcl, NodeId};
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::info;

use super::OverlayService;
use crate::acl::{apply_node_default, attach_node};
use crate::alloc::IpAllocator;
use crate::context::OpContext;
use crate::error::{OverlayError, Result};
use crate::repo::OverlayTx;

#[derive(Debug, Clone, Default)]
pub struct NodeOptions {
	/// Pinned addresses; the smallest free one is used otherwise.
	pub address: Option<Ipv4Addr>,
	pub address6: Option<Ipv6Addr>,
	pub default_acl: NodeAcl,
	pub tags: BTreeSet<String>,
	pub expiration: Option<DateTime<Utc>>,
	pub local_address: Option<IpAddr>,
}

#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
	pub address: Option<Ipv4Addr>,
	pub address6: Option<Ipv6Addr>,
	pub default_acl: Option<NodeAcl>,
	pub tags: Option<BTreeSet<String>>,
	/// `Some(None)` clears the expiration.
	pub expiration: Option<Option<DateTime<Utc>>>,
	pub local_address: Option<IpAddr>,
	pub connected: Option<bool>,
}

pub(crate) async fn stage_create_node(
	tx: &mut OverlayTx,
	host_id: &HostId,
	net: &NetId,
	options: NodeOptions,
) -> Result<Node> {
	let network = tx.network(net).await?;
	let host = tx.host(host_id).await?;

	let existing = tx.nodes_in(net).await?;
	if existing.iter().any(|n| &n.host_id == host_id) {
		return Err(OverlayError::Conflict(format!("host {host_id} already has a node in {net}")));
	}
	let clients = tx.ext_clients_in(net).await?;
	let mut alloc = IpAllocator::from_entities(&network, &existing, &clients);
	let (address, address6) = alloc.allocate(options.address, options.address6)?;

	let mut node = Node::new(host.id, net.clone());
	node.address = address;
	node.address6 = address6;
	node.default_acl = options.default_acl;
	node.tags = options.tags;
	node.expiration = options.expiration;
	node.local_address = options.local_address;

	let mut acl = tx.acl(net).await?;
	attach_node(&mut acl.matrix, &network, &node, &existing);

	tx.put_node(&node)?;
	tx.put_acl(&acl)?;

	info!(
		node_id = %node.id,
		host = %host.name,
		%net,
		address = ?node.address,
		address6 = ?node.address6,
		"node created"
	);
	Ok(node)
}

/// Unlinks `node` from every relay, internet gateway, failover route and
/// ext-client that depends on it. Peers are rewritten in place; `node`
/// itself is only modified in memory.
pub(crate) async fn detach_topology(tx: &mut OverlayTx, node: &mut Node) -> Result<()> {
	let mut peers: BTreeMap<NodeId, Node> = tx
		.nodes_in(&node.network)
		.await?
		.into_iter()
		.filter(|n| n.id != node.id)
		.map(|n| (n.id, n))
		.collect();
	let mut changed = BTreeSet::new();

	if let Some(relay) = node.relayed_by.take() {
		if let Some(r) = peers.get_mut(&relay) {
			r.relayed_nodes.remove(&node.id);
			changed.insert(relay);
		}
	}
	for id in std::mem::take(&mut node.relayed_nodes) {
		if let Some(n) = peers.get_mut(&id) {
			n.relayed_by = None;
			changed.insert(id);
		}
	}
	node.is_relay = false;

	if let Some(gw) = node.internet_gw.take() {
		if let Some(g) = peers.get_mut(&gw) {
			g.internet_gw_for.remove(&node.id);
			changed.insert(gw);
		}
	}
	for id in std::mem::take(&mut node.internet_gw_for) {
		if let Some(n) = peers.get_mut(&id) {
			n.internet_gw = None;
			changed.insert(id);
		}
	}
	node.is_internet_gw = false;

	for (id, peer) in peers.iter_mut() {
		let before = peer.failover_peers.len();
		peer
			.failover_peers
			.retain(|target, route| *target != node.id && route.via != node.id);
		if peer.failover_peers.len() != before {
			changed.insert(*id);
		}
	}
	node.failover_peers.clear();

	if node.ingress.take().is_some() {
		for client in tx.ext_clients_in(&node.network).await? {
			if client.ingress_node == node.id {
				tx.delete_ext_client(&client)?;
			}
		}
	}

	for id in changed {
		if let Some(peer) = peers.get_mut(&id) {
			peer.touch();
			tx.put_node(peer)?;
		}
	}

	let mut network = tx.network(&node.network).await?;
	if network.failover_node == Some(node.id) {
		network.failover_node = None;
		network.touch();
		tx.put_network(&network)?;
	}
	Ok(())
}

pub(crate) async fn stage_mark_pending(tx: &mut OverlayTx, node_id: &NodeId) -> Result<Node> {
	let mut node = tx.node(node_id).await?;
	if node.pending_delete {
		return Ok(node);
	}
	detach_topology(tx, &mut node).await?;
	node.pending_delete = true;
	node.pending_delete_at = Some(Utc::now());
	node.connected = false;
	node.touch();
	tx.put_node(&node)?;
	Ok(node)
}

/// Drops a pending node for good, reclaiming its address and ACL row.
pub(crate) async fn stage_finalize(tx: &mut OverlayTx, node: Node) -> Result<()> {
	if !node.pending_delete {
		return Err(OverlayError::Validation(format!("node {} is not pending deletion", node.id)));
	}
	let net = node.network.clone();

	let mut acl = tx.acl(&net).await?;
	acl.matrix.detach(&node.id);
	tx.put_acl(&acl)?;

	for mut client in tx.ext_clients_in(&net).await? {
		if client.denied_nodes.remove(&node.id) {
			tx.put_ext_client(&client)?;
		}
	}

	tx.delete_relay_state(&net, &node.id)?;
	tx.delete_node(&node)?;
	Ok(())
}

/// Marks and finalizes in one go.
pub(crate) async fn stage_remove_node(tx: &mut OverlayTx, node_id: NodeId) -> Result<()> {
	let node = stage_mark_pending(tx, &node_id).await?;
	stage_finalize(tx, node).await
}

impl OverlayService {
	/// Creates the node of `host_id` in `net`, assigning addresses and an
	/// ACL row.
	#[tracing::instrument(skip(self, ctx, options), fields(%host_id, %net))]
	pub async fn create_node(
		&self,
		ctx: &OpContext,
		host_id: &HostId,
		net: &NetId,
		options: NodeOptions,
	) -> Result<Node> {
		let mut m = self.begin(ctx, "create_node", BTreeSet::from([net.clone()])).await?;
		let tx = &mut m.tx;
		let staged = ctx.run(stage_create_node(tx, host_id, net, options)).await;
		self.finish(ctx, m, staged).await
	}

	#[tracing::instrument(skip(self, ctx, update), fields(%node_id))]
	pub async fn update_node(&self, ctx: &OpContext, node_id: &NodeId, update: NodeUpdate) -> Result<Node> {
		let net = self.network_of_node(ctx, node_id).await?;
		let mut m = self.begin(ctx, "update_node", BTreeSet::from([net])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let mut node = tx.node(node_id).await?;
				if !node.is_live() {
					return Err(OverlayError::Validation(format!("node {node_id} is pending deletion")));
				}

				if update.address.is_some() || update.address6.is_some() {
					let network = tx.network(&node.network).await?;
					let others: Vec<Node> = tx
						.nodes_in(&node.network)
						.await?
						.into_iter()
						.filter(|n| n.id != node.id)
						.collect();
					let clients = tx.ext_clients_in(&node.network).await?;
					let mut alloc = IpAllocator::from_entities(&network, &others, &clients);
					if let Some(addr) = update.address.filter(|a| Some(*a) != node.address) {
						node.address = alloc.allocate4(Some(addr))?;
					}
					if let Some(addr) = update.address6.filter(|a| Some(*a) != node.address6) {
						node.address6 = alloc.allocate6(Some(addr))?;
					}
				}

				if let Some(default_acl) = update.default_acl.filter(|acl| *acl != node.default_acl) {
					node.default_acl = default_acl;
					let mut acl = tx.acl(&node.network).await?;
					apply_node_default(&mut acl.matrix, &node);
					tx.put_acl(&acl)?;
				}
				if let Some(tags) = update.tags {
					node.tags = tags;
				}
				if let Some(expiration) = update.expiration {
					node.expiration = expiration;
				}
				if let Some(local) = update.local_address {
					node.local_address = Some(local);
				}
				if let Some(connected) = update.connected {
					node.connected = connected;
				}
				node.touch();
				tx.put_node(&node)?;
				Ok(node)
			})
			.await;
		self.finish(ctx, m, staged).await
	}

	/// First phase of deletion: the node leaves every peer map at once but
	/// keeps its address until finalized.
	#[tracing::instrument(skip(self, ctx), fields(%node_id))]
	pub async fn mark_node_pending_delete(&self, ctx: &OpContext, node_id: &NodeId) -> Result<Node> {
		let net = self.network_of_node(ctx, node_id).await?;
		let mut m = self.begin(ctx, "mark_node_pending_delete", BTreeSet::from([net])).await?;
		let tx = &mut m.tx;
		let staged = ctx.run(stage_mark_pending(tx, node_id)).await;
		let node = self.finish(ctx, m, staged).await?;
		info!(network = %node.network, "node marked for deletion");
		Ok(node)
	}

	#[tracing::instrument(skip(self, ctx), fields(%node_id))]
	pub async fn finalize_node_delete(&self, ctx: &OpContext, node_id: &NodeId) -> Result<()> {
		let net = self.network_of_node(ctx, node_id).await?;
		let mut m = self.begin(ctx, "finalize_node_delete", BTreeSet::from([net.clone()])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let node = tx.node(node_id).await?;
				stage_finalize(tx, node).await
			})
			.await;
		self.finish(ctx, m, staged).await?;
		info!(%net, "node deleted");
		Ok(())
	}

	pub async fn get_node(&self, ctx: &OpContext, node_id: &NodeId) -> Result<Node> {
		let reader = self.reader();
		ctx.run(reader.node(node_id)).await
	}

	pub async fn list_nodes(&self, ctx: &OpContext, net: &NetId) -> Result<Vec<Node>> {
		let reader = self.reader();
		ctx.run(async {
			reader.network(net).await?;
			reader.nodes_in(net).await
		})
		.await
	}

	pub(crate) async fn network_of_node(&self, ctx: &OpContext, node_id: &NodeId) -> Result<NetId> {
		Ok(self.get_node(ctx, node_id).await?.network)
	}
}
