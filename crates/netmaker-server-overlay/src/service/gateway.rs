// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Ingress, egress, internet-gateway and relay toggles.

use ipnet::IpNet;
use netmaker_common_model::{EgressConfig, GatewayConfig, Network, Node, NodeId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use super::OverlayService;
use crate::context::OpContext;
use crate::error::{OverlayError, Result};
use crate::relay::validate_relay;
use crate::repo::OverlayTx;

fn overlaps(a: &IpNet, b: &IpNet) -> bool {
	a.contains(&b.network()) || b.contains(&a.network())
}

fn check_egress_ranges(network: &Network, egress: &EgressConfig) -> Result<()> {
	let own: Vec<IpNet> = network
		.address_range
		.map(IpNet::V4)
		.into_iter()
		.chain(network.address_range6.map(IpNet::V6))
		.collect();
	for range in &egress.ranges {
		if own.iter().any(|net| overlaps(net, &range.cidr)) {
			return Err(OverlayError::Validation(format!(
				"egress range {} overlaps the network range",
				range.cidr
			)));
		}
	}
	Ok(())
}

async fn live_node(tx: &OverlayTx, node_id: &NodeId) -> Result<Node> {
	let node = tx.node(node_id).await?;
	if !node.is_live() {
		return Err(OverlayError::Validation(format!("node {node_id} is pending deletion")));
	}
	Ok(node)
}

impl OverlayService {
	#[tracing::instrument(skip(self, ctx, gateway), fields(%node_id))]
	pub async fn create_ingress_gateway(
		&self,
		ctx: &OpContext,
		node_id: &NodeId,
		gateway: GatewayConfig,
	) -> Result<Node> {
		gateway.validate()?;
		let net = self.network_of_node(ctx, node_id).await?;
		let mut m = self.begin(ctx, "create_ingress_gateway", BTreeSet::from([net])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let mut node = live_node(tx, node_id).await?;
				node.ingress = Some(gateway);
				node.touch();
				tx.put_node(&node)?;
				Ok(node)
			})
			.await;
		let node = self.finish(ctx, m, staged).await?;
		info!(network = %node.network, "ingress gateway enabled");
		Ok(node)
	}

	/// Disables ingress and deletes every ext-client attached to the node.
	#[tracing::instrument(skip(self, ctx), fields(%node_id))]
	pub async fn delete_ingress_gateway(&self, ctx: &OpContext, node_id: &NodeId) -> Result<Node> {
		let net = self.network_of_node(ctx, node_id).await?;
		let mut m = self.begin(ctx, "delete_ingress_gateway", BTreeSet::from([net])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let mut node = tx.node(node_id).await?;
				if node.ingress.take().is_none() {
					return Err(OverlayError::Validation(format!("node {node_id} is not an ingress gateway")));
				}
				for client in tx.ext_clients_in(&node.network).await? {
					if client.ingress_node == node.id {
						tx.delete_ext_client(&client)?;
					}
				}
				node.touch();
				tx.put_node(&node)?;
				Ok(node)
			})
			.await;
		self.finish(ctx, m, staged).await
	}

	#[tracing::instrument(skip(self, ctx, egress), fields(%node_id))]
	pub async fn create_egress_gateway(&self, ctx: &OpContext, node_id: &NodeId, egress: EgressConfig) -> Result<Node> {
		egress.validate()?;
		let net = self.network_of_node(ctx, node_id).await?;
		let mut m = self.begin(ctx, "create_egress_gateway", BTreeSet::from([net])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let mut node = live_node(tx, node_id).await?;
				let network = tx.network(&node.network).await?;
				check_egress_ranges(&network, &egress)?;
				node.egress = Some(egress);
				node.touch();
				tx.put_node(&node)?;
				Ok(node)
			})
			.await;
		let node = self.finish(ctx, m, staged).await?;
		info!(ranges = node.egress_ranges().len(), "egress gateway enabled");
		Ok(node)
	}

	#[tracing::instrument(skip(self, ctx), fields(%node_id))]
	pub async fn delete_egress_gateway(&self, ctx: &OpContext, node_id: &NodeId) -> Result<Node> {
		let net = self.network_of_node(ctx, node_id).await?;
		let mut m = self.begin(ctx, "delete_egress_gateway", BTreeSet::from([net])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let mut node = tx.node(node_id).await?;
				if node.egress.take().is_none() {
					return Err(OverlayError::Validation(format!("node {node_id} is not an egress gateway")));
				}
				node.touch();
				tx.put_node(&node)?;
				Ok(node)
			})
			.await;
		self.finish(ctx, m, staged).await
	}

	/// Lets other nodes route all of their traffic through `node_id`.
	#[tracing::instrument(skip(self, ctx), fields(%node_id))]
	pub async fn create_internet_gateway(&self, ctx: &OpContext, node_id: &NodeId) -> Result<Node> {
		let net = self.network_of_node(ctx, node_id).await?;
		let mut m = self.begin(ctx, "create_internet_gateway", BTreeSet::from([net])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let mut node = live_node(tx, node_id).await?;
				if let Some(gw) = node.internet_gw {
					return Err(OverlayError::Conflict(format!(
						"node {node_id} routes through internet gateway {gw} and cannot be one"
					)));
				}
				node.is_internet_gw = true;
				node.touch();
				tx.put_node(&node)?;
				Ok(node)
			})
			.await;
		self.finish(ctx, m, staged).await
	}

	/// Clears the designation and detaches every node routing through it.
	#[tracing::instrument(skip(self, ctx), fields(%node_id))]
	pub async fn delete_internet_gateway(&self, ctx: &OpContext, node_id: &NodeId) -> Result<Node> {
		let net = self.network_of_node(ctx, node_id).await?;
		let mut m = self.begin(ctx, "delete_internet_gateway", BTreeSet::from([net])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let mut node = tx.node(node_id).await?;
				if !node.is_internet_gw {
					return Err(OverlayError::Validation(format!("node {node_id} is not an internet gateway")));
				}
				for client_id in std::mem::take(&mut node.internet_gw_for) {
					if let Some(mut client) = tx.node_opt(&client_id).await? {
						client.internet_gw = None;
						client.touch();
						tx.put_node(&client)?;
					}
				}
				node.is_internet_gw = false;
				node.touch();
				tx.put_node(&node)?;
				Ok(node)
			})
			.await;
		self.finish(ctx, m, staged).await
	}

	/// Routes all of `node_id`'s traffic through `gateway_id`.
	#[tracing::instrument(skip(self, ctx), fields(%node_id, %gateway_id))]
	pub async fn set_internet_gateway(&self, ctx: &OpContext, node_id: &NodeId, gateway_id: &NodeId) -> Result<Node> {
		if node_id == gateway_id {
			return Err(OverlayError::Conflict(format!("node {node_id} cannot be its own internet gateway")));
		}
		let net = self.network_of_node(ctx, node_id).await?;
		let mut m = self.begin(ctx, "set_internet_gateway", BTreeSet::from([net])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let mut node = live_node(tx, node_id).await?;
				let mut gateway = live_node(tx, gateway_id).await?;
				if gateway.network != node.network {
					return Err(OverlayError::Validation(format!(
						"internet gateway {gateway_id} is not in network {}",
						node.network
					)));
				}
				if !gateway.is_internet_gw {
					return Err(OverlayError::Validation(format!("node {gateway_id} is not an internet gateway")));
				}
				if node.is_internet_gw {
					return Err(OverlayError::Conflict(format!(
						"node {node_id} is an internet gateway and cannot route through another"
					)));
				}

				if let Some(previous) = node.internet_gw.filter(|p| p != gateway_id) {
					if let Some(mut old) = tx.node_opt(&previous).await? {
						old.internet_gw_for.remove(node_id);
						old.touch();
						tx.put_node(&old)?;
					}
				}
				node.internet_gw = Some(*gateway_id);
				node.touch();
				gateway.internet_gw_for.insert(*node_id);
				gateway.touch();
				tx.put_node(&node)?;
				tx.put_node(&gateway)?;
				Ok(node)
			})
			.await;
		self.finish(ctx, m, staged).await
	}

	#[tracing::instrument(skip(self, ctx), fields(%node_id))]
	pub async fn unset_internet_gateway(&self, ctx: &OpContext, node_id: &NodeId) -> Result<Node> {
		let net = self.network_of_node(ctx, node_id).await?;
		let mut m = self.begin(ctx, "unset_internet_gateway", BTreeSet::from([net])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let mut node = tx.node(node_id).await?;
				let Some(gateway_id) = node.internet_gw.take() else {
					return Ok(node);
				};
				if let Some(mut gateway) = tx.node_opt(&gateway_id).await? {
					gateway.internet_gw_for.remove(node_id);
					gateway.touch();
					tx.put_node(&gateway)?;
				}
				node.touch();
				tx.put_node(&node)?;
				Ok(node)
			})
			.await;
		self.finish(ctx, m, staged).await
	}

	/// Makes `relay_id` the relay for exactly `relayed`. Nodes it relayed
	/// before and that are not listed go back to direct routing; listed nodes
	/// relayed elsewhere move over.
	#[tracing::instrument(skip(self, ctx, relayed), fields(%relay_id, relayed = relayed.len()))]
	pub async fn create_relay(&self, ctx: &OpContext, relay_id: &NodeId, relayed: BTreeSet<NodeId>) -> Result<Node> {
		let net = self.network_of_node(ctx, relay_id).await?;
		let mut m = self.begin(ctx, "create_relay", BTreeSet::from([net.clone()])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let mut nodes: BTreeMap<NodeId, Node> =
					tx.nodes_in(&net).await?.into_iter().map(|n| (n.id, n)).collect();
				validate_relay(&nodes, relay_id, &relayed)?;

				let mut changed = BTreeSet::from([*relay_id]);
				for node in nodes.values_mut() {
					if node.relayed_by == Some(*relay_id) && !relayed.contains(&node.id) {
						node.relayed_by = None;
						changed.insert(node.id);
					}
				}
				for id in &relayed {
					let previous = nodes.get(id).and_then(|n| n.relayed_by);
					if let Some(old) = previous.filter(|old| old != relay_id) {
						if let Some(old_relay) = nodes.get_mut(&old) {
							old_relay.relayed_nodes.remove(id);
							changed.insert(old);
						}
					}
					if let Some(node) = nodes.get_mut(id) {
						node.relayed_by = Some(*relay_id);
						changed.insert(*id);
					}
				}
				if let Some(relay) = nodes.get_mut(relay_id) {
					relay.is_relay = true;
					relay.relayed_nodes = relayed.clone();
				}

				for id in &changed {
					if let Some(node) = nodes.get_mut(id) {
						node.touch();
						tx.put_node(node)?;
					}
				}
				nodes
					.remove(relay_id)
					.ok_or_else(|| OverlayError::NotFound(format!("relay node {relay_id}")))
			})
			.await;
		let relay = self.finish(ctx, m, staged).await?;
		info!(network = %relay.network, relayed = relay.relayed_nodes.len(), "relay configured");
		Ok(relay)
	}

	/// Turns the relay off; every node it relayed reverts to direct routing.
	#[tracing::instrument(skip(self, ctx), fields(%relay_id))]
	pub async fn delete_relay(&self, ctx: &OpContext, relay_id: &NodeId) -> Result<Node> {
		let net = self.network_of_node(ctx, relay_id).await?;
		let mut m = self.begin(ctx, "delete_relay", BTreeSet::from([net])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let mut relay = tx.node(relay_id).await?;
				if !relay.is_relay {
					return Err(OverlayError::Validation(format!("node {relay_id} is not a relay")));
				}
				for id in std::mem::take(&mut relay.relayed_nodes) {
					if let Some(mut node) = tx.node_opt(&id).await? {
						if node.relayed_by == Some(*relay_id) {
							node.relayed_by = None;
							node.touch();
							tx.put_node(&node)?;
						}
					}
				}
				relay.is_relay = false;
				relay.touch();
				tx.put_node(&relay)?;
				Ok(relay)
			})
			.await;
		self.finish(ctx, m, staged).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use netmaker_common_model::{EgressRange, NetId};

	#[test]
	fn egress_may_not_shadow_the_overlay() {
		let network = Network::new(NetId::new("net1").unwrap(), Some("10.0.0.0/24".parse().unwrap()), None);
		let inside = EgressConfig {
			nat: false,
			ranges: vec![EgressRange::new("10.0.0.0/16".parse().unwrap())],
		};
		assert!(check_egress_ranges(&network, &inside).is_err());

		let outside = EgressConfig {
			nat: true,
			ranges: vec![EgressRange::new("192.168.0.0/16".parse().unwrap())],
		};
		assert!(check_egress_ranges(&network, &outside).is_ok());
	}
}
