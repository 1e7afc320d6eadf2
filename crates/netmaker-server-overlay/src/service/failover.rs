// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netmaker_common_model::{NetId, Network, NodeId};
use std::collections::BTreeSet;
use tracing::info;

use super::OverlayService;
use crate::context::OpContext;
use crate::error::{OverlayError, Result};

impl OverlayService {
	/// Nominates the node used when no measured failover candidate exists.
	#[tracing::instrument(skip(self, ctx), fields(%net, %node_id))]
	pub async fn set_failover(&self, ctx: &OpContext, net: &NetId, node_id: &NodeId) -> Result<Network> {
		let mut m = self.begin(ctx, "set_failover", BTreeSet::from([net.clone()])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let node = tx.node(node_id).await?;
				if &node.network != net {
					return Err(OverlayError::NotFound(format!("node {node_id} in network {net}")));
				}
				if !node.is_live() {
					return Err(OverlayError::Validation(format!("node {node_id} is pending deletion")));
				}
				let mut network = tx.network(net).await?;
				network.failover_node = Some(*node_id);
				network.touch();
				tx.put_network(&network)?;
				Ok(network)
			})
			.await;
		self.finish(ctx, m, staged).await
	}

	#[tracing::instrument(skip(self, ctx), fields(%net))]
	pub async fn unset_failover(&self, ctx: &OpContext, net: &NetId) -> Result<Network> {
		let mut m = self.begin(ctx, "unset_failover", BTreeSet::from([net.clone()])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let mut network = tx.network(net).await?;
				network.failover_node = None;
				network.touch();
				tx.put_network(&network)?;
				Ok(network)
			})
			.await;
		self.finish(ctx, m, staged).await
	}

	/// Drops every failover route and health counter in the network.
	/// Returns how many routes were removed.
	#[tracing::instrument(skip(self, ctx), fields(%net))]
	pub async fn reset_failover(&self, ctx: &OpContext, net: &NetId) -> Result<usize> {
		let mut m = self.begin(ctx, "reset_failover", BTreeSet::from([net.clone()])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				tx.network(net).await?;
				let mut removed = 0;
				for mut node in tx.nodes_in(net).await? {
					tx.delete_relay_state(net, &node.id)?;
					if node.failover_peers.is_empty() {
						continue;
					}
					removed += node.failover_peers.len();
					node.failover_peers.clear();
					node.touch();
					tx.put_node(&node)?;
				}
				Ok(removed)
			})
			.await;
		let removed = self.finish(ctx, m, staged).await?;
		info!(routes = removed, "failover reset");
		Ok(removed)
	}
}
