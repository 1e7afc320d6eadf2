// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netmaker_common_model::{AclContainer, AclValue, NetId, Node, NodeId};
use std::collections::BTreeSet;

use super::OverlayService;
use crate::acl;
use crate::context::OpContext;
use crate::error::{OverlayError, Result};
use crate::repo::OverlayTx;

async fn node_in(tx: &OverlayTx, net: &NetId, node_id: &NodeId) -> Result<Node> {
	let node = tx.node(node_id).await?;
	if &node.network != net {
		return Err(OverlayError::NotFound(format!("node {node_id} in network {net}")));
	}
	Ok(node)
}

impl OverlayService {
	/// Writes both `[a][b]` and `[b][a]`.
	#[tracing::instrument(skip(self, ctx), fields(%net, %a, %b, ?value))]
	pub async fn acl_set(
		&self,
		ctx: &OpContext,
		net: &NetId,
		a: &NodeId,
		b: &NodeId,
		value: AclValue,
	) -> Result<AclContainer> {
		if a == b {
			return Err(OverlayError::Validation("an acl pair needs two distinct nodes".to_string()));
		}
		let mut m = self.begin(ctx, "acl_set", BTreeSet::from([net.clone()])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				node_in(tx, net, a).await?;
				node_in(tx, net, b).await?;
				let mut container = tx.acl(net).await?;
				container.matrix.set(*a, *b, value);
				tx.put_acl(&container)?;
				Ok(container)
			})
			.await;
		self.finish(ctx, m, staged).await
	}

	pub async fn acl_get(&self, ctx: &OpContext, net: &NetId) -> Result<AclContainer> {
		let reader = self.reader();
		ctx.run(async {
			reader.network(net).await?;
			reader.acl(net).await
		})
		.await
	}

	/// Resolves the pair the same way peer maps do.
	pub async fn acl_is_allowed(&self, ctx: &OpContext, net: &NetId, a: &NodeId, b: &NodeId) -> Result<bool> {
		let reader = self.reader();
		ctx.run(async {
			let network = reader.network(net).await?;
			let node_a = node_in(&reader, net, a).await?;
			let node_b = node_in(&reader, net, b).await?;
			let container = reader.acl(net).await?;
			Ok(acl::is_allowed(&container.matrix, &network, &node_a, &node_b))
		})
		.await
	}
}
