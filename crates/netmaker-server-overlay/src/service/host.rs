// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netmaker_common_model::{Host, HostId, NetId, Node};
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tracing::info;

use super::node::NodeOptions;
use super::OverlayService;
use crate::context::OpContext;
use crate::error::{OverlayError, Result};
use crate::repo::OverlayTx;

#[derive(Debug, Clone, Default)]
pub struct HostUpdate {
	pub name: Option<String>,
	pub listen_port: Option<u16>,
	pub mtu: Option<u16>,
	pub persistent_keepalive: Option<u16>,
	pub endpoint_ip: Option<Ipv4Addr>,
	pub endpoint_ipv6: Option<Ipv6Addr>,
	pub is_static: Option<bool>,
	pub is_static_port: Option<bool>,
	pub turn_endpoint: Option<SocketAddr>,
	pub is_default: Option<bool>,
}

impl HostUpdate {
	fn apply(self, host: &mut Host) {
		if let Some(name) = self.name {
			host.name = name;
		}
		if let Some(port) = self.listen_port {
			host.listen_port = port;
		}
		if let Some(mtu) = self.mtu {
			host.mtu = Some(mtu);
		}
		if let Some(keepalive) = self.persistent_keepalive {
			host.persistent_keepalive = Some(keepalive);
		}
		if let Some(ip) = self.endpoint_ip {
			host.endpoint_ip = Some(ip);
		}
		if let Some(ip) = self.endpoint_ipv6 {
			host.endpoint_ipv6 = Some(ip);
		}
		if let Some(is_static) = self.is_static {
			host.is_static = is_static;
		}
		if let Some(is_static_port) = self.is_static_port {
			host.is_static_port = is_static_port;
		}
		if let Some(turn) = self.turn_endpoint {
			host.turn_endpoint = Some(turn);
		}
		if let Some(is_default) = self.is_default {
			host.is_default = is_default;
		}
	}
}

/// Stores a new host, rejecting duplicate ids and public keys.
pub(crate) async fn stage_create_host(tx: &mut OverlayTx, host: &Host) -> Result<()> {
	host.validate()?;
	if tx.host_opt(&host.id).await?.is_some() {
		return Err(OverlayError::Conflict(format!("host {} already exists", host.id)));
	}
	if tx.hosts().await?.iter().any(|h| h.public_key == host.public_key) {
		return Err(OverlayError::Conflict(format!(
			"public key {} is already registered",
			host.public_key
		)));
	}
	tx.put_host(host)
}

impl OverlayService {
	#[tracing::instrument(skip(self, ctx, host), fields(host_id = %host.id))]
	pub async fn create_host(&self, ctx: &OpContext, host: Host) -> Result<Host> {
		let mut m = self.begin(ctx, "create_host", BTreeSet::new()).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				stage_create_host(tx, &host).await?;
				Ok(host)
			})
			.await;
		let host = self.finish(ctx, m, staged).await?;
		info!(name = %host.name, "host created");
		Ok(host)
	}

	/// Applies `update` and marks every network the host is in dirty.
	#[tracing::instrument(skip(self, ctx, update), fields(%host_id))]
	pub async fn update_host(&self, ctx: &OpContext, host_id: &HostId, update: HostUpdate) -> Result<Host> {
		let nets = self.networks_of_host(host_id).await?;
		let mut m = self.begin(ctx, "update_host", nets).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let mut host = tx.host(host_id).await?;
				update.apply(&mut host);
				host.validate()?;
				tx.put_host(&host)?;
				for node in tx.nodes_of_host(host_id).await? {
					tx.mark_dirty(&node.network);
				}
				Ok(host)
			})
			.await;
		self.finish(ctx, m, staged).await
	}

	/// Deletes the host and immediately removes every node it owns.
	#[tracing::instrument(skip(self, ctx), fields(%host_id))]
	pub async fn delete_host(&self, ctx: &OpContext, host_id: &HostId) -> Result<()> {
		let nets = self.networks_of_host(host_id).await?;
		let mut m = self.begin(ctx, "delete_host", nets).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				tx.host(host_id).await?;
				let nodes = tx.nodes_of_host(host_id).await?;
				for node in &nodes {
					super::node::stage_remove_node(tx, node.id).await?;
				}
				tx.delete_host(host_id)?;
				Ok(nodes.len())
			})
			.await;
		let removed = self.finish(ctx, m, staged).await?;

		self.metrics.forget(host_id).await;
		self.observations.forget(host_id).await;
		info!(nodes = removed, "host deleted");
		Ok(())
	}

	pub async fn get_host(&self, ctx: &OpContext, host_id: &HostId) -> Result<Host> {
		let reader = self.reader();
		ctx.run(reader.host(host_id)).await
	}

	pub async fn list_hosts(&self, ctx: &OpContext) -> Result<Vec<Host>> {
		let reader = self.reader();
		ctx.run(reader.hosts()).await
	}

	pub async fn add_host_to_network(
		&self,
		ctx: &OpContext,
		host_id: &HostId,
		net: &NetId,
		options: NodeOptions,
	) -> Result<Node> {
		self.create_node(ctx, host_id, net, options).await
	}

	/// Starts two-phase removal of the host's node in `net`.
	pub async fn remove_host_from_network(&self, ctx: &OpContext, host_id: &HostId, net: &NetId) -> Result<Node> {
		let reader = self.reader();
		let node = ctx
			.run(async {
				reader
					.nodes_in(net)
					.await?
					.into_iter()
					.find(|n| &n.host_id == host_id)
					.ok_or_else(|| OverlayError::NotFound(format!("host {host_id} has no node in {net}")))
			})
			.await?;
		self.mark_node_pending_delete(ctx, &node.id).await
	}
}
