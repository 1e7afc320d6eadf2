// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netmaker_common_model::{validate, AclContainer, AclValue, DefaultAcl, NetId, Network, NodeAcl, NodeId};
use std::collections::BTreeSet;
use std::net::IpAddr;
use tracing::info;

use super::OverlayService;
use crate::acl::apply_node_default;
use crate::context::OpContext;
use crate::error::{OverlayError, Result};

#[derive(Debug, Clone, Default)]
pub struct NetworkUpdate {
	pub default_acl: Option<DefaultAcl>,
	pub default_keepalive: Option<u16>,
	pub default_mtu: Option<u16>,
	pub default_listen_port: Option<u16>,
	pub name_servers: Option<Vec<IpAddr>>,
	pub allow_manual_signup: Option<bool>,
}

impl OverlayService {
	#[tracing::instrument(skip(self, ctx, network), fields(net = %network.net_id))]
	pub async fn create_network(&self, ctx: &OpContext, network: Network) -> Result<Network> {
		network.validate()?;
		let net = network.net_id.clone();

		let mut m = self.begin(ctx, "create_network", BTreeSet::from([net.clone()])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				if tx.network_opt(&net).await?.is_some() {
					return Err(OverlayError::Conflict(format!("network {net} already exists")));
				}
				tx.put_network(&network)?;
				tx.put_acl(&AclContainer::new(net.clone()))?;
				Ok(network)
			})
			.await;
		let network = self.finish(ctx, m, staged).await?;

		info!(
			range = ?network.address_range,
			range6 = ?network.address_range6,
			"network created"
		);
		Ok(network)
	}

	/// Changing the default ACL resets every pair to the new default, then
	/// re-applies node-level defaults.
	#[tracing::instrument(skip(self, ctx, update), fields(%net))]
	pub async fn update_network(&self, ctx: &OpContext, net: &NetId, update: NetworkUpdate) -> Result<Network> {
		if let Some(keepalive) = update.default_keepalive {
			validate::keepalive("default_keepalive", keepalive)?;
		}
		if let Some(mtu) = update.default_mtu {
			validate::mtu("default_mtu", mtu)?;
		}
		if let Some(port) = update.default_listen_port {
			validate::port("default_listen_port", port)?;
		}

		let mut m = self.begin(ctx, "update_network", BTreeSet::from([net.clone()])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let mut network = tx.network(net).await?;
				let acl_changed = update.default_acl.is_some_and(|acl| acl != network.default_acl);

				if let Some(acl) = update.default_acl {
					network.default_acl = acl;
				}
				if let Some(keepalive) = update.default_keepalive {
					network.default_keepalive = keepalive;
				}
				if let Some(mtu) = update.default_mtu {
					network.default_mtu = mtu;
				}
				if let Some(port) = update.default_listen_port {
					network.default_listen_port = port;
				}
				if let Some(servers) = update.name_servers {
					network.name_servers = servers;
				}
				if let Some(manual) = update.allow_manual_signup {
					network.allow_manual_signup = manual;
				}
				network.validate()?;
				network.touch();
				tx.put_network(&network)?;

				if acl_changed {
					let nodes = tx.nodes_in(net).await?;
					let mut acl = tx.acl(net).await?;
					let value = AclValue::from_default(network.default_acl);
					let ids: Vec<NodeId> = nodes.iter().map(|n| n.id).collect();
					for (i, a) in ids.iter().enumerate() {
						for b in &ids[i + 1..] {
							acl.matrix.set(*a, *b, value);
						}
					}
					for node in nodes.iter().filter(|n| n.default_acl != NodeAcl::Unset) {
						apply_node_default(&mut acl.matrix, node);
					}
					tx.put_acl(&acl)?;
				}
				Ok(network)
			})
			.await;
		self.finish(ctx, m, staged).await
	}

	/// Removes a network that has no live nodes left, along with its
	/// pending nodes, ext-clients and ACLs. Enrollment keys lose the network.
	#[tracing::instrument(skip(self, ctx), fields(%net))]
	pub async fn delete_network(&self, ctx: &OpContext, net: &NetId) -> Result<()> {
		let mut m = self.begin(ctx, "delete_network", BTreeSet::from([net.clone()])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				tx.network(net).await?;
				let nodes = tx.nodes_in(net).await?;
				let live = nodes.iter().filter(|n| n.is_live()).count();
				if live > 0 {
					return Err(OverlayError::Conflict(format!("network {net} still has {live} active nodes")));
				}

				for node in &nodes {
					tx.delete_relay_state(net, &node.id)?;
					tx.delete_node(node)?;
				}
				for client in tx.ext_clients_in(net).await? {
					tx.delete_ext_client(&client)?;
				}
				for mut key in tx.enrollment_keys().await? {
					if key.networks.remove(net) {
						if key.networks.is_empty() {
							tx.delete_enrollment_key(&key.token)?;
						} else {
							tx.put_enrollment_key(&key)?;
						}
					}
				}
				tx.delete_acl(net)?;
				tx.delete_network(net)?;
				Ok(nodes.len())
			})
			.await;
		let removed = self.finish(ctx, m, staged).await?;

		info!(pending_nodes = removed, "network deleted");
		Ok(())
	}

	pub async fn get_network(&self, ctx: &OpContext, net: &NetId) -> Result<Network> {
		let reader = self.reader();
		ctx.run(reader.network(net)).await
	}

	pub async fn list_networks(&self, ctx: &OpContext) -> Result<Vec<Network>> {
		let reader = self.reader();
		ctx.run(reader.networks()).await
	}
}
