// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use ipnet::IpNet;
use netmaker_common_model::{ExtClient, ExtClientConfig, ExtClientId, NetId, NodeId, WgPublicKey};
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::info;

use super::OverlayService;
use crate::alloc::IpAllocator;
use crate::context::OpContext;
use crate::error::{OverlayError, Result};

#[derive(Debug, Clone)]
pub struct ExtClientSpec {
	pub client_id: ExtClientId,
	pub ingress_node: NodeId,
	pub public_key: WgPublicKey,
	pub address: Option<Ipv4Addr>,
	pub address6: Option<Ipv6Addr>,
	pub denied_nodes: BTreeSet<NodeId>,
	pub enabled: bool,
}

impl ExtClientSpec {
	pub fn new(client_id: ExtClientId, ingress_node: NodeId, public_key: WgPublicKey) -> Self {
		Self {
			client_id,
			ingress_node,
			public_key,
			address: None,
			address6: None,
			denied_nodes: BTreeSet::new(),
			enabled: true,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct ExtClientUpdate {
	pub enabled: Option<bool>,
	pub denied_nodes: Option<BTreeSet<NodeId>>,
}

impl OverlayService {
	#[tracing::instrument(skip(self, ctx, spec), fields(%net, client = %spec.client_id))]
	pub async fn create_ext_client(&self, ctx: &OpContext, net: &NetId, spec: ExtClientSpec) -> Result<ExtClient> {
		let mut m = self.begin(ctx, "create_ext_client", BTreeSet::from([net.clone()])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let network = tx.network(net).await?;
				let ingress = tx.node(&spec.ingress_node).await?;
				if &ingress.network != net {
					return Err(OverlayError::Validation(format!(
						"ingress node {} is not in network {net}",
						ingress.id
					)));
				}
				if !ingress.is_live() || !ingress.is_ingress() {
					return Err(OverlayError::Validation(format!(
						"node {} is not an active ingress gateway",
						ingress.id
					)));
				}

				let clients = tx.ext_clients_in(net).await?;
				if clients.iter().any(|c| c.client_id == spec.client_id) {
					return Err(OverlayError::Conflict(format!("ext client {} already exists", spec.client_id)));
				}
				if clients.iter().any(|c| c.public_key == spec.public_key) {
					return Err(OverlayError::Conflict(format!(
						"public key {} is already used by an ext client",
						spec.public_key
					)));
				}

				let nodes = tx.nodes_in(net).await?;
				let mut alloc = IpAllocator::from_entities(&network, &nodes, &clients);
				let (address, address6) = alloc.allocate(spec.address, spec.address6)?;

				let mut client = ExtClient::new(spec.client_id, net.clone(), ingress.id, spec.public_key);
				client.address = address;
				client.address6 = address6;
				client.denied_nodes = spec.denied_nodes;
				client.enabled = spec.enabled;
				tx.put_ext_client(&client)?;
				Ok(client)
			})
			.await;
		let client = self.finish(ctx, m, staged).await?;
		info!(address = ?client.address, ingress = %client.ingress_node, "ext client created");
		Ok(client)
	}

	#[tracing::instrument(skip(self, ctx, update), fields(%net, %client_id))]
	pub async fn update_ext_client(
		&self,
		ctx: &OpContext,
		net: &NetId,
		client_id: &ExtClientId,
		update: ExtClientUpdate,
	) -> Result<ExtClient> {
		let mut m = self.begin(ctx, "update_ext_client", BTreeSet::from([net.clone()])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let mut client = tx.ext_client(net, client_id).await?;
				if let Some(enabled) = update.enabled {
					client.enabled = enabled;
				}
				if let Some(denied) = update.denied_nodes {
					client.denied_nodes = denied;
				}
				client.updated_at = chrono::Utc::now();
				tx.put_ext_client(&client)?;
				Ok(client)
			})
			.await;
		self.finish(ctx, m, staged).await
	}

	#[tracing::instrument(skip(self, ctx), fields(%net, %client_id))]
	pub async fn delete_ext_client(&self, ctx: &OpContext, net: &NetId, client_id: &ExtClientId) -> Result<()> {
		let mut m = self.begin(ctx, "delete_ext_client", BTreeSet::from([net.clone()])).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let client = tx.ext_client(net, client_id).await?;
				tx.delete_ext_client(&client)
			})
			.await;
		self.finish(ctx, m, staged).await
	}

	pub async fn get_ext_client(&self, ctx: &OpContext, net: &NetId, client_id: &ExtClientId) -> Result<ExtClient> {
		let reader = self.reader();
		ctx.run(reader.ext_client(net, client_id)).await
	}

	pub async fn list_ext_clients(&self, ctx: &OpContext, net: &NetId) -> Result<Vec<ExtClient>> {
		let reader = self.reader();
		ctx.run(reader.ext_clients_in(net)).await
	}

	/// The WireGuard view an ext-client should be configured with.
	#[tracing::instrument(skip(self, ctx), fields(%net, %client_id))]
	pub async fn ext_client_config(
		&self,
		ctx: &OpContext,
		net: &NetId,
		client_id: &ExtClientId,
	) -> Result<ExtClientConfig> {
		let reader = self.reader();
		ctx.run(async {
			let network = reader.network(net).await?;
			let client = reader.ext_client(net, client_id).await?;
			let ingress = reader.node(&client.ingress_node).await?;
			let host = reader.host(&ingress.host_id).await?;
			let gateway = ingress.ingress.clone().unwrap_or_default();

			let allowed_ips: Vec<IpNet> = if gateway.ranges.is_empty() {
				network
					.address_range
					.map(IpNet::V4)
					.into_iter()
					.chain(network.address_range6.map(IpNet::V6))
					.collect()
			} else {
				gateway.ranges.clone()
			};
			let dns_servers = if gateway.dns.is_empty() {
				network.name_servers.clone()
			} else {
				gateway.dns.clone()
			};

			Ok(ExtClientConfig {
				client_id: client.client_id.clone(),
				network: net.clone(),
				addresses: client.host_nets(),
				dns_servers,
				mtu: gateway.mtu.unwrap_or(network.default_mtu),
				gateway_public_key: host.public_key,
				gateway_endpoint: host.public_endpoint(),
				allowed_ips,
				persistent_keepalive_seconds: gateway.keepalive.unwrap_or(network.default_keepalive),
			})
		})
		.await
	}
}
