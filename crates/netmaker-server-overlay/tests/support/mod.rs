// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use ipnet::IpNet;
use netmaker_common_model::{Host, NetId, Network, Node, NodeId, PeerUpdate, WgPublicKey};
use netmaker_server_db::testing::sqlite_memory_store;
use netmaker_server_db::KvStore;
use netmaker_server_overlay::{
	resolve, DirtyNotifier, NodeOptions, OpContext, OverlayConfig, OverlayService, RecordingNotifier,
};
use std::net::Ipv4Addr;
use std::sync::Arc;

pub struct Harness {
	pub service: OverlayService,
	pub notifier: Arc<RecordingNotifier>,
	pub ctx: OpContext,
	pub net: NetId,
}

pub async fn harness(range: &str) -> Harness {
	harness_with_store(sqlite_memory_store().await, range).await
}

pub async fn harness_with_store(store: KvStore, range: &str) -> Harness {
	let notifier = Arc::new(RecordingNotifier::new());
	let service = OverlayService::new(
		store,
		notifier.clone() as Arc<dyn DirtyNotifier>,
		OverlayConfig::default(),
	);
	let ctx = service.context();
	let net = NetId::new("net1").unwrap();
	service
		.create_network(&ctx, Network::new(net.clone(), Some(range.parse().unwrap()), None))
		.await
		.unwrap();
	notifier.take();
	Harness {
		service,
		notifier,
		ctx,
		net,
	}
}

pub fn key(n: u8) -> WgPublicKey {
	WgPublicKey::from_bytes([n; 32])
}

impl Harness {
	/// Creates a host whose key is `[n; 32]` and joins it to the network.
	pub async fn join(&self, n: u8) -> Node {
		self.join_with(n, NodeOptions::default()).await
	}

	pub async fn join_with(&self, n: u8, options: NodeOptions) -> Node {
		let mut host = Host::new(format!("host-{n}"), key(n));
		host.endpoint_ip = Some(Ipv4Addr::new(203, 0, 113, n));
		host.os = "linux".to_string();
		let host = self.service.create_host(&self.ctx, host).await.unwrap();
		self.service
			.create_node(&self.ctx, &host.id, &self.net, options)
			.await
			.unwrap()
	}

	pub async fn peers_of(&self, node: &NodeId) -> PeerUpdate {
		let snapshot = self.service.snapshot(&self.net).await.unwrap().unwrap();
		resolve(&snapshot, node).unwrap()
	}

	/// Peer keys with their allowed IPs rendered as strings.
	pub async fn peer_table(&self, node: &NodeId) -> Vec<(WgPublicKey, Vec<String>)> {
		self.peers_of(node)
			.await
			.peers
			.into_iter()
			.map(|p| (p.public_key, p.allowed_ips.iter().map(IpNet::to_string).collect()))
			.collect()
	}
}

pub fn ips(list: &[&str]) -> Vec<String> {
	list.iter().map(|s| s.to_string()).collect()
}
