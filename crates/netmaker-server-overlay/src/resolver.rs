// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Peer-map resolution: turns a network snapshot into one `PeerUpdate` per
//! node.
//!
//! Resolution is pure and deterministic. Every node first picks the node
//! that actually carries traffic towards each permitted peer (the peer
//! itself, its relay, our relay, or an engaged failover node), then the
//! routes of all peers behind the same carrier are merged into a single
//! WireGuard peer entry. Broken edges are dropped with a warning; the rest
//! of the update is still produced.

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use netmaker_common_model::{
	EgressRoute, ExtClient, ExtClientEntry, Host, InterfaceConfig, Node, NodeId, PeerConfig, PeerUpdate,
	WgPublicKey,
};
use std::collections::{BTreeMap, BTreeSet};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tracing::{debug, warn};

use crate::acl;
use crate::snapshot::NetworkSnapshot;

#[derive(Default)]
struct Route {
	allowed: BTreeSet<IpNet>,
	egress: BTreeMap<IpNet, u32>,
	relay_for: BTreeSet<NodeId>,
	carries_ext_clients: bool,
	full_tunnel: bool,
}

fn default_routes() -> Vec<IpNet> {
	[
		Ipv4Net::new(Ipv4Addr::UNSPECIFIED, 0).map(IpNet::V4),
		Ipv6Net::new(Ipv6Addr::UNSPECIFIED, 0).map(IpNet::V6),
	]
	.into_iter()
	.flatten()
	.collect()
}

/// Resolves the update for every node of the snapshot, ordered by node id.
pub fn resolve_all(snapshot: &NetworkSnapshot) -> Vec<PeerUpdate> {
	snapshot
		.nodes
		.keys()
		.filter_map(|id| resolve(snapshot, id))
		.collect()
}

/// Resolves the update for one node.
///
/// Returns `None` when the node or its host is missing. A pending-delete
/// node gets an update without peers so it learns of its eviction.
pub fn resolve(snapshot: &NetworkSnapshot, node_id: &NodeId) -> Option<PeerUpdate> {
	let me = snapshot.nodes.get(node_id)?;
	let Some(my_host) = snapshot.host_of(me) else {
		warn!(node = %me.id, host = %me.host_id, "node has no host, skipping peer update");
		return None;
	};

	let mut update = PeerUpdate {
		network: snapshot.net_id().clone(),
		host_id: me.host_id,
		node_id: me.id,
		sequence: 0,
		server_time: 0,
		interface: interface(snapshot, me, my_host),
		peers: Vec::new(),
		ext_clients: Vec::new(),
	};
	if !me.is_live() {
		return Some(update);
	}

	let mut routes: BTreeMap<NodeId, Route> = BTreeMap::new();
	let mut carrier_of: BTreeMap<NodeId, NodeId> = BTreeMap::new();

	for peer in snapshot.live_nodes() {
		if peer.id == me.id {
			continue;
		}
		if !acl::is_allowed(&snapshot.acl.matrix, &snapshot.network, me, peer) {
			debug!(node = %me.id, peer = %peer.id, "peer denied by acl");
			continue;
		}

		let Some(carrier) = carrier(snapshot, me, peer) else {
			continue;
		};
		let route = routes.entry(carrier).or_default();
		route.allowed.extend(peer.host_nets());
		for range in peer.egress_ranges() {
			route.allowed.insert(range.cidr);
			route.egress.insert(range.cidr, range.metric);
		}
		if carrier != peer.id {
			route.relay_for.insert(peer.id);
		}
		carrier_of.insert(peer.id, carrier);
	}

	// Ext-clients sit behind their ingress node.
	for client in snapshot.ext_clients.iter().filter(|c| c.enabled) {
		if client.ingress_node == me.id || !acl::is_ext_client_allowed(client, &me.id) {
			continue;
		}
		if let Some(carrier) = carrier_of.get(&client.ingress_node) {
			if let Some(route) = routes.get_mut(carrier) {
				route.allowed.extend(client.host_nets());
				route.carries_ext_clients = true;
			}
		}
	}

	if let Some(gw) = me.internet_gw {
		match carrier_of.get(&gw).and_then(|c| routes.get_mut(c)) {
			Some(route) => route.full_tunnel = true,
			None => warn!(node = %me.id, gateway = %gw, "internet gateway is not a reachable peer"),
		}
	}

	let mut peers: BTreeMap<WgPublicKey, PeerConfig> = BTreeMap::new();
	for (carrier_id, route) in routes {
		let Some(carrier) = snapshot.live_node(&carrier_id) else {
			warn!(node = %me.id, carrier = %carrier_id, "carrier node vanished, dropping edge");
			continue;
		};
		let Some(carrier_host) = snapshot.host_of(carrier) else {
			warn!(node = %me.id, peer = %carrier_id, "peer has no host, dropping edge");
			continue;
		};
		let config = peer_config(snapshot, my_host, carrier, carrier_host, route);
		if peers.insert(config.public_key, config).is_some() {
			warn!(node = %me.id, peer = %carrier_id, "duplicate peer public key");
		}
	}

	if me.is_ingress() {
		for client in snapshot.ext_clients.iter().filter(|c| c.ingress_node == me.id) {
			if !client.enabled || !acl::is_ext_client_allowed(client, &me.id) {
				continue;
			}
			let config = ext_client_peer(snapshot, me, client);
			if peers.contains_key(&config.public_key) {
				warn!(node = %me.id, client = %client.client_id, "ext client key collides with a node, skipping");
				continue;
			}
			peers.insert(config.public_key, config);
			update.ext_clients.push(ExtClientEntry {
				client_id: client.client_id.clone(),
				public_key: client.public_key,
				address: client.address,
				address6: client.address6,
				denied_node_ids: client.denied_nodes.iter().copied().collect(),
			});
		}
	}

	update.peers = peers.into_values().collect();
	Some(update)
}

fn interface(snapshot: &NetworkSnapshot, me: &Node, host: &Host) -> InterfaceConfig {
	let network = &snapshot.network;
	let mut addresses = Vec::new();
	if let Some(addr) = me.address {
		let prefix = network.address_range.map_or(32, |r| r.prefix_len());
		addresses.push(IpNet::V4(Ipv4Net::new(addr, prefix).unwrap_or_else(|_| Ipv4Net::from(addr))));
	}
	if let Some(addr) = me.address6 {
		let prefix = network.address_range6.map_or(128, |r| r.prefix_len());
		addresses.push(IpNet::V6(Ipv6Net::new(addr, prefix).unwrap_or_else(|_| Ipv6Net::from(addr))));
	}
	InterfaceConfig {
		addresses,
		listen_port: host.listen_port,
		mtu: host.mtu.unwrap_or(network.default_mtu),
		dns_servers: network.name_servers.clone(),
	}
}

/// The node whose WireGuard peer entry carries traffic from `me` to `peer`.
///
/// `None` drops the edge: the only carrier left is one the ACL denies to
/// `me`.
fn carrier(snapshot: &NetworkSnapshot, me: &Node, peer: &Node) -> Option<NodeId> {
	let permitted = |via: &Node| acl::is_allowed(&snapshot.acl.matrix, &snapshot.network, me, via);

	if let Some(relay) = me.relayed_by.filter(|r| *r != peer.id) {
		match snapshot.live_node(&relay) {
			Some(r) if permitted(r) => return Some(relay),
			Some(_) => {
				warn!(node = %me.id, peer = %peer.id, %relay, "own relay denied by acl, dropping peer");
				return None;
			}
			None => warn!(node = %me.id, %relay, "own relay is missing, routing directly"),
		}
	}

	if let Some(via) = me.active_failover(&peer.id).filter(|v| *v != me.id) {
		match snapshot.live_node(&via) {
			Some(v) if permitted(v) => return Some(via),
			Some(_) => {
				warn!(node = %me.id, peer = %peer.id, %via, "failover node denied by acl, dropping peer");
				return None;
			}
			None => warn!(node = %me.id, peer = %peer.id, %via, "failover node is missing, routing directly"),
		}
	}

	if let Some(relay) = peer.relayed_by.filter(|r| *r != me.id) {
		match snapshot.live_node(&relay) {
			Some(r) if r.is_relay && permitted(r) => return Some(relay),
			Some(r) if r.is_relay => {
				warn!(node = %me.id, peer = %peer.id, %relay, "peer relay denied by acl, dropping peer");
				return None;
			}
			_ => warn!(peer = %peer.id, %relay, "peer relay is missing, routing directly"),
		}
	}

	Some(peer.id)
}

/// Local address for peers behind the same public IP, public endpoint
/// otherwise.
fn endpoint(my_host: &Host, peer: &Node, peer_host: &Host) -> Option<SocketAddr> {
	if my_host.id != peer_host.id && my_host.shares_public_ip_with(peer_host) {
		if let Some(local) = peer.local_address {
			return Some(SocketAddr::new(local, peer_host.listen_port));
		}
	}
	peer_host.public_endpoint()
}

fn keepalive(snapshot: &NetworkSnapshot, host: &Host) -> u16 {
	host.persistent_keepalive
		.filter(|k| *k > 0)
		.unwrap_or(snapshot.network.default_keepalive)
}

fn peer_config(
	snapshot: &NetworkSnapshot,
	my_host: &Host,
	carrier: &Node,
	carrier_host: &Host,
	route: Route,
) -> PeerConfig {
	let hole_punch = my_host.nat_type.is_symmetric()
		&& carrier_host.nat_type.is_symmetric()
		&& !my_host.is_static_port
		&& !carrier_host.is_static_port;

	// The internet gateway's entry is widened to the default routes.
	let allowed_ips: Vec<IpNet> = if route.full_tunnel {
		default_routes()
	} else {
		route.allowed.into_iter().collect()
	};

	PeerConfig {
		public_key: carrier_host.public_key,
		endpoint: endpoint(my_host, carrier, carrier_host),
		persistent_keepalive_seconds: keepalive(snapshot, carrier_host),
		allowed_ips,
		egress_routes: route
			.egress
			.into_iter()
			.map(|(cidr, metric)| EgressRoute { cidr, metric })
			.collect(),
		is_relay_for: route.relay_for.into_iter().collect(),
		is_ingress_for_ext_clients: route.carries_ext_clients.then_some(true),
		hole_punch_required: hole_punch.then_some(true),
		turn_endpoint: if hole_punch { carrier_host.turn_endpoint } else { None },
	}
}

fn ext_client_peer(snapshot: &NetworkSnapshot, ingress: &Node, client: &ExtClient) -> PeerConfig {
	let keepalive = ingress
		.ingress
		.as_ref()
		.and_then(|g| g.keepalive)
		.unwrap_or(snapshot.network.default_keepalive);
	PeerConfig {
		public_key: client.public_key,
		endpoint: None,
		persistent_keepalive_seconds: keepalive,
		allowed_ips: client
			.addresses()
			.into_iter()
			.map(IpNet::from)
			.collect::<BTreeSet<_>>()
			.into_iter()
			.collect(),
		egress_routes: Vec::new(),
		is_relay_for: Vec::new(),
		is_ingress_for_ext_clients: None,
		hole_punch_required: None,
		turn_endpoint: None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use netmaker_common_model::{
		AclContainer, AclValue, EgressConfig, EgressRange, ExtClientId, GatewayConfig, NatType, NetId, Network,
	};

	struct Fixture {
		snapshot: NetworkSnapshot,
		ids: Vec<NodeId>,
	}

	impl Fixture {
		fn new(count: u8) -> Self {
			let network = Network::new(NetId::new("net1").unwrap(), Some("10.0.0.0/24".parse().unwrap()), None);
			let mut acl = AclContainer::new(network.net_id.clone());
			let mut nodes = BTreeMap::new();
			let mut hosts = BTreeMap::new();
			let mut ids = Vec::new();
			for i in 0..count {
				let mut host = Host::new(format!("host{i}"), WgPublicKey::from_bytes([i + 1; 32]));
				host.endpoint_ip = Some(Ipv4Addr::new(203, 0, 113, i + 1));
				host.listen_port = 51821;
				let mut node = Node::new(host.id, network.net_id.clone());
				node.address = Some(Ipv4Addr::new(10, 0, 0, i + 1));
				acl.matrix.attach(node.id, AclValue::Allowed);
				ids.push(node.id);
				hosts.insert(host.id, host);
				nodes.insert(node.id, node);
			}
			Self {
				snapshot: NetworkSnapshot {
					network,
					nodes,
					hosts,
					ext_clients: Vec::new(),
					acl,
				},
				ids,
			}
		}

		fn node(&mut self, i: usize) -> &mut Node {
			self.snapshot.nodes.get_mut(&self.ids[i]).unwrap()
		}

		fn host(&mut self, i: usize) -> &mut Host {
			let host_id = self.snapshot.nodes[&self.ids[i]].host_id;
			self.snapshot.hosts.get_mut(&host_id).unwrap()
		}

		fn key(&self, i: usize) -> WgPublicKey {
			WgPublicKey::from_bytes([i as u8 + 1; 32])
		}

		fn relay(&mut self, relay: usize, relayed: usize) {
			let relayed_id = self.ids[relayed];
			let relay_id = self.ids[relay];
			let r = self.node(relay);
			r.is_relay = true;
			r.relayed_nodes.insert(relayed_id);
			self.node(relayed).relayed_by = Some(relay_id);
		}

		fn peers_of(&self, i: usize) -> Vec<PeerConfig> {
			resolve(&self.snapshot, &self.ids[i]).unwrap().peers
		}
	}

	fn nets(items: &[&str]) -> Vec<IpNet> {
		items.iter().map(|s| s.parse().unwrap()).collect()
	}

	#[test]
	fn full_mesh_sees_every_other_node() {
		let fx = Fixture::new(3);
		let peers = fx.peers_of(0);
		assert_eq!(peers.len(), 2);
		assert_eq!(peers[0].public_key, fx.key(1));
		assert_eq!(peers[0].allowed_ips, nets(&["10.0.0.2/32"]));
		assert_eq!(peers[0].endpoint, Some("203.0.113.2:51821".parse().unwrap()));
		assert_eq!(peers[0].persistent_keepalive_seconds, 20);

		let update = resolve(&fx.snapshot, &fx.ids[0]).unwrap();
		assert_eq!(update.interface.addresses, nets(&["10.0.0.1/24"]));
		assert_eq!(update.interface.mtu, 1420);
	}

	#[test]
	fn resolution_is_byte_stable() {
		let mut fx = Fixture::new(4);
		fx.relay(1, 0);
		let first: Vec<Vec<u8>> = resolve_all(&fx.snapshot).iter().map(|u| u.encode().unwrap()).collect();
		let second: Vec<Vec<u8>> = resolve_all(&fx.snapshot).iter().map(|u| u.encode().unwrap()).collect();
		assert_eq!(first, second);
	}

	#[test]
	fn relayed_peers_merge_into_their_relay() {
		let mut fx = Fixture::new(3);
		fx.relay(1, 0);

		let c = fx.peers_of(2);
		assert_eq!(c.len(), 1);
		assert_eq!(c[0].public_key, fx.key(1));
		assert_eq!(c[0].allowed_ips, nets(&["10.0.0.1/32", "10.0.0.2/32"]));
		assert_eq!(c[0].is_relay_for, vec![fx.ids[0]]);

		// The relayed node reaches everything through its relay.
		let a = fx.peers_of(0);
		assert_eq!(a.len(), 1);
		assert_eq!(a[0].allowed_ips, nets(&["10.0.0.2/32", "10.0.0.3/32"]));

		// The relay talks to its client directly.
		let b = fx.peers_of(1);
		assert_eq!(b.len(), 2);
		assert!(b.iter().all(|p| p.is_relay_for.is_empty()));
	}

	#[test]
	fn relay_removal_restores_direct_routes() {
		let mut fx = Fixture::new(3);
		fx.relay(1, 0);
		fx.node(1).is_relay = false;
		fx.node(1).relayed_nodes.clear();
		fx.node(0).relayed_by = None;

		let c = fx.peers_of(2);
		assert_eq!(c.len(), 2);
		assert_eq!(c[0].allowed_ips, nets(&["10.0.0.1/32"]));
	}

	#[test]
	fn pending_delete_nodes_vanish_and_are_evicted() {
		let mut fx = Fixture::new(3);
		fx.node(0).pending_delete = true;

		assert_eq!(fx.peers_of(1).len(), 1);
		assert!(fx.peers_of(0).is_empty());
		assert_eq!(resolve_all(&fx.snapshot).len(), 3);
	}

	#[test]
	fn egress_ranges_extend_allowed_ips() {
		let mut fx = Fixture::new(2);
		fx.node(1).egress = Some(EgressConfig {
			nat: true,
			ranges: vec![EgressRange {
				cidr: "192.168.10.0/24".parse().unwrap(),
				metric: 100,
			}],
		});
		let peers = fx.peers_of(0);
		assert_eq!(peers[0].allowed_ips, nets(&["10.0.0.2/32", "192.168.10.0/24"]));
		assert_eq!(peers[0].egress_routes[0].metric, 100);
	}

	#[test]
	fn internet_gateway_gets_default_routes() {
		let mut fx = Fixture::new(3);
		let gw = fx.ids[1];
		fx.node(1).is_internet_gw = true;
		let client = fx.ids[0];
		fx.node(1).internet_gw_for.insert(client);
		fx.node(0).internet_gw = Some(gw);

		let peers = fx.peers_of(0);
		let to_gw = peers.iter().find(|p| p.public_key == fx.key(1)).unwrap();
		assert_eq!(to_gw.allowed_ips, nets(&["0.0.0.0/0", "::/0"]));
		let other = peers.iter().find(|p| p.public_key == fx.key(2)).unwrap();
		assert_eq!(other.allowed_ips, nets(&["10.0.0.3/32"]));
	}

	#[test]
	fn failover_routes_through_the_elected_node() {
		let mut fx = Fixture::new(3);
		let (a, b, via) = (fx.ids[0], fx.ids[1], fx.ids[2]);
		let route = netmaker_common_model::FailoverRoute {
			via,
			engaged_at: chrono::Utc::now(),
			recovered_at: None,
		};
		fx.node(0).failover_peers.insert(b, route.clone());
		fx.node(1).failover_peers.insert(a, route.clone());

		let peers = fx.peers_of(0);
		assert_eq!(peers.len(), 1);
		assert_eq!(peers[0].public_key, fx.key(2));
		assert_eq!(peers[0].allowed_ips, nets(&["10.0.0.2/32", "10.0.0.3/32"]));

		// A tombstoned route is ignored.
		fx.node(0).failover_peers.get_mut(&b).unwrap().recovered_at = Some(chrono::Utc::now());
		assert_eq!(fx.peers_of(0).len(), 2);
	}

	#[test]
	fn acl_denied_carrier_drops_the_edge() {
		let mut fx = Fixture::new(4);
		let (a, b, via) = (fx.ids[0], fx.ids[1], fx.ids[2]);
		let route = netmaker_common_model::FailoverRoute {
			via,
			engaged_at: chrono::Utc::now(),
			recovered_at: None,
		};
		fx.node(0).failover_peers.insert(b, route);
		fx.snapshot.acl.matrix.set(a, via, AclValue::NotAllowed);

		let peers = fx.peers_of(0);
		assert_eq!(peers.len(), 1);
		assert_eq!(peers[0].public_key, fx.key(3));

		fx.node(0).failover_peers.clear();
		fx.relay(2, 1);
		let keys: Vec<WgPublicKey> = fx.peers_of(0).iter().map(|p| p.public_key).collect();
		assert_eq!(keys, vec![fx.key(3)]);
	}

	#[test]
	fn same_public_ip_uses_local_address() {
		let mut fx = Fixture::new(2);
		fx.host(1).endpoint_ip = Some(Ipv4Addr::new(203, 0, 113, 1));
		fx.node(1).local_address = Some("192.168.1.20".parse().unwrap());
		let peers = fx.peers_of(0);
		assert_eq!(peers[0].endpoint, Some("192.168.1.20:51821".parse().unwrap()));
	}

	#[test]
	fn symmetric_pairs_need_hole_punching() {
		let mut fx = Fixture::new(2);
		for i in 0..2 {
			fx.host(i).nat_type = NatType::Symmetric;
		}
		fx.host(1).public_listen_port = Some(40001);
		fx.host(1).turn_endpoint = Some("198.51.100.7:3478".parse().unwrap());

		let peers = fx.peers_of(0);
		assert_eq!(peers[0].hole_punch_required, Some(true));
		assert_eq!(peers[0].endpoint, Some("203.0.113.2:40001".parse().unwrap()));
		assert!(peers[0].turn_endpoint.is_some());

		fx.host(1).is_static_port = true;
		let peers = fx.peers_of(0);
		assert_eq!(peers[0].hole_punch_required, None);
		assert_eq!(peers[0].endpoint, Some("203.0.113.2:51821".parse().unwrap()));
	}

	#[test]
	fn ext_clients_appear_behind_their_ingress() {
		let mut fx = Fixture::new(3);
		let ingress = fx.ids[1];
		fx.node(1).ingress = Some(GatewayConfig {
			ranges: nets(&["10.0.0.0/24"]),
			..Default::default()
		});
		let mut client = ExtClient::new(
			ExtClientId::new("phone").unwrap(),
			fx.snapshot.network.net_id.clone(),
			ingress,
			WgPublicKey::from_bytes([42; 32]),
		);
		client.address = Some(Ipv4Addr::new(10, 0, 0, 100));
		fx.snapshot.ext_clients.push(client.clone());

		let a = fx.peers_of(0);
		let via_b = a.iter().find(|p| p.public_key == fx.key(1)).unwrap();
		assert_eq!(via_b.allowed_ips, nets(&["10.0.0.2/32", "10.0.0.100/32"]));
		assert_eq!(via_b.is_ingress_for_ext_clients, Some(true));

		let b = resolve(&fx.snapshot, &ingress).unwrap();
		assert_eq!(b.ext_clients.len(), 1);
		assert!(b.peer(&client.public_key).is_some());

		// Denying A hides the client from A only.
		fx.snapshot.ext_clients[0].denied_nodes.insert(fx.ids[0]);
		let a = fx.peers_of(0);
		let via_b = a.iter().find(|p| p.public_key == fx.key(1)).unwrap();
		assert_eq!(via_b.allowed_ips, nets(&["10.0.0.2/32"]));
		assert!(fx.peers_of(2).iter().any(|p| p.allowed_ips.len() == 2));

		// Disabled clients disappear everywhere.
		fx.snapshot.ext_clients[0].enabled = false;
		let b = resolve(&fx.snapshot, &ingress).unwrap();
		assert!(b.ext_clients.is_empty());
	}

	#[test]
	fn missing_host_drops_only_that_edge() {
		let mut fx = Fixture::new(3);
		let host_id = fx.snapshot.nodes[&fx.ids[2]].host_id;
		fx.snapshot.hosts.remove(&host_id);
		assert_eq!(fx.peers_of(0).len(), 1);
		assert!(resolve(&fx.snapshot, &fx.ids[2]).is_none());
	}
}
