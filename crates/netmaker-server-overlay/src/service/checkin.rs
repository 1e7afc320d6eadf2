// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use netmaker_common_model::{
	CheckIn, FailoverRoute, Host, HostId, NatType, NetId, Node, NodeId, PeerMetric, WgPublicKey,
};
use netmaker_stun::{Classified, HostContext};
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tracing::{info, warn};

use super::OverlayService;
use crate::config::OverlayConfig;
use crate::context::OpContext;
use crate::error::Result;
use crate::metrics::HostMetrics;
use crate::relay::select_failover;
use crate::repo::OverlayTx;
use crate::snapshot::NetworkSnapshot;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckInOutcome {
	/// Networks the host has a node in.
	pub networks: BTreeSet<NetId>,
	/// Networks where the host's node is pending deletion and should be
	/// torn down by the agent.
	pub evicted: BTreeSet<NetId>,
	pub nat_type: NatType,
	/// Fields other peers see changed, so peer updates were scheduled.
	pub peer_visible_change: bool,
	pub failovers_engaged: usize,
	pub failovers_recovered: usize,
}

type PeerVisible = (
	Option<Ipv4Addr>,
	Option<Ipv6Addr>,
	u16,
	Option<u16>,
	NatType,
	Option<u16>,
	Option<SocketAddr>,
);

fn peer_visible(host: &Host) -> PeerVisible {
	(
		host.endpoint_ip,
		host.endpoint_ipv6,
		host.listen_port,
		host.public_listen_port,
		host.nat_type,
		host.mtu,
		host.turn_endpoint,
	)
}

fn apply_report(host: &mut Host, checkin: &CheckIn, classified: Option<Classified>, now: DateTime<Utc>) {
	if let Some(name) = &checkin.name {
		host.name = name.clone();
	}
	if let Some(os) = &checkin.os {
		host.os = os.clone();
	}
	if checkin.mtu.is_some() {
		host.mtu = checkin.mtu;
	}
	if let Some(port) = checkin.listen_port {
		host.listen_port = port;
	}
	if !host.is_static {
		if checkin.endpoint_ip.is_some() {
			host.endpoint_ip = checkin.endpoint_ip;
		}
		if checkin.endpoint_ipv6.is_some() {
			host.endpoint_ipv6 = checkin.endpoint_ipv6;
		}
	}

	if let Some(c) = classified {
		host.nat_type = c.nat_type;
		if !host.is_static_port {
			host.public_listen_port = Some(c.public_endpoint.port());
		}
		if !host.is_static {
			match c.public_endpoint.ip() {
				IpAddr::V4(ip) => host.endpoint_ip = Some(ip),
				IpAddr::V6(ip) => host.endpoint_ipv6 = Some(ip),
			}
		}
	}
	host.last_checkin = Some(now);
}

#[derive(Default)]
struct FailoverTally {
	engaged: usize,
	recovered: usize,
}

/// Feeds one check-in's peer metrics through the failover hysteresis for
/// `me`, engaging or tombstoning routes on both ends of each link.
async fn evaluate_failover(
	tx: &mut OverlayTx,
	config: &OverlayConfig,
	me: &mut Node,
	metrics: &BTreeMap<WgPublicKey, PeerMetric>,
	now: DateTime<Utc>,
) -> Result<FailoverTally> {
	let mut tally = FailoverTally::default();
	if metrics.is_empty() || me.relayed_by.is_some() {
		return Ok(tally);
	}
	let Some(snapshot) = NetworkSnapshot::load(tx, &me.network).await? else {
		return Ok(tally);
	};

	let by_key: BTreeMap<WgPublicKey, NodeId> = snapshot
		.live_nodes()
		.filter(|n| n.id != me.id)
		.filter_map(|n| snapshot.host_of(n).map(|h| (h.public_key, n.id)))
		.collect();
	let reported = HostMetrics {
		collected_at: Some(now),
		peers: metrics.clone(),
	};

	let mut state = tx.relay_state(&me.network, &me.id).await?;
	for (key, metric) in metrics {
		let Some(peer_id) = by_key.get(key) else {
			continue;
		};
		let health = state.peer_health.entry(*peer_id).or_default();
		health.record(metric.connected, metric.latency_ms);
		let health = *health;
		let active = me.active_failover(peer_id);

		if !metric.connected && health.consecutive_failures >= config.failover_engage_after && active.is_none() {
			let Some(via) = select_failover(&snapshot, me, peer_id, &reported) else {
				warn!(node_id = %me.id, peer = %peer_id, "direct link down and no failover candidate");
				continue;
			};
			let route = FailoverRoute {
				via,
				engaged_at: now,
				recovered_at: None,
			};
			me.failover_peers.insert(*peer_id, route.clone());
			if let Some(mut peer) = tx.node_opt(peer_id).await? {
				peer.failover_peers.insert(me.id, route);
				peer.touch();
				tx.put_node(&peer)?;
			}
			info!(node_id = %me.id, peer = %peer_id, %via, "failover engaged");
			tally.engaged += 1;
		} else if metric.connected && health.consecutive_successes >= config.failover_revert_after && active.is_some() {
			if let Some(route) = me.failover_peers.get_mut(peer_id) {
				route.recovered_at = Some(now);
			}
			if let Some(mut peer) = tx.node_opt(peer_id).await? {
				if let Some(route) = peer.failover_peers.get_mut(&me.id) {
					route.recovered_at = Some(now);
					peer.touch();
					tx.put_node(&peer)?;
				}
			}
			info!(node_id = %me.id, peer = %peer_id, "direct link recovered, failover reverted");
			tally.recovered += 1;
		}
	}

	state.updated_at = now;
	tx.put_relay_state(&state)?;
	Ok(tally)
}

impl OverlayService {
	/// Records a host's periodic report: liveness, endpoints, NAT
	/// classification and peer metrics. Peers are only re-resolved when
	/// something they see changed.
	#[tracing::instrument(skip(self, ctx, checkin), fields(%host_id))]
	pub async fn host_check_in(&self, ctx: &OpContext, host_id: &HostId, checkin: CheckIn) -> Result<CheckInOutcome> {
		let current = ctx.run(self.reader().host(host_id)).await?;
		let nets = self.networks_of_host(host_id).await?;

		let classified = match checkin.stun {
			Some(observation) => {
				let host_ctx = HostContext {
					declared_port: checkin.listen_port.unwrap_or(current.listen_port),
					interface_ip: checkin.local_address,
					is_static_port: current.is_static_port,
				};
				self.observations.record(*host_id, observation, host_ctx).await
			}
			None => None,
		};
		self.metrics.update(*host_id, checkin.metrics.clone()).await;

		let config = self.config.clone();
		let now = Utc::now();
		let mut m = self.begin(ctx, "host_check_in", nets).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let mut host = tx.host(host_id).await?;
				let before = peer_visible(&host);
				apply_report(&mut host, &checkin, classified, now);
				host.validate()?;
				let visible_change = before != peer_visible(&host);
				tx.put_host(&host)?;

				let mut outcome = CheckInOutcome {
					nat_type: host.nat_type,
					peer_visible_change: visible_change,
					..CheckInOutcome::default()
				};

				for mut node in tx.nodes_of_host(host_id).await? {
					let net = node.network.clone();
					outcome.networks.insert(net.clone());
					if node.pending_delete {
						outcome.evicted.insert(net);
						continue;
					}
					if visible_change {
						tx.mark_dirty(&net);
					}

					let reconnected = !node.connected;
					let local_changed = checkin.local_address.is_some() && node.local_address != checkin.local_address;
					node.connected = true;
					node.last_checkin = Some(now);
					if local_changed {
						node.local_address = checkin.local_address;
					}

					let tally = evaluate_failover(tx, &config, &mut node, &checkin.metrics, now).await?;
					outcome.failovers_engaged += tally.engaged;
					outcome.failovers_recovered += tally.recovered;

					if reconnected || local_changed || tally.engaged + tally.recovered > 0 {
						node.touch();
						tx.put_node(&node)?;
					} else {
						tx.put_node_quiet(&node)?;
					}
				}
				Ok(outcome)
			})
			.await;
		self.finish(ctx, m, staged).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use netmaker_common_model::StunObservation;

	fn host() -> Host {
		let mut h = Host::new("edge", WgPublicKey::from_bytes([9; 32]));
		h.listen_port = 51821;
		h
	}

	#[test]
	fn static_endpoint_is_not_overwritten() {
		let mut h = host();
		h.is_static = true;
		h.endpoint_ip = Some(Ipv4Addr::new(198, 51, 100, 1));
		let checkin = CheckIn {
			endpoint_ip: Some(Ipv4Addr::new(203, 0, 113, 9)),
			..CheckIn::default()
		};
		apply_report(&mut h, &checkin, None, Utc::now());
		assert_eq!(h.endpoint_ip, Some(Ipv4Addr::new(198, 51, 100, 1)));
		assert!(h.last_checkin.is_some());
	}

	#[test]
	fn classification_sets_public_port_unless_pinned() {
		let classified = Classified {
			public_endpoint: "203.0.113.7:40000".parse().unwrap(),
			nat_type: NatType::PortRestrictedCone,
			changed: true,
		};

		let mut h = host();
		apply_report(&mut h, &CheckIn::default(), Some(classified), Utc::now());
		assert_eq!(h.public_listen_port, Some(40000));
		assert_eq!(h.endpoint_ip, Some(Ipv4Addr::new(203, 0, 113, 7)));
		assert_eq!(h.nat_type, NatType::PortRestrictedCone);

		let mut pinned = host();
		pinned.is_static_port = true;
		apply_report(&mut pinned, &CheckIn::default(), Some(classified), Utc::now());
		assert_eq!(pinned.public_listen_port, None);
		assert_eq!(pinned.advertised_port(), 51821);
	}

	#[test]
	fn last_checkin_alone_is_not_peer_visible() {
		let mut h = host();
		let before = peer_visible(&h);
		apply_report(&mut h, &CheckIn::default(), None, Utc::now());
		assert_eq!(before, peer_visible(&h));

		let checkin = CheckIn {
			stun: Some(StunObservation {
				server: "192.0.2.1:3478".parse().unwrap(),
				public_endpoint: "203.0.113.7:51821".parse().unwrap(),
				observed_at: Utc::now(),
			}),
			mtu: Some(1400),
			..CheckIn::default()
		};
		apply_report(&mut h, &checkin, None, Utc::now());
		assert_ne!(before, peer_visible(&h));
	}
}
