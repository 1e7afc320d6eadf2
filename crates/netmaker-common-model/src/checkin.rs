// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::keys::WgPublicKey;

/// What a host saw when it asked a STUN server for its reflexive address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StunObservation {
	pub server: SocketAddr,
	pub public_endpoint: SocketAddr,
	pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeerMetric {
	pub connected: bool,
	#[serde(default)]
	pub latency_ms: u32,
	#[serde(default)]
	pub rx_bytes: u64,
	#[serde(default)]
	pub tx_bytes: u64,
}

/// Periodic liveness report from a host.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckIn {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub os: Option<String>,
	#[serde(default)]
	pub mtu: Option<u16>,
	#[serde(default)]
	pub endpoint_ip: Option<Ipv4Addr>,
	#[serde(default)]
	pub endpoint_ipv6: Option<Ipv6Addr>,
	#[serde(default)]
	pub local_address: Option<IpAddr>,
	#[serde(default)]
	pub listen_port: Option<u16>,
	#[serde(default)]
	pub stun: Option<StunObservation>,
	/// Keyed by the peer's public key as the agent sees it.
	#[serde(default)]
	pub metrics: BTreeMap<WgPublicKey, PeerMetric>,
}
