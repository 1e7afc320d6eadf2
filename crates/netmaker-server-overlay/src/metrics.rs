// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use netmaker_common_model::{HostId, PeerMetric, WgPublicKey};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// The most recent peer metrics a host reported.
#[derive(Debug, Clone, Default)]
pub struct HostMetrics {
	pub collected_at: Option<DateTime<Utc>>,
	pub peers: BTreeMap<WgPublicKey, PeerMetric>,
}

impl HostMetrics {
	pub fn connected_latency(&self, peer: &WgPublicKey) -> Option<u32> {
		self.peers.get(peer).filter(|m| m.connected).map(|m| m.latency_ms)
	}
}

/// Connectivity reported by check-ins, shared by every service clone.
#[derive(Clone, Default)]
pub struct MetricsMap {
	inner: Arc<RwLock<HashMap<HostId, HostMetrics>>>,
}

impl MetricsMap {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn update(&self, host: HostId, peers: BTreeMap<WgPublicKey, PeerMetric>) {
		let metrics = HostMetrics {
			collected_at: Some(Utc::now()),
			peers,
		};
		self.inner.write().await.insert(host, metrics);
	}

	pub async fn get(&self, host: &HostId) -> HostMetrics {
		self.inner.read().await.get(host).cloned().unwrap_or_default()
	}

	pub async fn forget(&self, host: &HostId) {
		self.inner.write().await.remove(host);
	}

	pub async fn len(&self) -> usize {
		self.inner.read().await.len()
	}
}
