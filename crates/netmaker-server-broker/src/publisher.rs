// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-host delivery of peer updates.

use async_trait::async_trait;
use netmaker_common_model::{HostId, PeerUpdate};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, RwLock};
use tracing::instrument;

use crate::error::{BrokerError, Result};

/// Transport for peer updates addressed to one host.
#[async_trait]
pub trait Publisher: Send + Sync {
	async fn publish(&self, host: &HostId, update: &PeerUpdate) -> Result<()>;
}

/// Fans updates out to in-process subscribers, one broadcast channel per
/// host. A host without a live subscriber is offline and misses updates.
#[derive(Clone)]
pub struct BroadcastPublisher {
	senders: Arc<RwLock<HashMap<HostId, broadcast::Sender<Arc<PeerUpdate>>>>>,
	capacity: usize,
}

impl BroadcastPublisher {
	pub fn new(capacity: usize) -> Self {
		Self {
			senders: Arc::new(RwLock::new(HashMap::new())),
			capacity: capacity.max(1),
		}
	}

	#[instrument(skip(self), fields(%host))]
	pub async fn subscribe(&self, host: HostId) -> broadcast::Receiver<Arc<PeerUpdate>> {
		let mut senders = self.senders.write().await;

		if let Some(sender) = senders.get(&host) {
			return sender.subscribe();
		}

		let (tx, rx) = broadcast::channel(self.capacity);
		senders.insert(host, tx);
		rx
	}

	#[instrument(skip(self), fields(%host))]
	pub async fn unregister(&self, host: &HostId) {
		self.senders.write().await.remove(host);
	}

	pub async fn subscribers(&self) -> usize {
		self.senders.read().await.len()
	}
}

#[async_trait]
impl Publisher for BroadcastPublisher {
	async fn publish(&self, host: &HostId, update: &PeerUpdate) -> Result<()> {
		let senders = self.senders.read().await;
		let sender = senders.get(host).ok_or_else(|| BrokerError::Publish {
			host: *host,
			reason: "host is not subscribed".to_string(),
		})?;
		sender
			.send(Arc::new(update.clone()))
			.map(|_| ())
			.map_err(|_| BrokerError::Publish {
				host: *host,
				reason: "subscriber went away".to_string(),
			})
	}
}

/// Keeps every published update in order.
#[derive(Clone, Default)]
pub struct MemoryPublisher {
	published: Arc<Mutex<Vec<(HostId, PeerUpdate)>>>,
}

impl MemoryPublisher {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn published(&self) -> Vec<(HostId, PeerUpdate)> {
		self.published.lock().unwrap_or_else(PoisonError::into_inner).clone()
	}

	pub fn len(&self) -> usize {
		self.published.lock().unwrap_or_else(PoisonError::into_inner).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[async_trait]
impl Publisher for MemoryPublisher {
	async fn publish(&self, host: &HostId, update: &PeerUpdate) -> Result<()> {
		self.published
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.push((*host, update.clone()));
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use netmaker_common_model::{InterfaceConfig, NetId, NodeId};

	fn update(host: HostId) -> PeerUpdate {
		PeerUpdate {
			network: NetId::new("net1").unwrap(),
			host_id: host,
			node_id: NodeId::new(),
			sequence: 7,
			server_time: 7,
			interface: InterfaceConfig {
				addresses: Vec::new(),
				listen_port: 51821,
				mtu: 1420,
				dns_servers: Vec::new(),
			},
			peers: Vec::new(),
			ext_clients: Vec::new(),
		}
	}

	#[tokio::test]
	async fn subscriber_receives_its_updates() {
		let publisher = BroadcastPublisher::new(8);
		let host = HostId::new();
		let mut rx = publisher.subscribe(host).await;

		publisher.publish(&host, &update(host)).await.unwrap();
		let received = rx.recv().await.unwrap();
		assert_eq!(received.sequence, 7);
		assert_eq!(received.host_id, host);
	}

	#[tokio::test]
	async fn offline_host_is_a_publish_error() {
		let publisher = BroadcastPublisher::new(8);
		let host = HostId::new();
		let err = publisher.publish(&host, &update(host)).await.unwrap_err();
		assert!(matches!(err, BrokerError::Publish { .. }));

		let rx = publisher.subscribe(host).await;
		drop(rx);
		let err = publisher.publish(&host, &update(host)).await.unwrap_err();
		assert!(matches!(err, BrokerError::Publish { .. }));

		publisher.unregister(&host).await;
		assert_eq!(publisher.subscribers().await, 0);
	}
}
