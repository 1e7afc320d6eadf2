// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netmaker_common_model::NetId;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per network. Mutations and snapshot reads of a network
/// hold its lock; multi-network operations take locks in name order.
#[derive(Clone, Default)]
pub struct NetworkLocks {
	locks: Arc<Mutex<HashMap<NetId, Arc<Mutex<()>>>>>,
}

pub struct NetworkGuards {
	_guards: Vec<OwnedMutexGuard<()>>,
	networks: BTreeSet<NetId>,
}

impl NetworkGuards {
	pub fn covers(&self, net: &NetId) -> bool {
		self.networks.contains(net)
	}
}

impl NetworkLocks {
	pub fn new() -> Self {
		Self::default()
	}

	async fn handle(&self, net: &NetId) -> Arc<Mutex<()>> {
		let mut locks = self.locks.lock().await;
		Arc::clone(locks.entry(net.clone()).or_insert_with(|| Arc::new(Mutex::new(()))))
	}

	pub async fn lock(&self, net: &NetId) -> OwnedMutexGuard<()> {
		self.handle(net).await.lock_owned().await
	}

	pub async fn lock_many(&self, nets: &BTreeSet<NetId>) -> NetworkGuards {
		let mut guards = Vec::with_capacity(nets.len());
		for net in nets {
			guards.push(self.lock(net).await);
		}
		NetworkGuards {
			_guards: guards,
			networks: nets.clone(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[tokio::test]
	async fn same_network_is_exclusive() {
		let locks = NetworkLocks::new();
		let net = NetId::new("net1").unwrap();

		let guard = locks.lock(&net).await;
		let contender = {
			let locks = locks.clone();
			let net = net.clone();
			tokio::spawn(async move {
				let _g = locks.lock(&net).await;
			})
		};

		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(!contender.is_finished());
		drop(guard);
		contender.await.unwrap();
	}

	#[tokio::test]
	async fn different_networks_do_not_block() {
		let locks = NetworkLocks::new();
		let _a = locks.lock(&NetId::new("a").unwrap()).await;
		let set: BTreeSet<NetId> = [NetId::new("b").unwrap(), NetId::new("c").unwrap()].into();
		let guards = tokio::time::timeout(Duration::from_secs(1), locks.lock_many(&set))
			.await
			.unwrap();
		assert!(guards.covers(&NetId::new("b").unwrap()));
		assert!(!guards.covers(&NetId::new("a").unwrap()));
	}
}
