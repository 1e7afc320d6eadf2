// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Entity services.
//!
//! Every mutation follows the same path: lock the affected networks, stage
//! the change in one store transaction, re-check the invariants of every
//! network it touched, commit, then signal `NetworkDirty` once per network.
//! Nothing is signalled when any step fails.

mod acl;
mod checkin;
mod enrollment;
mod ext_client;
mod failover;
mod gateway;
mod host;
mod maintenance;
mod network;
mod node;

pub use checkin::CheckInOutcome;
pub use enrollment::{EnrollOutcome, EnrollmentKeySpec};
pub use ext_client::{ExtClientSpec, ExtClientUpdate};
pub use host::HostUpdate;
pub use network::NetworkUpdate;
pub use node::{NodeOptions, NodeUpdate};

use netmaker_common_model::{HostId, NetId};
use netmaker_server_db::KvStore;
use netmaker_stun::ObservationMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::OverlayConfig;
use crate::context::{CancellationToken, OpContext};
use crate::error::{OverlayError, Result};
use crate::invariants;
use crate::locks::{NetworkGuards, NetworkLocks};
use crate::metrics::MetricsMap;
use crate::notify::DirtyNotifier;
use crate::repo::OverlayTx;
use crate::snapshot::NetworkSnapshot;

#[derive(Clone)]
pub struct OverlayService {
	store: KvStore,
	locks: NetworkLocks,
	notifier: Arc<dyn DirtyNotifier>,
	metrics: MetricsMap,
	observations: ObservationMap,
	config: OverlayConfig,
	shutdown: CancellationToken,
}

/// A staged mutation holding its network locks.
pub(crate) struct Mutation {
	tx: OverlayTx,
	guards: NetworkGuards,
	op: &'static str,
}

impl OverlayService {
	pub fn new(store: KvStore, notifier: Arc<dyn DirtyNotifier>, config: OverlayConfig) -> Self {
		Self::with_state(store, notifier, MetricsMap::new(), ObservationMap::new(), config)
	}

	/// Builds the service around process-wide state owned by the caller.
	pub fn with_state(
		store: KvStore,
		notifier: Arc<dyn DirtyNotifier>,
		metrics: MetricsMap,
		observations: ObservationMap,
		config: OverlayConfig,
	) -> Self {
		Self {
			store,
			locks: NetworkLocks::new(),
			notifier,
			metrics,
			observations,
			config,
			shutdown: CancellationToken::new(),
		}
	}

	pub fn store(&self) -> &KvStore {
		&self.store
	}

	pub fn metrics(&self) -> &MetricsMap {
		&self.metrics
	}

	pub fn observations(&self) -> &ObservationMap {
		&self.observations
	}

	pub fn config(&self) -> &OverlayConfig {
		&self.config
	}

	/// A context with the configured default deadline, cancelled on shutdown.
	pub fn context(&self) -> OpContext {
		OpContext::with_timeout(self.config.default_deadline).with_cancellation(self.shutdown.clone())
	}

	/// Refuses new mutations and cancels contexts handed out by [`Self::context`].
	pub fn shutdown(&self) {
		self.shutdown.cancel();
	}

	pub fn is_shut_down(&self) -> bool {
		self.shutdown.is_cancelled()
	}

	pub(crate) fn reader(&self) -> OverlayTx {
		OverlayTx::new(self.store.begin())
	}

	pub(crate) async fn begin(&self, ctx: &OpContext, op: &'static str, nets: BTreeSet<NetId>) -> Result<Mutation> {
		if self.is_shut_down() {
			return Err(OverlayError::Unavailable("service is shutting down".to_string()));
		}
		let guards = ctx.run(async { Ok(self.locks.lock_many(&nets).await) }).await?;
		Ok(Mutation {
			tx: OverlayTx::new(self.store.begin()),
			guards,
			op,
		})
	}

	/// Verifies and commits a staged mutation, or rolls it back when staging
	/// failed, the deadline passed, or an invariant does not hold.
	pub(crate) async fn finish<T>(&self, ctx: &OpContext, m: Mutation, staged: Result<T>) -> Result<T> {
		let Mutation { tx, guards, op } = m;

		let value = match staged {
			Ok(value) => value,
			Err(e) => {
				debug!(op, error = %e, "mutation rejected");
				tx.rollback();
				return Err(e);
			}
		};

		if let Some(net) = tx.dirty().iter().find(|net| !guards.covers(net)) {
			let err = OverlayError::Conflict(format!("network {net} changed membership during {op}, retry"));
			tx.rollback();
			return Err(err);
		}

		if let Err(e) = ctx.run(self.verify(&tx, op)).await {
			tx.rollback();
			return Err(e);
		}

		if let Err(e) = ctx.check() {
			tx.rollback();
			return Err(e);
		}

		let dirty = tx.commit().await?;
		for net in &dirty {
			self.notifier.network_dirty(net);
		}
		drop(guards);

		debug!(op, networks = dirty.len(), "mutation committed");
		Ok(value)
	}

	async fn verify(&self, tx: &OverlayTx, op: &'static str) -> Result<()> {
		for net in tx.dirty() {
			let Some(snapshot) = NetworkSnapshot::load(tx, net).await? else {
				continue;
			};
			let violations = invariants::check(&snapshot);
			if !violations.is_empty() {
				let detail: Vec<String> = violations.iter().map(ToString::to_string).collect();
				error!(op, %net, violations = ?detail, "invariant violated, rolling back");
				return Err(OverlayError::Internal(format!("{op} on {net}: {}", detail.join("; "))));
			}
		}
		Ok(())
	}

	/// Networks the host currently has a node in.
	pub async fn networks_of_host(&self, host: &HostId) -> Result<BTreeSet<NetId>> {
		let reader = self.reader();
		Ok(reader
			.nodes_of_host(host)
			.await?
			.into_iter()
			.map(|n| n.network)
			.collect())
	}

	/// Copies one network's state for reconciliation while holding its lock.
	#[tracing::instrument(skip(self), fields(%net))]
	pub async fn snapshot(&self, net: &NetId) -> Result<Option<NetworkSnapshot>> {
		let _guard = self.locks.lock(net).await;
		NetworkSnapshot::load(&self.reader(), net).await
	}
}
