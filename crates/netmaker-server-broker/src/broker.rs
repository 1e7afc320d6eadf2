// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::Utc;
use netmaker_common_model::{HostId, NetId, PeerUpdate};
use netmaker_server_overlay::{resolve, resolve_all, CancellationToken, OverlayService};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::publisher::Publisher;
use crate::sequence::SequenceClock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
	pub signals: u64,
	/// Reconciliations that ran to completion.
	pub reconciliations: u64,
	pub superseded: u64,
	pub published: u64,
	pub publish_failures: u64,
	pub stale_hosts: usize,
}

#[derive(Default)]
struct Counters {
	signals: AtomicU64,
	reconciliations: AtomicU64,
	superseded: AtomicU64,
	published: AtomicU64,
	publish_failures: AtomicU64,
}

struct InFlight {
	generation: u64,
	token: CancellationToken,
}

struct Inner {
	overlay: OverlayService,
	publisher: Arc<dyn Publisher>,
	config: BrokerConfig,
	sequence: SequenceClock,
	workers: Arc<Semaphore>,
	flights: StdMutex<HashMap<NetId, Arc<Mutex<()>>>>,
	in_flight: StdMutex<HashMap<NetId, InFlight>>,
	generation: AtomicU64,
	stale: RwLock<BTreeMap<HostId, BTreeSet<NetId>>>,
	tasks: Mutex<JoinSet<()>>,
	counters: Counters,
	closing: CancellationToken,
}

/// Turns `NetworkDirty` signals into published peer updates.
///
/// Signals for one network inside the coalescing window collapse into a
/// single reconciliation. Reconciliations of one network run one at a time
/// and a newer signal abandons the one in progress before it publishes.
/// Different networks reconcile in parallel up to the worker bound.
pub struct Broker {
	inner: Arc<Inner>,
	stop_tx: broadcast::Sender<()>,
	dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Broker {
	/// Starts the dispatcher consuming `signals`.
	pub fn start(
		overlay: OverlayService,
		publisher: Arc<dyn Publisher>,
		config: BrokerConfig,
		signals: mpsc::UnboundedReceiver<NetId>,
	) -> Self {
		let (stop_tx, stop_rx) = broadcast::channel(1);
		let inner = Arc::new(Inner {
			overlay,
			publisher,
			workers: Arc::new(Semaphore::new(config.workers.max(1))),
			config,
			sequence: SequenceClock::new(),
			flights: StdMutex::new(HashMap::new()),
			in_flight: StdMutex::new(HashMap::new()),
			generation: AtomicU64::new(0),
			stale: RwLock::new(BTreeMap::new()),
			tasks: Mutex::new(JoinSet::new()),
			counters: Counters::default(),
			closing: CancellationToken::new(),
		});

		let handle = tokio::spawn(dispatch(Arc::clone(&inner), signals, stop_rx));
		info!(
			window_ms = inner.config.coalesce_window.as_millis() as u64,
			workers = inner.config.workers,
			"change broker started"
		);

		Self {
			inner,
			stop_tx,
			dispatcher: Mutex::new(Some(handle)),
		}
	}

	/// Publishes the current peer update of every node the host owns. Used
	/// when a host reconnects instead of replaying missed updates.
	#[instrument(skip(self), fields(%host_id))]
	pub async fn host_connected(&self, host_id: &HostId) -> Result<usize> {
		if self.inner.closing.is_cancelled() {
			return Err(BrokerError::ShuttingDown);
		}

		let nets = self.inner.overlay.networks_of_host(host_id).await?;
		let mut published = 0;
		for net in nets {
			let flight = self.inner.flight(&net);
			let _serial = flight.lock().await;

			let Some(snapshot) = self.inner.overlay.snapshot(&net).await? else {
				continue;
			};
			let own: Vec<_> = snapshot
				.nodes
				.values()
				.filter(|n| n.host_id == *host_id)
				.map(|n| n.id)
				.collect();
			for node_id in own {
				if let Some(update) = resolve(&snapshot, &node_id) {
					self.inner.deliver(update).await?;
					published += 1;
				}
			}
		}
		info!(published, "host snapshot published");
		Ok(published)
	}

	/// Hosts whose last publish failed, with the networks they missed.
	pub async fn stale_hosts(&self) -> BTreeMap<HostId, BTreeSet<NetId>> {
		self.inner.stale.read().await.clone()
	}

	pub async fn stats(&self) -> BrokerStats {
		let c = &self.inner.counters;
		BrokerStats {
			signals: c.signals.load(Ordering::Relaxed),
			reconciliations: c.reconciliations.load(Ordering::Relaxed),
			superseded: c.superseded.load(Ordering::Relaxed),
			published: c.published.load(Ordering::Relaxed),
			publish_failures: c.publish_failures.load(Ordering::Relaxed),
			stale_hosts: self.inner.stale.read().await.len(),
		}
	}

	pub fn last_sequence(&self) -> u64 {
		self.inner.sequence.last()
	}

	/// Stops taking signals, reconciles whatever was still waiting out its
	/// coalescing window, and waits up to the drain timeout for publishes to
	/// finish. Work still running after that is abandoned.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) -> BrokerStats {
		self.inner.closing.cancel();
		let _ = self.stop_tx.send(());
		if let Some(handle) = self.dispatcher.lock().await.take() {
			let _ = handle.await;
		}

		let drain = async {
			let mut tasks = self.inner.tasks.lock().await;
			while tasks.join_next().await.is_some() {}
		};
		if tokio::time::timeout(self.inner.config.drain_timeout, drain).await.is_err() {
			warn!(
				timeout_ms = self.inner.config.drain_timeout.as_millis() as u64,
				"drain timed out, abandoning reconciliations"
			);
			self.inner.cancel_all();
			self.inner.tasks.lock().await.abort_all();
		}

		let stats = self.stats().await;
		info!(
			reconciliations = stats.reconciliations,
			published = stats.published,
			stale_hosts = stats.stale_hosts,
			"change broker stopped"
		);
		stats
	}
}

async fn wait_until(due: Option<Instant>) {
	match due {
		Some(at) => tokio::time::sleep_until(at).await,
		None => std::future::pending().await,
	}
}

async fn dispatch(inner: Arc<Inner>, mut signals: mpsc::UnboundedReceiver<NetId>, mut stop: broadcast::Receiver<()>) {
	let mut pending: BTreeMap<NetId, Instant> = BTreeMap::new();

	loop {
		let next_due = pending.values().min().copied();
		tokio::select! {
			signal = signals.recv() => match signal {
				Some(net) => {
					inner.counters.signals.fetch_add(1, Ordering::Relaxed);
					inner.supersede(&net);
					pending
						.entry(net)
						.or_insert_with(|| Instant::now() + inner.config.coalesce_window);
				}
				None => {
					debug!("dirty signal channel closed");
					break;
				}
			},
			_ = wait_until(next_due) => {
				let now = Instant::now();
				let due: Vec<NetId> = pending
					.iter()
					.filter(|(_, at)| **at <= now)
					.map(|(net, _)| net.clone())
					.collect();
				for net in due {
					pending.remove(&net);
					inner.spawn_reconcile(net).await;
				}
			}
			_ = stop.recv() => break,
		}
	}

	while let Ok(net) = signals.try_recv() {
		inner.counters.signals.fetch_add(1, Ordering::Relaxed);
		pending.entry(net).or_insert_with(Instant::now);
	}
	for net in pending.into_keys() {
		inner.spawn_reconcile(net).await;
	}
}

impl Inner {
	fn flight(&self, net: &NetId) -> Arc<Mutex<()>> {
		let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
		Arc::clone(flights.entry(net.clone()).or_default())
	}

	/// Abandons the reconciliation of `net` that has not published yet.
	fn supersede(&self, net: &NetId) {
		let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
		if let Some(current) = in_flight.get(net) {
			current.token.cancel();
		}
	}

	fn cancel_all(&self) {
		let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
		for current in in_flight.values() {
			current.token.cancel();
		}
	}

	async fn spawn_reconcile(self: &Arc<Self>, net: NetId) {
		let generation = self.generation.fetch_add(1, Ordering::Relaxed);
		let token = CancellationToken::new();
		{
			let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
			let replaced = in_flight.insert(
				net.clone(),
				InFlight {
					generation,
					token: token.clone(),
				},
			);
			if let Some(previous) = replaced {
				previous.token.cancel();
			}
		}

		let inner = Arc::clone(self);
		let mut tasks = self.tasks.lock().await;
		while tasks.try_join_next().is_some() {}
		tasks.spawn(async move {
			if let Err(e) = inner.reconcile(&net, &token).await {
				warn!(%net, error = %e, "reconciliation failed");
			}
			inner.finish_flight(&net, generation);
		});
	}

	fn finish_flight(&self, net: &NetId, generation: u64) {
		let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
		if in_flight.get(net).is_some_and(|f| f.generation == generation) {
			in_flight.remove(net);
		}
	}

	fn abandoned(&self, net: &NetId, token: &CancellationToken) -> bool {
		if token.is_cancelled() {
			self.counters.superseded.fetch_add(1, Ordering::Relaxed);
			debug!(%net, "reconciliation superseded");
			return true;
		}
		false
	}

	#[instrument(skip(self, token), fields(%net))]
	async fn reconcile(&self, net: &NetId, token: &CancellationToken) -> Result<()> {
		let flight = self.flight(net);
		let _serial = flight.lock().await;
		let _permit = Arc::clone(&self.workers)
			.acquire_owned()
			.await
			.map_err(|_| BrokerError::ShuttingDown)?;

		if self.abandoned(net, token) {
			return Ok(());
		}
		let Some(snapshot) = self.overlay.snapshot(net).await? else {
			debug!(%net, "network is gone, nothing to publish");
			return Ok(());
		};
		let updates = resolve_all(&snapshot);
		if self.abandoned(net, token) {
			return Ok(());
		}

		let mut published = 0usize;
		let mut failed = 0usize;
		for update in updates {
			if self.abandoned(net, token) {
				return Ok(());
			}
			match self.deliver(update).await {
				Ok(()) => published += 1,
				Err(e) => {
					failed += 1;
					warn!(%net, error = %e, "publish failed, host marked stale");
				}
			}
		}

		self.counters.reconciliations.fetch_add(1, Ordering::Relaxed);
		info!(%net, published, failed, "reconciliation published");
		Ok(())
	}

	/// Stamps and publishes one update. Hosts that fail are remembered as
	/// stale until a later publish reaches them.
	async fn deliver(&self, mut update: PeerUpdate) -> Result<()> {
		let now = Utc::now().timestamp();
		update.sequence = self.sequence.next(now);
		update.server_time = now;

		let host = update.host_id;
		let net = update.network.clone();
		match self.publisher.publish(&host, &update).await {
			Ok(()) => {
				self.counters.published.fetch_add(1, Ordering::Relaxed);
				let mut stale = self.stale.write().await;
				if let Some(nets) = stale.get_mut(&host) {
					nets.remove(&net);
					if nets.is_empty() {
						stale.remove(&host);
					}
				}
				debug!(%host, %net, sequence = update.sequence, "peer update published");
				Ok(())
			}
			Err(e) => {
				self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
				self.stale.write().await.entry(host).or_default().insert(net);
				Err(e)
			}
		}
	}
}
