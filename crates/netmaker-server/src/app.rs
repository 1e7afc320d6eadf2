// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Process wiring: owns the store, the overlay engine, the change broker,
//! the STUN responder and the maintenance scheduler.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use netmaker_server_broker::{BroadcastPublisher, Broker, BrokerStats};
use netmaker_server_config::{DatabaseBackend, DatabaseConfig, ServerConfig, StunConfig};
use netmaker_server_db::{KvStore, RetryPolicy, StoreConfig};
use netmaker_server_overlay::{ChannelNotifier, MetricsMap, OverlayConfig, OverlayService};
use netmaker_stun::{ObservationMap, StunServer, StunServerStats, DEFAULT_STUN_SERVERS};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::jobs::{JobScheduler, NodeExpiryJob, PendingDeleteFinalizerJob};

pub fn store_config(database: &DatabaseConfig) -> StoreConfig {
	match database.backend {
		DatabaseBackend::File => StoreConfig::File {
			path: database.path.clone(),
		},
		DatabaseBackend::Sqlite => StoreConfig::Sqlite {
			url: database.url.clone(),
			max_connections: database.max_connections,
		},
		DatabaseBackend::Postgres => StoreConfig::Postgres {
			url: database.url.clone(),
			max_connections: database.max_connections,
			retry: RetryPolicy::with_deadline(Duration::from_secs(database.retry_deadline_secs)),
		},
	}
}

pub fn overlay_config(config: &ServerConfig) -> OverlayConfig {
	OverlayConfig {
		pending_delete_grace: config.pending_delete_grace(),
		failover_engage_after: config.failover.engage_after_failures,
		failover_revert_after: config.failover.revert_after_successes,
		default_deadline: config.default_deadline(),
	}
}

pub fn broker_config(config: &ServerConfig) -> netmaker_server_broker::BrokerConfig {
	netmaker_server_broker::BrokerConfig {
		coalesce_window: config.coalesce_window(),
		workers: config.broker.workers,
		publish_queue: config.broker.publish_queue,
		drain_timeout: Duration::from_secs(config.broker.drain_timeout_secs),
	}
}

struct StunHandle {
	local_addr: SocketAddr,
	stats: Arc<StunServerStats>,
	stop_tx: watch::Sender<bool>,
	task: JoinHandle<netmaker_stun::Result<()>>,
}

pub struct App {
	store: KvStore,
	overlay: OverlayService,
	broker: Broker,
	publisher: Arc<BroadcastPublisher>,
	scheduler: JobScheduler,
	stun: Option<StunHandle>,
}

impl App {
	/// Opens the store and starts every long-running component.
	pub async fn start(config: &ServerConfig) -> anyhow::Result<Self> {
		let store = KvStore::open(&store_config(&config.database))
			.await
			.context("failed to open store")?;
		store.migrate().await.context("failed to migrate store")?;

		let (notifier, signals) = ChannelNotifier::new();
		let overlay = OverlayService::with_state(
			store.clone(),
			Arc::new(notifier),
			MetricsMap::new(),
			ObservationMap::new(),
			overlay_config(config),
		);

		let publisher = Arc::new(BroadcastPublisher::new(config.broker.publish_queue));
		let broker = Broker::start(overlay.clone(), publisher.clone(), broker_config(config), signals);

		let mut scheduler = JobScheduler::new();
		scheduler.register_periodic(
			Arc::new(NodeExpiryJob::new(overlay.clone())),
			Duration::from_secs(config.nodes.expiry_check_interval_secs),
		);
		scheduler.register_periodic(
			Arc::new(PendingDeleteFinalizerJob::new(overlay.clone())),
			Duration::from_secs(config.nodes.finalize_interval_secs),
		);
		scheduler.start().await;

		let stun = if config.stun.enabled {
			Some(start_stun(config.stun.listen).await?)
		} else {
			info!("STUN server disabled");
			None
		};

		Ok(Self {
			store,
			overlay,
			broker,
			publisher,
			scheduler,
			stun,
		})
	}

	pub fn overlay(&self) -> &OverlayService {
		&self.overlay
	}

	pub fn broker(&self) -> &Broker {
		&self.broker
	}

	pub fn publisher(&self) -> &Arc<BroadcastPublisher> {
		&self.publisher
	}

	pub fn scheduler(&self) -> &JobScheduler {
		&self.scheduler
	}

	pub fn stun_addr(&self) -> Option<SocketAddr> {
		self.stun.as_ref().map(|s| s.local_addr)
	}

	/// Stops in dependency order: maintenance, new mutations, the broker
	/// drain, the STUN responder, then the store.
	pub async fn shutdown(self) -> BrokerStats {
		info!("Shutting down job scheduler...");
		self.scheduler.shutdown().await;

		self.overlay.shutdown();
		let stats = self.broker.shutdown().await;
		info!(
			reconciliations = stats.reconciliations,
			published = stats.published,
			publish_failures = stats.publish_failures,
			"change broker drained"
		);

		if let Some(stun) = self.stun {
			let _ = stun.stop_tx.send(true);
			match stun.task.await {
				Ok(Ok(())) => {}
				Ok(Err(e)) => warn!(error = %e, "STUN server exited with error"),
				Err(e) => error!(error = %e, "STUN server task panicked"),
			}
			info!(
				requests = stun.stats.requests.load(std::sync::atomic::Ordering::Relaxed),
				"STUN server stopped"
			);
		}

		self.store.close().await;
		stats
	}
}

async fn start_stun(listen: SocketAddr) -> anyhow::Result<StunHandle> {
	let server = StunServer::bind(listen)
		.await
		.with_context(|| format!("failed to bind STUN server on {listen}"))?;
	let local_addr = server.local_addr()?;
	let stats = server.stats();
	let (stop_tx, stop_rx) = watch::channel(false);
	let task = tokio::spawn(server.run(stop_rx));
	Ok(StunHandle {
		local_addr,
		stats,
		stop_tx,
		task,
	})
}

/// Discovers the server's own reflexive address. Failure is logged and
/// tolerated.
pub async fn probe_public_endpoint(config: &StunConfig) -> Option<SocketAddr> {
	let servers = if config.servers.is_empty() {
		netmaker_stun::resolve_stun_servers(DEFAULT_STUN_SERVERS).await
	} else {
		netmaker_stun::resolve_stun_servers(config.servers.as_slice()).await
	};

	let socket = match UdpSocket::bind("0.0.0.0:0").await {
		Ok(socket) => socket,
		Err(e) => {
			warn!(error = %e, "failed to bind STUN probe socket");
			return None;
		}
	};

	match netmaker_stun::probe(&socket, &servers, Duration::from_secs(config.probe_timeout_secs)).await {
		Ok((server, endpoint)) => {
			info!(%server, %endpoint, "discovered public endpoint");
			Some(endpoint)
		}
		Err(e) => {
			warn!(error = %e, "STUN probe failed");
			None
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use netmaker_server_config::BrokerConfig;

	#[test]
	fn test_store_config_per_backend() {
		let mut database = DatabaseConfig::default();
		assert!(matches!(store_config(&database), StoreConfig::Sqlite { max_connections: 5, .. }));

		database.backend = DatabaseBackend::Postgres;
		database.url = "postgres://db/netmaker".to_string();
		database.retry_deadline_secs = 12;
		match store_config(&database) {
			StoreConfig::Postgres { retry, url, .. } => {
				assert_eq!(url, "postgres://db/netmaker");
				assert_eq!(retry.deadline, Duration::from_secs(12));
			}
			other => panic!("unexpected store config {other:?}"),
		}

		database.backend = DatabaseBackend::File;
		assert!(matches!(store_config(&database), StoreConfig::File { .. }));
	}

	#[test]
	fn test_runtime_configs_follow_server_config() {
		let config = ServerConfig {
			broker: BrokerConfig {
				coalesce_window_ms: 40,
				workers: 3,
				publish_queue: 8,
				drain_timeout_secs: 1,
			},
			..Default::default()
		};
		let broker = broker_config(&config);
		assert_eq!(broker.coalesce_window, Duration::from_millis(40));
		assert_eq!(broker.workers, 3);
		assert_eq!(broker.drain_timeout, Duration::from_secs(1));

		let overlay = overlay_config(&config);
		assert_eq!(overlay.failover_engage_after, 3);
		assert_eq!(overlay.pending_delete_grace, Duration::from_secs(300));
	}
}
