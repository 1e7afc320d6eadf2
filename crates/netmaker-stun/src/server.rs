// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Minimal UDP STUN server: BINDING requests only, no authentication, no
//! ALTERNATE-SERVER.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::message::{build_binding_response, parse_binding_request};

pub const DEFAULT_STUN_PORT: u16 = 3478;
pub const SOFTWARE: &str = concat!("netmaker-stun/", env!("CARGO_PKG_VERSION"));

const MAX_DATAGRAM: usize = 1500;

#[derive(Debug, Default)]
pub struct StunServerStats {
	pub requests: AtomicU64,
	pub responses: AtomicU64,
	pub rejected: AtomicU64,
}

pub struct StunServer {
	socket: UdpSocket,
	software: String,
	stats: Arc<StunServerStats>,
}

impl StunServer {
	#[instrument]
	pub async fn bind(addr: SocketAddr) -> Result<Self> {
		let socket = UdpSocket::bind(addr).await?;
		info!(local = ?socket.local_addr()?, "STUN server bound");
		Ok(Self {
			socket,
			software: SOFTWARE.to_string(),
			stats: Arc::new(StunServerStats::default()),
		})
	}

	pub fn local_addr(&self) -> Result<SocketAddr> {
		Ok(self.socket.local_addr()?)
	}

	pub fn stats(&self) -> Arc<StunServerStats> {
		Arc::clone(&self.stats)
	}

	/// Answers requests until `shutdown` flips to true.
	#[instrument(skip_all)]
	pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
		let mut buf = [0u8; MAX_DATAGRAM];

		loop {
			tokio::select! {
				received = self.socket.recv_from(&mut buf) => {
					match received {
						Ok((len, from)) => self.handle(&buf[..len], from).await,
						Err(e) => warn!(error = %e, "STUN receive failed"),
					}
				}
				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						info!("STUN server shutting down");
						return Ok(());
					}
				}
			}
		}
	}

	async fn handle(&self, packet: &[u8], from: SocketAddr) {
		self.stats.requests.fetch_add(1, Ordering::Relaxed);

		let transaction_id = match parse_binding_request(packet) {
			Ok(id) => id,
			Err(e) => {
				self.stats.rejected.fetch_add(1, Ordering::Relaxed);
				debug!(?from, error = %e, "dropping STUN packet");
				return;
			}
		};

		let response = build_binding_response(&transaction_id, from, &self.software);
		match self.socket.send_to(&response, from).await {
			Ok(_) => {
				self.stats.responses.fetch_add(1, Ordering::Relaxed);
			}
			Err(e) => warn!(?from, error = %e, "failed to send STUN response"),
		}
	}
}
