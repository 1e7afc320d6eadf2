// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Reflexive address discovery against public or self-hosted STUN servers.

use chrono::Utc;
use netmaker_common_model::StunObservation;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::{Result, StunError};
use crate::message::{build_binding_request, new_transaction_id, parse_binding_response};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub const DEFAULT_STUN_SERVERS: &[&str] = &[
	"stun.l.google.com:19302",
	"stun1.l.google.com:19302",
	"stun.cloudflare.com:3478",
];

/// Asks each server in turn until one answers within `probe_timeout`.
/// Returns the answering server and the reflexive address it saw.
#[instrument(skip(socket), fields(servers = stun_servers.len()))]
pub async fn probe(
	socket: &UdpSocket,
	stun_servers: &[SocketAddr],
	probe_timeout: Duration,
) -> Result<(SocketAddr, SocketAddr)> {
	if stun_servers.is_empty() {
		return Err(StunError::NoServers);
	}

	let transaction_id = new_transaction_id();
	let request = build_binding_request(&transaction_id);

	for server in stun_servers {
		debug!(?server, "sending STUN binding request");

		if let Err(e) = socket.send_to(&request, server).await {
			warn!(?server, error = %e, "failed to send STUN request");
			continue;
		}

		let mut buf = [0u8; 1024];
		match timeout(probe_timeout, socket.recv_from(&mut buf)).await {
			Ok(Ok((len, from))) => {
				if from != *server {
					warn!(?from, expected = ?server, "STUN response from unexpected source");
					continue;
				}

				match parse_binding_response(&buf[..len], &transaction_id) {
					Ok(addr) => {
						debug!(?addr, "discovered public endpoint");
						return Ok((*server, addr));
					}
					Err(e) => {
						warn!(?server, error = %e, "invalid STUN response");
						continue;
					}
				}
			}
			Ok(Err(e)) => {
				warn!(?server, error = %e, "failed to receive STUN response");
				continue;
			}
			Err(_) => {
				debug!(?server, "STUN request timed out");
				continue;
			}
		}
	}

	Err(StunError::Timeout)
}

pub async fn discover_endpoint(socket: &UdpSocket, stun_servers: &[SocketAddr]) -> Result<SocketAddr> {
	probe(socket, stun_servers, DEFAULT_PROBE_TIMEOUT)
		.await
		.map(|(_, addr)| addr)
}

/// A probe packaged as a check-in observation.
pub async fn observe(
	socket: &UdpSocket,
	stun_servers: &[SocketAddr],
	probe_timeout: Duration,
) -> Result<StunObservation> {
	let (server, public_endpoint) = probe(socket, stun_servers, probe_timeout).await?;
	Ok(StunObservation {
		server,
		public_endpoint,
		observed_at: Utc::now(),
	})
}

pub async fn resolve_stun_servers<S: AsRef<str>>(servers: &[S]) -> Vec<SocketAddr> {
	let mut addrs = Vec::new();

	for server in servers {
		let server = server.as_ref();
		match tokio::net::lookup_host(server).await {
			Ok(mut resolved) => {
				if let Some(addr) = resolved.next() {
					addrs.push(addr);
				}
			}
			Err(e) => {
				warn!(server, error = %e, "failed to resolve STUN server");
			}
		}
	}

	addrs
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn no_servers_is_an_error() {
		let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		assert!(matches!(
			probe(&socket, &[], DEFAULT_PROBE_TIMEOUT).await,
			Err(StunError::NoServers)
		));
	}

	#[tokio::test]
	async fn silent_server_times_out() {
		let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

		let result = probe(&socket, &[silent.local_addr().unwrap()], Duration::from_millis(50)).await;
		assert!(matches!(result, Err(StunError::Timeout)));
	}

	#[tokio::test]
	async fn resolves_literal_addresses() {
		let addrs = resolve_stun_servers(&["127.0.0.1:3478"]).await;
		assert_eq!(addrs, vec!["127.0.0.1:3478".parse::<SocketAddr>().unwrap()]);
	}
}
