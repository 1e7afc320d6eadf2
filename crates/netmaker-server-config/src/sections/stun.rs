// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! STUN server and probe configuration.

use serde::Deserialize;
use std::net::SocketAddr;

const DEFAULT_LISTEN: SocketAddr = SocketAddr::new(
	std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
	3478,
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunConfig {
	pub enabled: bool,
	pub listen: SocketAddr,
	/// Servers probed for the server's own reflexive address. Empty means
	/// the built-in public list.
	pub servers: Vec<String>,
	pub probe_timeout_secs: u64,
}

impl Default for StunConfig {
	fn default() -> Self {
		StunConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StunConfigLayer {
	#[serde(default)]
	pub enabled: Option<bool>,
	#[serde(default)]
	pub listen: Option<SocketAddr>,
	#[serde(default)]
	pub servers: Option<Vec<String>>,
	#[serde(default)]
	pub probe_timeout_secs: Option<u64>,
}

impl StunConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.enabled.is_some() {
			self.enabled = other.enabled;
		}
		if other.listen.is_some() {
			self.listen = other.listen;
		}
		if other.servers.is_some() {
			self.servers = other.servers;
		}
		if other.probe_timeout_secs.is_some() {
			self.probe_timeout_secs = other.probe_timeout_secs;
		}
	}

	pub fn finalize(self) -> StunConfig {
		StunConfig {
			enabled: self.enabled.unwrap_or(true),
			listen: self.listen.unwrap_or(DEFAULT_LISTEN),
			servers: self.servers.unwrap_or_default(),
			probe_timeout_secs: self.probe_timeout_secs.unwrap_or(3),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = StunConfig::default();
		assert!(config.enabled);
		assert_eq!(config.listen.to_string(), "0.0.0.0:3478");
		assert!(config.servers.is_empty());
	}

	#[test]
	fn test_deserialize() {
		let layer: StunConfigLayer = toml::from_str(
			r#"
enabled = false
listen = "127.0.0.1:13478"
servers = ["stun.example.net:3478"]
"#,
		)
		.unwrap();
		let config = layer.finalize();
		assert!(!config.enabled);
		assert_eq!(config.listen.port(), 13478);
		assert_eq!(config.servers, vec!["stun.example.net:3478".to_string()]);
	}
}
