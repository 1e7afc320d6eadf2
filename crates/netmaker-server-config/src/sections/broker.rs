// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Change broker configuration.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
	pub coalesce_window_ms: u64,
	pub workers: usize,
	pub publish_queue: usize,
	pub drain_timeout_secs: u64,
}

impl Default for BrokerConfig {
	fn default() -> Self {
		BrokerConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrokerConfigLayer {
	#[serde(default)]
	pub coalesce_window_ms: Option<u64>,
	#[serde(default)]
	pub workers: Option<usize>,
	#[serde(default)]
	pub publish_queue: Option<usize>,
	#[serde(default)]
	pub drain_timeout_secs: Option<u64>,
}

impl BrokerConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.coalesce_window_ms.is_some() {
			self.coalesce_window_ms = other.coalesce_window_ms;
		}
		if other.workers.is_some() {
			self.workers = other.workers;
		}
		if other.publish_queue.is_some() {
			self.publish_queue = other.publish_queue;
		}
		if other.drain_timeout_secs.is_some() {
			self.drain_timeout_secs = other.drain_timeout_secs;
		}
	}

	pub fn finalize(self) -> BrokerConfig {
		BrokerConfig {
			coalesce_window_ms: self.coalesce_window_ms.unwrap_or(250),
			workers: self
				.workers
				.unwrap_or_else(|| std::thread::available_parallelism().map_or(4, |n| n.get())),
			publish_queue: self.publish_queue.unwrap_or(256),
			drain_timeout_secs: self.drain_timeout_secs.unwrap_or(5),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = BrokerConfigLayer::default().finalize();
		assert_eq!(config.coalesce_window_ms, 250);
		assert!(config.workers >= 1);
		assert_eq!(config.publish_queue, 256);
		assert_eq!(config.drain_timeout_secs, 5);
	}

	#[test]
	fn test_merge_keeps_unset_fields() {
		let mut base = BrokerConfigLayer {
			workers: Some(2),
			publish_queue: Some(64),
			..Default::default()
		};
		base.merge(BrokerConfigLayer {
			workers: Some(8),
			..Default::default()
		});
		assert_eq!(base.workers, Some(8));
		assert_eq!(base.publish_queue, Some(64));
	}
}
