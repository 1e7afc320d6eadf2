// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
	/// Signals for one network inside this window collapse into one
	/// reconciliation.
	pub coalesce_window: Duration,
	/// Networks reconciled in parallel.
	pub workers: usize,
	/// Buffered updates per host subscriber.
	pub publish_queue: usize,
	/// Upper bound on flushing pending work at shutdown.
	pub drain_timeout: Duration,
}

impl Default for BrokerConfig {
	fn default() -> Self {
		Self {
			coalesce_window: Duration::from_millis(250),
			workers: std::thread::available_parallelism().map_or(4, |n| n.get()),
			publish_queue: 256,
			drain_timeout: Duration::from_secs(5),
		}
	}
}
