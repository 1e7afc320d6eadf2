// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OverlayConfig {
	/// How long a pending-delete node keeps its address and may still check in.
	pub pending_delete_grace: Duration,
	/// Consecutive failed check-ins before a peer link fails over.
	pub failover_engage_after: u32,
	/// Consecutive healthy check-ins before a failover route is torn down.
	pub failover_revert_after: u32,
	pub default_deadline: Duration,
}

impl Default for OverlayConfig {
	fn default() -> Self {
		Self {
			pending_delete_grace: Duration::from_secs(300),
			failover_engage_after: 3,
			failover_revert_after: 2,
			default_deadline: Duration::from_secs(10),
		}
	}
}
