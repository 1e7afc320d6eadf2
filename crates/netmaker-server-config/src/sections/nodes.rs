// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Node lifecycle timing.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodesConfig {
	pub pending_delete_grace_secs: u64,
	pub finalize_interval_secs: u64,
	pub expiry_check_interval_secs: u64,
}

impl Default for NodesConfig {
	fn default() -> Self {
		NodesConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodesConfigLayer {
	#[serde(default)]
	pub pending_delete_grace_secs: Option<u64>,
	#[serde(default)]
	pub finalize_interval_secs: Option<u64>,
	#[serde(default)]
	pub expiry_check_interval_secs: Option<u64>,
}

impl NodesConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.pending_delete_grace_secs.is_some() {
			self.pending_delete_grace_secs = other.pending_delete_grace_secs;
		}
		if other.finalize_interval_secs.is_some() {
			self.finalize_interval_secs = other.finalize_interval_secs;
		}
		if other.expiry_check_interval_secs.is_some() {
			self.expiry_check_interval_secs = other.expiry_check_interval_secs;
		}
	}

	pub fn finalize(self) -> NodesConfig {
		NodesConfig {
			pending_delete_grace_secs: self.pending_delete_grace_secs.unwrap_or(300),
			finalize_interval_secs: self.finalize_interval_secs.unwrap_or(30),
			expiry_check_interval_secs: self.expiry_check_interval_secs.unwrap_or(60),
		}
	}
}
