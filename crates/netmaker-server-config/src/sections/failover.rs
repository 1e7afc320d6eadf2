// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Failover hysteresis.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverConfig {
	pub engage_after_failures: u32,
	pub revert_after_successes: u32,
}

impl Default for FailoverConfig {
	fn default() -> Self {
		FailoverConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FailoverConfigLayer {
	#[serde(default)]
	pub engage_after_failures: Option<u32>,
	#[serde(default)]
	pub revert_after_successes: Option<u32>,
}

impl FailoverConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.engage_after_failures.is_some() {
			self.engage_after_failures = other.engage_after_failures;
		}
		if other.revert_after_successes.is_some() {
			self.revert_after_successes = other.revert_after_successes;
		}
	}

	pub fn finalize(self) -> FailoverConfig {
		FailoverConfig {
			engage_after_failures: self.engage_after_failures.unwrap_or(3),
			revert_after_successes: self.revert_after_successes.unwrap_or(2),
		}
	}
}
