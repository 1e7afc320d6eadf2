// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationsConfig {
	/// Deadline applied to operations that do not carry their own.
	pub default_deadline_secs: u64,
}

impl Default for OperationsConfig {
	fn default() -> Self {
		OperationsConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationsConfigLayer {
	#[serde(default)]
	pub default_deadline_secs: Option<u64>,
}

impl OperationsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.default_deadline_secs.is_some() {
			self.default_deadline_secs = other.default_deadline_secs;
		}
	}

	pub fn finalize(self) -> OperationsConfig {
		OperationsConfig {
			default_deadline_secs: self.default_deadline_secs.unwrap_or(10),
		}
	}
}
