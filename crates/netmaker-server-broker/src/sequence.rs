// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicU64, Ordering};

/// Update sequence numbers: server seconds, bumped past the previous value
/// when the clock stalls or steps backwards.
#[derive(Debug, Default)]
pub struct SequenceClock {
	last: AtomicU64,
}

impl SequenceClock {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn next(&self, now_secs: i64) -> u64 {
		let now = u64::try_from(now_secs).unwrap_or(0);
		let mut prev = self.last.load(Ordering::SeqCst);
		loop {
			let next = now.max(prev.saturating_add(1));
			match self
				.last
				.compare_exchange_weak(prev, next, Ordering::SeqCst, Ordering::SeqCst)
			{
				Ok(_) => return next,
				Err(actual) => prev = actual,
			}
		}
	}

	pub fn last(&self) -> u64 {
		self.last.load(Ordering::SeqCst)
	}
}
