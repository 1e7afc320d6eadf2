// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{OverlayError, Result};

#[derive(Clone, Debug)]
pub struct CancellationToken {
	cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
	pub fn new() -> Self {
		Self {
			cancelled: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::SeqCst)
	}
}

impl Default for CancellationToken {
	fn default() -> Self {
		Self::new()
	}
}

/// Deadline and cancellation carried by every externally triggered operation.
#[derive(Clone, Debug)]
pub struct OpContext {
	deadline: Instant,
	cancellation_token: CancellationToken,
}

impl OpContext {
	pub fn with_timeout(timeout: Duration) -> Self {
		Self::with_deadline(Instant::now() + timeout)
	}

	pub fn with_deadline(deadline: Instant) -> Self {
		Self {
			deadline,
			cancellation_token: CancellationToken::new(),
		}
	}

	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.cancellation_token = token;
		self
	}

	pub fn cancellation_token(&self) -> &CancellationToken {
		&self.cancellation_token
	}

	pub fn deadline(&self) -> Instant {
		self.deadline
	}

	pub fn remaining(&self) -> Duration {
		self.deadline.saturating_duration_since(Instant::now())
	}

	/// Fails once the deadline has passed or the operation was cancelled.
	pub fn check(&self) -> Result<()> {
		if self.cancellation_token.is_cancelled() || Instant::now() >= self.deadline {
			return Err(OverlayError::DeadlineExceeded);
		}
		Ok(())
	}

	/// Runs `fut`, abandoning it when the deadline passes.
	pub async fn run<T, F>(&self, fut: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		self.check()?;
		match tokio::time::timeout(self.remaining(), fut).await {
			Ok(result) => result,
			Err(_) => Err(OverlayError::DeadlineExceeded),
		}
	}
}
