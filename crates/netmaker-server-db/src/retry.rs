// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded exponential backoff for the external SQL back-end.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::error::{DbError, Result};

const BASE_RETRY_DELAY_MS: u64 = 100;
const MAX_RETRY_DELAY_MS: u64 = 5_000;
const RETRY_FACTOR: f64 = 2.0;
const DEFAULT_DEADLINE_SECS: u64 = 30;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	pub deadline: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
		}
	}
}

impl RetryPolicy {
	pub fn with_deadline(deadline: Duration) -> Self {
		Self { deadline }
	}

	/// Runs `op` until it succeeds, fails permanently, or the deadline passes.
	/// Transient failures past the deadline surface as `DbError::Unavailable`.
	pub async fn run<T, F, Fut>(&self, op_name: &'static str, mut op: F) -> Result<T>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let deadline = Instant::now() + self.deadline;
		let mut attempt: u32 = 0;

		loop {
			match op().await {
				Ok(value) => return Ok(value),
				Err(e) if is_transient(&e) => {
					attempt += 1;
					let delay = backoff_delay(attempt);
					if Instant::now() + delay >= deadline {
						warn!(op = op_name, attempt, error = %e, "giving up on store operation");
						return Err(DbError::Unavailable(format!("{op_name}: {e}")));
					}
					warn!(op = op_name, attempt, delay_ms = delay.as_millis() as u64, error = %e, "transient store failure, retrying");
					tokio::time::sleep(delay).await;
				}
				Err(e) => return Err(e),
			}
		}
	}
}

pub(crate) fn backoff_delay(attempt: u32) -> Duration {
	let base = BASE_RETRY_DELAY_MS as f64 * RETRY_FACTOR.powi(attempt.saturating_sub(1) as i32);
	let capped = (base as u64).min(MAX_RETRY_DELAY_MS);
	let jitter = fastrand::u64(0..=capped / 4);
	Duration::from_millis(capped + jitter)
}

/// Connection-class failures worth retrying. Constraint violations, bad SQL
/// and decode errors are permanent.
pub(crate) fn is_transient(err: &DbError) -> bool {
	match err {
		DbError::Io(_) => true,
		DbError::Sqlx(e) => match e {
			sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Protocol(_) => true,
			sqlx::Error::Database(db) => db
				.code()
				.map(|code| {
					code.starts_with("08") || matches!(code.as_ref(), "57P01" | "57P02" | "57P03" | "40001" | "40P01")
				})
				.unwrap_or(false),
			_ => false,
		},
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	#[test]
	fn backoff_grows_and_caps() {
		let first = backoff_delay(1);
		assert!(first >= Duration::from_millis(BASE_RETRY_DELAY_MS));
		assert!(first <= Duration::from_millis(BASE_RETRY_DELAY_MS + BASE_RETRY_DELAY_MS / 4));

		let late = backoff_delay(30);
		assert!(late >= Duration::from_millis(MAX_RETRY_DELAY_MS));
		assert!(late <= Duration::from_millis(MAX_RETRY_DELAY_MS + MAX_RETRY_DELAY_MS / 4));
	}

	#[test]
	fn classifies_transient_errors() {
		let io = DbError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
		assert!(is_transient(&io));
		assert!(is_transient(&DbError::Sqlx(sqlx::Error::PoolTimedOut)));
		assert!(!is_transient(&DbError::Sqlx(sqlx::Error::RowNotFound)));
		assert!(!is_transient(&DbError::not_found("nodes", "x")));
	}

	#[tokio::test]
	async fn retries_until_success() {
		let calls = AtomicU32::new(0);
		let counter = &calls;
		let policy = RetryPolicy::with_deadline(Duration::from_secs(5));

		let value = policy
			.run("test", move || async move {
				if counter.fetch_add(1, Ordering::SeqCst) < 2 {
					Err(DbError::Sqlx(sqlx::Error::PoolTimedOut))
				} else {
					Ok(7)
				}
			})
			.await
			.unwrap();

		assert_eq!(value, 7);
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn permanent_errors_are_not_retried() {
		let calls = AtomicU32::new(0);
		let counter = &calls;
		let policy = RetryPolicy::default();

		let err = policy
			.run("test", move || async move {
				counter.fetch_add(1, Ordering::SeqCst);
				Err::<(), _>(DbError::Internal("bad".into()))
			})
			.await
			.unwrap_err();

		assert!(matches!(err, DbError::Internal(_)));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn deadline_surfaces_unavailable() {
		let policy = RetryPolicy::with_deadline(Duration::from_millis(50));

		let err = policy
			.run("test", || async { Err::<(), _>(DbError::Sqlx(sqlx::Error::PoolTimedOut)) })
			.await
			.unwrap_err();

		assert!(matches!(err, DbError::Unavailable(_)));
	}
}
