// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netmaker_common_model::ValidationError;
use netmaker_server_db::DbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	Storage,
	NotFound,
	Validation,
	Conflict,
	Exhausted,
	Unavailable,
	DeadlineExceeded,
	Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
	#[error("storage failure during {op}: {source}")]
	Storage {
		op: &'static str,
		#[source]
		source: DbError,
	},

	#[error("not found: {0}")]
	NotFound(String),

	#[error("validation failed: {0}")]
	Validation(String),

	#[error("conflict: {0}")]
	Conflict(String),

	#[error("exhausted: {0}")]
	Exhausted(String),

	#[error("unavailable: {0}")]
	Unavailable(String),

	#[error("deadline exceeded")]
	DeadlineExceeded,

	#[error("internal error: {0}")]
	Internal(String),
}

impl OverlayError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Storage { .. } => ErrorKind::Storage,
			Self::NotFound(_) => ErrorKind::NotFound,
			Self::Validation(_) => ErrorKind::Validation,
			Self::Conflict(_) => ErrorKind::Conflict,
			Self::Exhausted(_) => ErrorKind::Exhausted,
			Self::Unavailable(_) => ErrorKind::Unavailable,
			Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
			Self::Internal(_) => ErrorKind::Internal,
		}
	}

	/// Storage failures, conflicts and transient outages may succeed on retry.
	pub fn is_retriable(&self) -> bool {
		matches!(
			self.kind(),
			ErrorKind::Storage | ErrorKind::Conflict | ErrorKind::Unavailable
		)
	}

	/// Maps a store error raised while performing `op`.
	pub fn storage(op: &'static str, err: DbError) -> Self {
		match err {
			DbError::NotFound { table, key } => Self::NotFound(format!("{table}/{key}")),
			DbError::Unavailable(msg) => Self::Unavailable(format!("{op}: {msg}")),
			source => Self::Storage { op, source },
		}
	}
}

impl From<ValidationError> for OverlayError {
	fn from(err: ValidationError) -> Self {
		Self::Validation(err.to_string())
	}
}

impl From<DbError> for OverlayError {
	fn from(err: DbError) -> Self {
		Self::storage("commit", err)
	}
}

pub type Result<T> = std::result::Result<T, OverlayError>;

/// Attaches the failing operation name to store errors.
pub trait StorageContext<T> {
	fn during(self, op: &'static str) -> Result<T>;
}

impl<T> StorageContext<T> for std::result::Result<T, DbError> {
	fn during(self, op: &'static str) -> Result<T> {
		self.map_err(|e| OverlayError::storage(op, e))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn store_errors_keep_their_kind() {
		let err = OverlayError::storage("fetch node", DbError::not_found("nodes", "x"));
		assert_eq!(err.kind(), ErrorKind::NotFound);

		let err = OverlayError::storage("fetch node", DbError::Unavailable("pg down".into()));
		assert_eq!(err.kind(), ErrorKind::Unavailable);
		assert!(err.is_retriable());

		let err = OverlayError::storage("put node", DbError::Internal("x".into()));
		assert_eq!(err.kind(), ErrorKind::Storage);
		assert!(err.to_string().contains("put node"));
	}

	#[test]
	fn validation_is_not_retriable() {
		assert!(!OverlayError::Validation("bad".into()).is_retriable());
		assert!(!OverlayError::Exhausted("full".into()).is_retriable());
		assert!(!OverlayError::DeadlineExceeded.is_retriable());
		assert!(OverlayError::Conflict("cycle".into()).is_retriable());
	}
}
