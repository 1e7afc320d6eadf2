// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("Not found: {table}/{key}")]
	NotFound { table: String, key: String },

	#[error("Table is empty: {table}")]
	Empty { table: String },

	#[error("Store unavailable: {0}")]
	Unavailable(String),

	#[error("Invalid table name: {0}")]
	InvalidTable(String),

	#[error("Internal: {0}")]
	Internal(String),
}

impl DbError {
	pub fn not_found(table: &str, key: &str) -> Self {
		Self::NotFound {
			table: table.to_string(),
			key: key.to_string(),
		}
	}

	pub fn empty(table: &str) -> Self {
		Self::Empty {
			table: table.to_string(),
		}
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, Self::NotFound { .. })
	}

	/// `NotFound` or `Empty`: the caller asked for something that is not there.
	pub fn is_absent(&self) -> bool {
		matches!(self, Self::NotFound { .. } | Self::Empty { .. })
	}
}

/// Whether `err` reports an empty table rather than a failure.
pub fn is_empty(err: &DbError) -> bool {
	matches!(err, DbError::Empty { .. })
}

pub type Result<T> = std::result::Result<T, DbError>;
