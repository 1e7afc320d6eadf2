// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;

use crate::error::DbError;

/// Create a SqlitePool with WAL mode and common settings.
///
/// # Arguments
/// * `database_url` - SQLite connection string (e.g., "sqlite:./netmaker.db")
/// * `max_connections` - upper bound on pooled connections
///
/// # Errors
/// Returns `DbError::Internal` if the URL is invalid or connection fails.
#[tracing::instrument(skip(database_url))]
pub async fn create_sqlite_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool, DbError> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| DbError::Internal(format!("Invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.busy_timeout(Duration::from_secs(5))
		.create_if_missing(true);

	let pool = SqlitePoolOptions::new()
		.max_connections(max_connections.max(1))
		.connect_with(options)
		.await?;

	tracing::debug!("sqlite pool created");
	Ok(pool)
}

/// Create a PgPool for the external SQL back-end.
///
/// # Errors
/// Returns `DbError::Sqlx` if the initial connection cannot be established.
#[tracing::instrument(skip(database_url))]
pub async fn create_pg_pool(
	database_url: &str,
	max_connections: u32,
	acquire_timeout: Duration,
) -> Result<PgPool, DbError> {
	let pool = PgPoolOptions::new()
		.max_connections(max_connections.max(1))
		.acquire_timeout(acquire_timeout)
		.connect(database_url)
		.await?;

	tracing::debug!("postgres pool created");
	Ok(pool)
}
