// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! External SQL back-end.
//!
//! Same schema as the embedded SQL store, upserts through
//! `ON CONFLICT (key) DO UPDATE`. Every operation runs under the
//! configured [`RetryPolicy`] so a database restart shows up as latency
//! rather than as an error, up to the retry deadline.

use std::collections::BTreeMap;

use sqlx::postgres::PgPool;
use tracing::{debug, info};

use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::store::WriteOp;

/// Advisory lock key held while creating tables.
const SCHEMA_LOCK_ID: i64 = 0x6e65_746d_616b_6572;

#[derive(Clone)]
pub struct PostgresStore {
	pool: PgPool,
	retry: RetryPolicy,
}

fn create_table_sql(table: &str) -> String {
	format!("CREATE TABLE IF NOT EXISTS {table} (key TEXT NOT NULL PRIMARY KEY, value TEXT)")
}

impl PostgresStore {
	pub fn new(pool: PgPool, retry: RetryPolicy) -> Self {
		Self { pool, retry }
	}

	pub async fn ensure_table(&self, table: &str) -> Result<()> {
		let pool = &self.pool;
		let sql = create_table_sql(table);
		let sql = sql.as_str();
		self
			.retry
			.run("ensure_table", move || async move {
				sqlx::query(sql).execute(pool).await?;
				Ok(())
			})
			.await
	}

	/// Creates `tables` while holding a session-level advisory lock so that
	/// concurrently starting servers do not race each other.
	pub async fn create_tables(&self, tables: &[&str]) -> Result<()> {
		let pool = &self.pool;
		self
			.retry
			.run("create_tables", move || async move {
				let mut conn = pool.acquire().await?;
				sqlx::query("SELECT pg_advisory_lock($1)")
					.bind(SCHEMA_LOCK_ID)
					.execute(&mut *conn)
					.await?;

				let mut outcome = Ok(());
				for table in tables {
					let sql = create_table_sql(table);
					if let Err(e) = sqlx::query(&sql).execute(&mut *conn).await {
						outcome = Err(e.into());
						break;
					}
				}

				sqlx::query("SELECT pg_advisory_unlock($1)")
					.bind(SCHEMA_LOCK_ID)
					.execute(&mut *conn)
					.await?;
				outcome
			})
			.await?;

		info!(count = tables.len(), "postgres tables ensured");
		Ok(())
	}

	pub async fn fetch(&self, table: &str, key: &str) -> Result<Option<String>> {
		let pool = &self.pool;
		let sql = format!("SELECT value FROM {table} WHERE key = $1");
		let sql = sql.as_str();
		self
			.retry
			.run("fetch", move || async move {
				let row: Option<(Option<String>,)> = sqlx::query_as(sql).bind(key).fetch_optional(pool).await?;
				Ok(row.map(|(value,)| value.unwrap_or_default()))
			})
			.await
	}

	pub async fn fetch_all(&self, table: &str) -> Result<BTreeMap<String, String>> {
		let pool = &self.pool;
		let sql = format!("SELECT key, value FROM {table}");
		let sql = sql.as_str();
		self
			.retry
			.run("fetch_all", move || async move {
				let rows: Vec<(String, Option<String>)> = sqlx::query_as(sql).fetch_all(pool).await?;
				Ok(rows
					.into_iter()
					.map(|(key, value)| (key, value.unwrap_or_default()))
					.collect())
			})
			.await
	}

	pub async fn apply(&self, ops: &[WriteOp]) -> Result<()> {
		let pool = &self.pool;
		self
			.retry
			.run("apply", move || async move {
				let mut tx = pool.begin().await?;

				for op in ops {
					match op {
						WriteOp::Put { table, key, value } => {
							let sql = format!(
								"INSERT INTO {table} (key, value) VALUES ($1, $2) \
								 ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value"
							);
							sqlx::query(&sql).bind(key).bind(value).execute(&mut *tx).await?;
						}
						WriteOp::Delete { table, key } => {
							let sql = format!("DELETE FROM {table} WHERE key = $1");
							sqlx::query(&sql).bind(key).execute(&mut *tx).await?;
						}
						WriteOp::Clear { table } => {
							let sql = format!("DELETE FROM {table}");
							sqlx::query(&sql).execute(&mut *tx).await?;
						}
					}
				}

				tx.commit().await?;
				debug!(ops = ops.len(), "postgres batch committed");
				Ok(())
			})
			.await
	}

	pub async fn close(&self) {
		self.pool.close().await;
	}
}
