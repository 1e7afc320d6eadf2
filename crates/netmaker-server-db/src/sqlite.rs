// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Embedded SQL back-end: one `<table>(key TEXT PK, value TEXT)` per table.

use std::collections::BTreeMap;

use sqlx::sqlite::SqlitePool;
use tracing::debug;

use crate::error::Result;
use crate::store::WriteOp;

#[derive(Clone)]
pub struct SqliteStore {
	pool: SqlitePool,
}

fn create_table_sql(table: &str) -> String {
	format!("CREATE TABLE IF NOT EXISTS {table} (key TEXT NOT NULL PRIMARY KEY, value TEXT)")
}

impl SqliteStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	pub async fn ensure_table(&self, table: &str) -> Result<()> {
		let sql = create_table_sql(table);
		sqlx::query(&sql).execute(&self.pool).await?;
		Ok(())
	}

	/// Creates `tables` in one transaction; SQLite's single writer keeps
	/// concurrent migrations from interleaving.
	pub async fn create_tables(&self, tables: &[&str]) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		for table in tables {
			let sql = create_table_sql(table);
			sqlx::query(&sql).execute(&mut *tx).await?;
		}
		tx.commit().await?;
		debug!(count = tables.len(), "sqlite tables ensured");
		Ok(())
	}

	pub async fn fetch(&self, table: &str, key: &str) -> Result<Option<String>> {
		let sql = format!("SELECT value FROM {table} WHERE key = ?");
		let row: Option<(Option<String>,)> = sqlx::query_as(&sql)
			.bind(key)
			.fetch_optional(&self.pool)
			.await?;

		Ok(row.map(|(value,)| value.unwrap_or_default()))
	}

	pub async fn fetch_all(&self, table: &str) -> Result<BTreeMap<String, String>> {
		let sql = format!("SELECT key, value FROM {table}");
		let rows: Vec<(String, Option<String>)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

		Ok(rows
			.into_iter()
			.map(|(key, value)| (key, value.unwrap_or_default()))
			.collect())
	}

	pub async fn apply(&self, ops: &[WriteOp]) -> Result<()> {
		let mut tx = self.pool.begin().await?;

		for op in ops {
			match op {
				WriteOp::Put { table, key, value } => {
					let sql = format!("INSERT OR REPLACE INTO {table} (key, value) VALUES (?, ?)");
					sqlx::query(&sql).bind(key).bind(value).execute(&mut *tx).await?;
				}
				WriteOp::Delete { table, key } => {
					let sql = format!("DELETE FROM {table} WHERE key = ?");
					sqlx::query(&sql).bind(key).execute(&mut *tx).await?;
				}
				WriteOp::Clear { table } => {
					let sql = format!("DELETE FROM {table}");
					sqlx::query(&sql).execute(&mut *tx).await?;
				}
			}
		}

		tx.commit().await?;
		Ok(())
	}

	pub async fn close(&self) {
		self.pool.close().await;
	}
}
