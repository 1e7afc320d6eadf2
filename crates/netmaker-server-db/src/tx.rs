// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Staged transactions.
//!
//! Writes are buffered in memory and reads see them (read-your-writes).
//! `commit` hands the whole batch to the back-end in one atomic step;
//! dropping the transaction without committing discards it.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{DbError, Result};
use crate::store::{KvStore, WriteOp};
use crate::tables::validate_table;

#[derive(Debug, Default)]
struct StagedTable {
	cleared: bool,
	/// `None` marks a staged delete.
	entries: BTreeMap<String, Option<String>>,
}

pub struct Transaction {
	store: KvStore,
	staged: BTreeMap<String, StagedTable>,
}

impl Transaction {
	pub(crate) fn new(store: KvStore) -> Self {
		Self {
			store,
			staged: BTreeMap::new(),
		}
	}

	pub fn store(&self) -> &KvStore {
		&self.store
	}

	pub fn insert(&mut self, table: &str, key: &str, value: impl Into<String>) -> Result<()> {
		validate_table(table)?;
		self
			.staged
			.entry(table.to_string())
			.or_default()
			.entries
			.insert(key.to_string(), Some(value.into()));
		Ok(())
	}

	pub fn delete(&mut self, table: &str, key: &str) -> Result<()> {
		validate_table(table)?;
		self
			.staged
			.entry(table.to_string())
			.or_default()
			.entries
			.insert(key.to_string(), None);
		Ok(())
	}

	pub fn delete_all(&mut self, table: &str) -> Result<()> {
		validate_table(table)?;
		let staged = self.staged.entry(table.to_string()).or_default();
		staged.cleared = true;
		staged.entries.clear();
		Ok(())
	}

	pub async fn fetch(&self, table: &str, key: &str) -> Result<String> {
		if let Some(staged) = self.staged.get(table) {
			match staged.entries.get(key) {
				Some(Some(value)) => return Ok(value.clone()),
				Some(None) => return Err(DbError::not_found(table, key)),
				None if staged.cleared => return Err(DbError::not_found(table, key)),
				None => {}
			}
		}
		self.store.fetch(table, key).await
	}

	pub async fn fetch_all(&self, table: &str) -> Result<BTreeMap<String, String>> {
		let staged = self.staged.get(table);

		let mut rows = match staged {
			Some(s) if s.cleared => BTreeMap::new(),
			_ => self.store.fetch_all_or_empty(table).await?,
		};

		if let Some(staged) = staged {
			for (key, value) in &staged.entries {
				match value {
					Some(v) => {
						rows.insert(key.clone(), v.clone());
					}
					None => {
						rows.remove(key);
					}
				}
			}
		}

		if rows.is_empty() {
			return Err(DbError::empty(table));
		}
		Ok(rows)
	}

	/// Number of staged key writes, not counting table clears.
	pub fn staged_len(&self) -> usize {
		self.staged.values().map(|t| t.entries.len()).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.staged.values().all(|t| !t.cleared && t.entries.is_empty())
	}

	pub async fn commit(self) -> Result<()> {
		let ops = self.to_ops();
		if ops.is_empty() {
			return Ok(());
		}

		let count = ops.len();
		self.store.apply(ops).await?;
		debug!(ops = count, "transaction committed");
		Ok(())
	}

	pub fn rollback(self) {
		debug!(staged = self.staged_len(), "transaction rolled back");
	}

	fn to_ops(&self) -> Vec<WriteOp> {
		let mut ops = Vec::new();
		for (table, staged) in &self.staged {
			if staged.cleared {
				ops.push(WriteOp::Clear { table: table.clone() });
			}
			for (key, value) in &staged.entries {
				ops.push(match value {
					Some(value) => WriteOp::Put {
						table: table.clone(),
						key: key.clone(),
						value: value.clone(),
					},
					None => WriteOp::Delete {
						table: table.clone(),
						key: key.clone(),
					},
				});
			}
		}
		ops
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tables::{ACLS, NODES};
	use crate::testing::{file_store, sqlite_memory_store};

	#[tokio::test]
	async fn reads_see_staged_writes() {
		let store = sqlite_memory_store().await;
		store.insert(NODES, "a", "1").await.unwrap();
		store.insert(NODES, "b", "2").await.unwrap();

		let mut tx = store.begin();
		tx.insert(NODES, "c", "3").unwrap();
		tx.delete(NODES, "a").unwrap();

		assert_eq!(tx.fetch(NODES, "c").await.unwrap(), "3");
		assert!(tx.fetch(NODES, "a").await.unwrap_err().is_not_found());
		let rows = tx.fetch_all(NODES).await.unwrap();
		assert_eq!(rows.keys().cloned().collect::<Vec<_>>(), vec!["b", "c"]);

		// Nothing is visible outside until commit.
		assert!(store.fetch(NODES, "c").await.unwrap_err().is_not_found());
		tx.commit().await.unwrap();
		assert_eq!(store.fetch(NODES, "c").await.unwrap(), "3");
		assert!(store.fetch(NODES, "a").await.unwrap_err().is_not_found());
	}

	#[tokio::test]
	async fn clear_then_insert_in_one_transaction() {
		let (store, _dir) = file_store().await;
		store.insert(ACLS, "old", "x").await.unwrap();

		let mut tx = store.begin();
		tx.delete_all(ACLS).unwrap();
		assert!(tx.fetch(ACLS, "old").await.unwrap_err().is_not_found());
		assert!(tx.fetch_all(ACLS).await.unwrap_err().is_absent());
		tx.insert(ACLS, "new", "y").unwrap();
		tx.commit().await.unwrap();

		let rows = store.fetch_all(ACLS).await.unwrap();
		assert_eq!(rows.len(), 1);
		assert_eq!(rows.get("new").map(String::as_str), Some("y"));
	}

	#[tokio::test]
	async fn dropped_transaction_discards_writes() {
		let store = sqlite_memory_store().await;
		{
			let mut tx = store.begin();
			tx.insert(NODES, "a", "1").unwrap();
		}
		assert!(store.fetch(NODES, "a").await.unwrap_err().is_not_found());
	}

	#[tokio::test]
	async fn empty_commit_is_a_no_op() {
		let store = sqlite_memory_store().await;
		let tx = store.begin();
		assert!(tx.is_empty());
		tx.commit().await.unwrap();
	}

	#[tokio::test]
	async fn staging_rejects_invalid_tables() {
		let store = sqlite_memory_store().await;
		let mut tx = store.begin();
		assert!(tx.insert("Bad Table", "k", "v").is_err());
	}
}
