// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The table/key/value contract shared by every back-end.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::postgres::PgPool;
use sqlx::sqlite::SqlitePool;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::error::{DbError, Result};
use crate::file::FileStore;
use crate::pool::{create_pg_pool, create_sqlite_pool};
use crate::postgres::PostgresStore;
use crate::retry::RetryPolicy;
use crate::sqlite::SqliteStore;
use crate::tables::{validate_table, ALL_TABLES};
use crate::tx::Transaction;

const PG_ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// A single staged mutation. Batches of these are applied atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
	Put { table: String, key: String, value: String },
	Delete { table: String, key: String },
	Clear { table: String },
}

impl WriteOp {
	pub fn table(&self) -> &str {
		match self {
			Self::Put { table, .. } | Self::Delete { table, .. } | Self::Clear { table } => table,
		}
	}
}

#[derive(Debug, Clone)]
pub enum StoreConfig {
	File {
		path: PathBuf,
	},
	Sqlite {
		url: String,
		max_connections: u32,
	},
	Postgres {
		url: String,
		max_connections: u32,
		retry: RetryPolicy,
	},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
	File,
	Sqlite,
	Postgres,
}

impl fmt::Display for BackendKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::File => write!(f, "file"),
			Self::Sqlite => write!(f, "sqlite"),
			Self::Postgres => write!(f, "postgres"),
		}
	}
}

enum Backend {
	File(FileStore),
	Sqlite(SqliteStore),
	Postgres(PostgresStore),
}

struct Inner {
	backend: Backend,
	table_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
	ensured: Mutex<HashSet<String>>,
	closed: AtomicBool,
}

/// Handle to the key/value store. Cheap to clone.
///
/// Values are opaque strings. Writes to a table are serialized by a
/// per-table lock; reads never take it.
#[derive(Clone)]
pub struct KvStore {
	inner: Arc<Inner>,
}

impl KvStore {
	fn from_backend(backend: Backend) -> Self {
		Self {
			inner: Arc::new(Inner {
				backend,
				table_locks: Mutex::new(HashMap::new()),
				ensured: Mutex::new(HashSet::new()),
				closed: AtomicBool::new(false),
			}),
		}
	}

	#[tracing::instrument(skip(config))]
	pub async fn open(config: &StoreConfig) -> Result<Self> {
		let store = match config {
			StoreConfig::File { path } => Self::from_file(path).await?,
			StoreConfig::Sqlite { url, max_connections } => {
				Self::from_sqlite_pool(create_sqlite_pool(url, *max_connections).await?)
			}
			StoreConfig::Postgres {
				url,
				max_connections,
				retry,
			} => {
				let pool = create_pg_pool(url, *max_connections, Duration::from_secs(PG_ACQUIRE_TIMEOUT_SECS)).await?;
				Self::from_pg_pool(pool, *retry)
			}
		};

		info!(backend = %store.kind(), "store opened");
		Ok(store)
	}

	pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
		Ok(Self::from_backend(Backend::File(FileStore::open(path).await?)))
	}

	pub fn from_sqlite_pool(pool: SqlitePool) -> Self {
		Self::from_backend(Backend::Sqlite(SqliteStore::new(pool)))
	}

	pub fn from_pg_pool(pool: PgPool, retry: RetryPolicy) -> Self {
		Self::from_backend(Backend::Postgres(PostgresStore::new(pool, retry)))
	}

	pub fn kind(&self) -> BackendKind {
		match &self.inner.backend {
			Backend::File(_) => BackendKind::File,
			Backend::Sqlite(_) => BackendKind::Sqlite,
			Backend::Postgres(_) => BackendKind::Postgres,
		}
	}

	/// Creates every known table under the back-end's schema lock.
	#[tracing::instrument(skip(self), fields(backend = %self.kind()))]
	pub async fn migrate(&self) -> Result<()> {
		self.check_open()?;
		match &self.inner.backend {
			Backend::File(store) => store.create_tables(ALL_TABLES).await?,
			Backend::Sqlite(store) => store.create_tables(ALL_TABLES).await?,
			Backend::Postgres(store) => store.create_tables(ALL_TABLES).await?,
		}

		let mut ensured = self.inner.ensured.lock().await;
		ensured.extend(ALL_TABLES.iter().map(|t| t.to_string()));
		info!(tables = ALL_TABLES.len(), "schema migrated");
		Ok(())
	}

	#[tracing::instrument(skip(self, value), fields(%table, %key))]
	pub async fn insert(&self, table: &str, key: &str, value: impl Into<String>) -> Result<()> {
		self
			.apply(vec![WriteOp::Put {
				table: table.to_string(),
				key: key.to_string(),
				value: value.into(),
			}])
			.await
	}

	#[tracing::instrument(skip(self), fields(%table, %key))]
	pub async fn delete(&self, table: &str, key: &str) -> Result<()> {
		self
			.apply(vec![WriteOp::Delete {
				table: table.to_string(),
				key: key.to_string(),
			}])
			.await
	}

	#[tracing::instrument(skip(self), fields(%table))]
	pub async fn delete_all(&self, table: &str) -> Result<()> {
		self
			.apply(vec![WriteOp::Clear {
				table: table.to_string(),
			}])
			.await
	}

	/// Returns the value stored under `key`, or `DbError::NotFound`.
	pub async fn fetch(&self, table: &str, key: &str) -> Result<String> {
		self.check_open()?;
		validate_table(table)?;
		self.ensure_table(table).await?;

		let value = match &self.inner.backend {
			Backend::File(store) => store.fetch(table, key).await,
			Backend::Sqlite(store) => store.fetch(table, key).await?,
			Backend::Postgres(store) => store.fetch(table, key).await?,
		};

		value.ok_or_else(|| DbError::not_found(table, key))
	}

	/// Returns every row of `table`, or `DbError::Empty` when it has none.
	pub async fn fetch_all(&self, table: &str) -> Result<BTreeMap<String, String>> {
		let rows = self.fetch_all_or_empty(table).await?;
		if rows.is_empty() {
			return Err(DbError::empty(table));
		}
		Ok(rows)
	}

	pub(crate) async fn fetch_all_or_empty(&self, table: &str) -> Result<BTreeMap<String, String>> {
		self.check_open()?;
		validate_table(table)?;
		self.ensure_table(table).await?;

		match &self.inner.backend {
			Backend::File(store) => Ok(store.fetch_all(table).await),
			Backend::Sqlite(store) => store.fetch_all(table).await,
			Backend::Postgres(store) => store.fetch_all(table).await,
		}
	}

	pub fn begin(&self) -> Transaction {
		Transaction::new(self.clone())
	}

	/// Runs `f` against a fresh transaction and commits it if `f` succeeds.
	///
	/// An error from `f`, a failed commit, or a panic inside `f` leaves the
	/// store untouched.
	pub async fn with_tx<T, E, F>(&self, f: F) -> std::result::Result<T, E>
	where
		F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, std::result::Result<T, E>>,
		E: From<DbError>,
	{
		let mut tx = self.begin();
		match f(&mut tx).await {
			Ok(value) => {
				tx.commit().await?;
				Ok(value)
			}
			Err(e) => {
				tx.rollback();
				Err(e)
			}
		}
	}

	#[tracing::instrument(skip(self), fields(backend = %self.kind()))]
	pub async fn close(&self) {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		match &self.inner.backend {
			Backend::File(_) => {}
			Backend::Sqlite(store) => store.close().await,
			Backend::Postgres(store) => store.close().await,
		}
		info!("store closed");
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	/// Applies `ops` as one atomic batch, holding the write lock of every
	/// table involved (acquired in name order).
	pub(crate) async fn apply(&self, ops: Vec<WriteOp>) -> Result<()> {
		self.check_open()?;
		if ops.is_empty() {
			return Ok(());
		}

		let tables: BTreeSet<String> = ops.iter().map(|op| op.table().to_string()).collect();
		for table in &tables {
			validate_table(table)?;
			self.ensure_table(table).await?;
		}

		let _guards = self.lock_tables(&tables).await;
		match &self.inner.backend {
			Backend::File(store) => store.apply(&ops).await?,
			Backend::Sqlite(store) => store.apply(&ops).await?,
			Backend::Postgres(store) => store.apply(&ops).await?,
		}

		debug!(ops = ops.len(), tables = tables.len(), "write batch applied");
		Ok(())
	}

	async fn lock_tables(&self, tables: &BTreeSet<String>) -> Vec<OwnedMutexGuard<()>> {
		let locks: Vec<Arc<Mutex<()>>> = {
			let mut map = self.inner.table_locks.lock().await;
			tables
				.iter()
				.map(|t| map.entry(t.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone())
				.collect()
		};

		let mut guards = Vec::with_capacity(locks.len());
		for lock in locks {
			guards.push(lock.lock_owned().await);
		}
		guards
	}

	async fn ensure_table(&self, table: &str) -> Result<()> {
		if matches!(self.inner.backend, Backend::File(_)) {
			return Ok(());
		}

		let mut ensured = self.inner.ensured.lock().await;
		if ensured.contains(table) {
			return Ok(());
		}

		match &self.inner.backend {
			Backend::File(_) => {}
			Backend::Sqlite(store) => store.ensure_table(table).await?,
			Backend::Postgres(store) => store.ensure_table(table).await?,
		}
		ensured.insert(table.to_string());
		Ok(())
	}

	fn check_open(&self) -> Result<()> {
		if self.is_closed() {
			return Err(DbError::Unavailable("store is closed".to_string()));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tables::{HOSTS, NODES};
	use crate::testing::{file_store, sqlite_memory_store};
	use futures::FutureExt;

	async fn exercise_contract(store: &KvStore) {
		assert!(store.fetch(HOSTS, "a").await.unwrap_err().is_not_found());
		assert!(crate::error::is_empty(&store.fetch_all(HOSTS).await.unwrap_err()));

		store.insert(HOSTS, "a", "1").await.unwrap();
		store.insert(HOSTS, "a", "2").await.unwrap();
		store.insert(HOSTS, "b", "3").await.unwrap();
		assert_eq!(store.fetch(HOSTS, "a").await.unwrap(), "2");

		let all = store.fetch_all(HOSTS).await.unwrap();
		assert_eq!(all.len(), 2);
		assert_eq!(all.get("b").map(String::as_str), Some("3"));

		store.delete(HOSTS, "a").await.unwrap();
		store.delete(HOSTS, "missing").await.unwrap();
		assert!(store.fetch(HOSTS, "a").await.unwrap_err().is_not_found());

		store.delete_all(HOSTS).await.unwrap();
		assert!(store.fetch_all(HOSTS).await.unwrap_err().is_absent());
	}

	#[tokio::test]
	async fn sqlite_honours_contract() {
		let store = sqlite_memory_store().await;
		exercise_contract(&store).await;
	}

	#[tokio::test]
	async fn file_honours_contract() {
		let (store, _dir) = file_store().await;
		exercise_contract(&store).await;
	}

	#[tokio::test]
	async fn invalid_table_is_rejected_before_reaching_sql() {
		let store = sqlite_memory_store().await;
		let err = store.insert("x; DROP TABLE nodes", "k", "v").await.unwrap_err();
		assert!(matches!(err, DbError::InvalidTable(_)));
	}

	#[tokio::test]
	async fn closed_store_is_unavailable() {
		let (store, _dir) = file_store().await;
		store.close().await;
		assert!(matches!(store.fetch(NODES, "x").await, Err(DbError::Unavailable(_))));
		assert!(matches!(store.insert(NODES, "x", "y").await, Err(DbError::Unavailable(_))));
	}

	#[tokio::test]
	async fn with_tx_commits_on_success() {
		let store = sqlite_memory_store().await;

		store
			.with_tx(|tx| {
				async move {
					tx.insert(NODES, "n1", "v1")?;
					tx.insert(HOSTS, "h1", "v2")?;
					Ok::<_, DbError>(())
				}
				.boxed()
			})
			.await
			.unwrap();

		assert_eq!(store.fetch(NODES, "n1").await.unwrap(), "v1");
		assert_eq!(store.fetch(HOSTS, "h1").await.unwrap(), "v2");
	}

	#[tokio::test]
	async fn with_tx_rolls_back_on_error() {
		let (store, _dir) = file_store().await;
		store.insert(NODES, "keep", "v").await.unwrap();

		let result = store
			.with_tx(|tx| {
				async move {
					tx.insert(NODES, "n1", "v1")?;
					tx.delete(NODES, "keep")?;
					Err::<(), _>(DbError::Internal("abort".into()))
				}
				.boxed()
			})
			.await;

		assert!(result.is_err());
		assert!(store.fetch(NODES, "n1").await.unwrap_err().is_not_found());
		assert_eq!(store.fetch(NODES, "keep").await.unwrap(), "v");
	}

	#[tokio::test]
	async fn with_tx_rolls_back_on_panic() {
		let store = sqlite_memory_store().await;
		let handle = {
			let store = store.clone();
			tokio::spawn(async move {
				store
					.with_tx(|tx| {
						async move {
							tx.insert(NODES, "n1", "v1")?;
							if tx.staged_len() > 0 {
								panic!("boom");
							}
							Ok::<_, DbError>(())
						}
						.boxed()
					})
					.await
			})
		};

		assert!(handle.await.is_err());
		assert!(store.fetch(NODES, "n1").await.unwrap_err().is_not_found());
	}

	#[tokio::test]
	async fn migrate_is_idempotent() {
		let store = sqlite_memory_store().await;
		store.migrate().await.unwrap();
		store.migrate().await.unwrap();
		assert!(store.fetch_all(NODES).await.unwrap_err().is_absent());
	}

	#[tokio::test]
	async fn concurrent_writers_to_one_table_all_land() {
		let (store, _dir) = file_store().await;

		let mut handles = Vec::new();
		for i in 0..16 {
			let store = store.clone();
			handles.push(tokio::spawn(async move {
				store.insert(NODES, &format!("k{i}"), format!("{i}")).await
			}));
		}
		for handle in handles {
			handle.await.unwrap().unwrap();
		}

		assert_eq!(store.fetch_all(NODES).await.unwrap().len(), 16);
	}
}
