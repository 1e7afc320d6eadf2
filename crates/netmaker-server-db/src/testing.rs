// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fresh stores for tests.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use tempfile::TempDir;

use crate::store::KvStore;

/// An in-memory SQLite store with every table created.
///
/// The pool is pinned to one connection that never idles out, since each
/// `:memory:` connection is its own database.
pub async fn sqlite_memory_store() -> KvStore {
	let options = SqliteConnectOptions::from_str(":memory:")
		.unwrap()
		.create_if_missing(true);

	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.idle_timeout(None)
		.max_lifetime(None)
		.connect_with(options)
		.await
		.expect("Failed to create test pool");

	let store = KvStore::from_sqlite_pool(pool);
	store.migrate().await.unwrap();
	store
}

/// A file-backed store inside a temporary directory. Keep the `TempDir`
/// alive for as long as the store is used.
pub async fn file_store() -> (KvStore, TempDir) {
	let dir = TempDir::new().unwrap();
	let store = KvStore::from_file(dir.path().join("netmaker.json")).await.unwrap();
	store.migrate().await.unwrap();
	(store, dir)
}
