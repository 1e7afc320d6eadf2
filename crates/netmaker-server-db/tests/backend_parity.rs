// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use futures::FutureExt;
use netmaker_server_db::tables::{EXT_CLIENTS, NETWORKS, NODES};
use netmaker_server_db::{DbError, KvStore, StoreConfig};
use std::collections::BTreeMap;
use tempfile::TempDir;

async fn run_script(store: &KvStore) -> BTreeMap<String, BTreeMap<String, String>> {
	store.insert(NETWORKS, "net1", r#"{"net_id":"net1"}"#).await.unwrap();
	store.insert(NODES, "n1", "one").await.unwrap();
	store.insert(NODES, "n2", "two").await.unwrap();
	store.insert(EXT_CLIENTS, "net1:phone", "p").await.unwrap();

	store
		.with_tx(|tx| {
			async move {
				tx.delete(NODES, "n1")?;
				tx.insert(NODES, "n3", "three")?;
				tx.insert(NETWORKS, "net1", r#"{"net_id":"net1","v":2}"#)?;
				Ok::<_, DbError>(())
			}
			.boxed()
		})
		.await
		.unwrap();

	let _ = store
		.with_tx(|tx| {
			async move {
				tx.delete_all(EXT_CLIENTS)?;
				Err::<(), _>(DbError::Internal("rolled back".into()))
			}
			.boxed()
		})
		.await;

	let mut snapshot = BTreeMap::new();
	for table in [NETWORKS, NODES, EXT_CLIENTS] {
		snapshot.insert(table.to_string(), store.fetch_all(table).await.unwrap());
	}
	snapshot
}

#[tokio::test]
async fn file_and_sqlite_agree() {
	let dir = TempDir::new().unwrap();
	let sqlite = KvStore::open(&StoreConfig::Sqlite {
		url: format!("sqlite:{}", dir.path().join("netmaker.db").display()),
		max_connections: 1,
	})
	.await
	.unwrap();
	sqlite.migrate().await.unwrap();
	let file = KvStore::open(&StoreConfig::File {
		path: dir.path().join("netmaker.json"),
	})
	.await
	.unwrap();
	file.migrate().await.unwrap();

	let from_sqlite = run_script(&sqlite).await;
	let from_file = run_script(&file).await;

	assert_eq!(from_sqlite, from_file);
	assert_eq!(from_file[NODES].keys().cloned().collect::<Vec<_>>(), vec!["n2", "n3"]);
	assert_eq!(from_file[EXT_CLIENTS].len(), 1);
}

#[tokio::test]
async fn sqlite_file_persists_across_reopen() {
	let dir = TempDir::new().unwrap();
	let url = format!("sqlite:{}", dir.path().join("netmaker.db").display());
	let config = StoreConfig::Sqlite {
		url,
		max_connections: 4,
	};

	let store = KvStore::open(&config).await.unwrap();
	store.migrate().await.unwrap();
	store.insert(NODES, "n1", "persisted").await.unwrap();
	store.close().await;

	let reopened = KvStore::open(&config).await.unwrap();
	assert_eq!(reopened.fetch(NODES, "n1").await.unwrap(), "persisted");
	reopened.close().await;
}

#[tokio::test]
async fn file_store_persists_across_reopen() {
	let dir = TempDir::new().unwrap();
	let config = StoreConfig::File {
		path: dir.path().join("netmaker.json"),
	};

	let store = KvStore::open(&config).await.unwrap();
	store.insert(NETWORKS, "net1", "v").await.unwrap();
	store.close().await;

	let reopened = KvStore::open(&config).await.unwrap();
	assert_eq!(reopened.fetch(NETWORKS, "net1").await.unwrap(), "v");
}
