// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Embedded single-file back-end.
//!
//! The whole store lives in one JSON document mapping table → key → value.
//! Reads are served from memory; every write batch is applied to a copy,
//! flushed to disk through a temporary file and rename, and only then
//! swapped in. A failed flush leaves both the file and memory untouched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::Result;
use crate::store::WriteOp;

type Tables = BTreeMap<String, BTreeMap<String, String>>;

pub struct FileStore {
	path: PathBuf,
	data: RwLock<Tables>,
	writer: Mutex<()>,
}

impl FileStore {
	#[tracing::instrument(skip(path))]
	pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref().to_path_buf();

		let data = match tokio::fs::read(&path).await {
			Ok(bytes) if bytes.is_empty() => Tables::new(),
			Ok(bytes) => serde_json::from_slice(&bytes)?,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
					tokio::fs::create_dir_all(parent).await?;
				}
				Tables::new()
			}
			Err(e) => return Err(e.into()),
		};

		debug!(path = %path.display(), tables = data.len(), "file store opened");
		Ok(Self {
			path,
			data: RwLock::new(data),
			writer: Mutex::new(()),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub async fn fetch(&self, table: &str, key: &str) -> Option<String> {
		let data = self.data.read().await;
		data.get(table).and_then(|rows| rows.get(key)).cloned()
	}

	pub async fn fetch_all(&self, table: &str) -> BTreeMap<String, String> {
		let data = self.data.read().await;
		data.get(table).cloned().unwrap_or_default()
	}

	pub async fn create_tables(&self, tables: &[&str]) -> Result<()> {
		let _writer = self.writer.lock().await;
		let missing: Vec<&str> = {
			let data = self.data.read().await;
			tables.iter().copied().filter(|t| !data.contains_key(*t)).collect()
		};
		if missing.is_empty() {
			return Ok(());
		}

		let mut next = self.data.read().await.clone();
		for table in missing {
			next.entry(table.to_string()).or_default();
		}
		self.flush(&next).await?;
		*self.data.write().await = next;
		Ok(())
	}

	/// Applies `ops` atomically. The process-wide writer lock is held for the
	/// whole copy/flush/swap sequence.
	pub async fn apply(&self, ops: &[WriteOp]) -> Result<()> {
		if ops.is_empty() {
			return Ok(());
		}

		let _writer = self.writer.lock().await;
		let mut next = self.data.read().await.clone();

		for op in ops {
			match op {
				WriteOp::Put { table, key, value } => {
					next
						.entry(table.clone())
						.or_default()
						.insert(key.clone(), value.clone());
				}
				WriteOp::Delete { table, key } => {
					if let Some(rows) = next.get_mut(table) {
						rows.remove(key);
					}
				}
				WriteOp::Clear { table } => {
					if let Some(rows) = next.get_mut(table) {
						rows.clear();
					}
				}
			}
		}

		self.flush(&next).await?;
		*self.data.write().await = next;
		Ok(())
	}

	async fn flush(&self, tables: &Tables) -> Result<()> {
		let bytes = serde_json::to_vec(tables)?;
		let tmp = self.path.with_extension("tmp");

		let mut file = tokio::fs::File::create(&tmp).await?;
		file.write_all(&bytes).await?;
		file.sync_all().await?;
		drop(file);

		tokio::fs::rename(&tmp, &self.path).await?;
		debug!(bytes = bytes.len(), "file store flushed");
		Ok(())
	}
}
