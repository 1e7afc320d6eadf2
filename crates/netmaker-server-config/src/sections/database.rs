// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database configuration.

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_SQLITE_URL: &str = "sqlite:./netmaker.db";
const DEFAULT_FILE_PATH: &str = "./netmaker.json";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_RETRY_DEADLINE_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
	File,
	#[default]
	Sqlite,
	Postgres,
}

impl FromStr for DatabaseBackend {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"file" => Ok(Self::File),
			"sqlite" => Ok(Self::Sqlite),
			"postgres" | "postgresql" => Ok(Self::Postgres),
			other => Err(format!("unknown database backend '{other}'")),
		}
	}
}

impl fmt::Display for DatabaseBackend {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::File => write!(f, "file"),
			Self::Sqlite => write!(f, "sqlite"),
			Self::Postgres => write!(f, "postgres"),
		}
	}
}

/// Database configuration (runtime, fully resolved).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
	pub backend: DatabaseBackend,
	/// Connection URL for the SQL back-ends.
	pub url: String,
	/// Document path for the file back-end.
	pub path: PathBuf,
	pub max_connections: u32,
	pub retry_deadline_secs: u64,
}

impl Default for DatabaseConfig {
	fn default() -> Self {
		DatabaseConfigLayer::default().finalize()
	}
}

/// Database configuration layer (partial, for merging).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfigLayer {
	#[serde(default)]
	pub backend: Option<DatabaseBackend>,
	#[serde(default)]
	pub url: Option<String>,
	#[serde(default)]
	pub path: Option<PathBuf>,
	#[serde(default)]
	pub max_connections: Option<u32>,
	#[serde(default)]
	pub retry_deadline_secs: Option<u64>,
}

impl DatabaseConfigLayer {
	pub fn merge(&mut self, other: DatabaseConfigLayer) {
		if other.backend.is_some() {
			self.backend = other.backend;
		}
		if other.url.is_some() {
			self.url = other.url;
		}
		if other.path.is_some() {
			self.path = other.path;
		}
		if other.max_connections.is_some() {
			self.max_connections = other.max_connections;
		}
		if other.retry_deadline_secs.is_some() {
			self.retry_deadline_secs = other.retry_deadline_secs;
		}
	}

	pub fn finalize(self) -> DatabaseConfig {
		DatabaseConfig {
			backend: self.backend.unwrap_or_default(),
			url: self.url.unwrap_or_else(|| DEFAULT_SQLITE_URL.to_string()),
			path: self.path.unwrap_or_else(|| PathBuf::from(DEFAULT_FILE_PATH)),
			max_connections: self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
			retry_deadline_secs: self.retry_deadline_secs.unwrap_or(DEFAULT_RETRY_DEADLINE_SECS),
		}
	}
}
