// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Table/key/value persistence for the netmaker server.
//!
//! Three interchangeable back-ends sit behind [`KvStore`]:
//! - `file`: one JSON document on disk, flushed atomically per write batch
//! - `sqlite`: an embedded database, one `(key, value)` table per namespace
//! - `postgres`: an external database with bounded retry on connection loss
//!
//! Missing keys and empty tables are reported as [`DbError::NotFound`] and
//! [`DbError::Empty`]; use [`is_empty`] / [`DbError::is_absent`] to tell them
//! apart from real failures.

pub mod error;
pub mod file;
pub mod pool;
pub mod postgres;
pub mod retry;
pub mod sqlite;
pub mod store;
pub mod tables;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tx;

pub use error::{is_empty, DbError, Result};
pub use pool::{create_pg_pool, create_sqlite_pool};
pub use retry::RetryPolicy;
pub use store::{BackendKind, KvStore, StoreConfig, WriteOp};
pub use tx::Transaction;
