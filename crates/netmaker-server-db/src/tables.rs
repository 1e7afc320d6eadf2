// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Table names and composite key helpers.
//!
//! Table names end up interpolated into SQL, so every name that reaches a
//! back-end goes through [`validate_table`] first.

use crate::error::{DbError, Result};

pub const NETWORKS: &str = "networks";
pub const HOSTS: &str = "hosts";
pub const NODES: &str = "nodes";
pub const EXT_CLIENTS: &str = "ext_clients";
pub const ACLS: &str = "acls";
pub const ENROLLMENT_KEYS: &str = "enrollment_keys";
pub const RELAY_STATE: &str = "relay_state";

/// Every table the server uses, created by `KvStore::migrate`.
pub const ALL_TABLES: &[&str] = &[
	NETWORKS,
	HOSTS,
	NODES,
	EXT_CLIENTS,
	ACLS,
	ENROLLMENT_KEYS,
	RELAY_STATE,
];

const MAX_TABLE_NAME_LEN: usize = 63;

pub fn validate_table(name: &str) -> Result<()> {
	let mut chars = name.chars();
	let valid_first = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
	let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

	if valid_first && valid_rest && name.len() <= MAX_TABLE_NAME_LEN {
		Ok(())
	} else {
		Err(DbError::InvalidTable(name.to_string()))
	}
}

/// `ext_clients/{network}:{client_id}`
pub fn ext_client_key(network: &str, client_id: &str) -> String {
	format!("{network}:{client_id}")
}

/// `relay_state/{netid}:{nodeid}`
pub fn relay_state_key(network: &str, node_id: &str) -> String {
	format!("{network}:{node_id}")
}

/// Prefix shared by every composite key scoped to `network`.
pub fn network_prefix(network: &str) -> String {
	format!("{network}:")
}
