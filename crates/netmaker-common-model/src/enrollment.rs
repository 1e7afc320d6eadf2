// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Result, ValidationError};
use crate::ids::NetId;
use crate::schema_version;

pub const TOKEN_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentKeyKind {
	Undefined,
	TimeExpiration,
	Uses,
	Unlimited,
}

/// A join token. Its kind is derived from the other fields, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentKey {
	#[serde(default = "schema_version")]
	pub schema_version: u32,
	pub token: String,
	pub networks: BTreeSet<NetId>,
	#[serde(default)]
	pub expiration: Option<DateTime<Utc>>,
	/// Zero means the key is not use-limited.
	#[serde(default)]
	pub max_uses: u32,
	#[serde(default)]
	pub uses_remaining: u32,
	#[serde(default)]
	pub unlimited: bool,
	#[serde(default)]
	pub tags: BTreeSet<String>,
	pub created_at: DateTime<Utc>,
}

pub fn generate_token() -> String {
	rand::thread_rng()
		.sample_iter(&Alphanumeric)
		.take(TOKEN_LEN)
		.map(char::from)
		.collect()
}

impl EnrollmentKey {
	pub fn new(
		networks: BTreeSet<NetId>,
		expiration: Option<DateTime<Utc>>,
		uses: u32,
		unlimited: bool,
		tags: BTreeSet<String>,
	) -> Self {
		Self {
			schema_version: schema_version(),
			token: generate_token(),
			networks,
			expiration,
			max_uses: uses,
			uses_remaining: uses,
			unlimited,
			tags,
			created_at: Utc::now(),
		}
	}

	pub fn kind(&self) -> EnrollmentKeyKind {
		if self.unlimited {
			EnrollmentKeyKind::Unlimited
		} else if self.max_uses > 0 {
			EnrollmentKeyKind::Uses
		} else if self.expiration.is_some() {
			EnrollmentKeyKind::TimeExpiration
		} else {
			EnrollmentKeyKind::Undefined
		}
	}

	pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
		let not_expired = self.expiration.map_or(true, |exp| now < exp);
		match self.kind() {
			EnrollmentKeyKind::Unlimited => true,
			EnrollmentKeyKind::Uses => self.uses_remaining > 0 && not_expired,
			EnrollmentKeyKind::TimeExpiration => not_expired,
			EnrollmentKeyKind::Undefined => false,
		}
	}

	/// Spends one use of a use-limited key.
	pub fn consume(&mut self) {
		if self.kind() == EnrollmentKeyKind::Uses {
			self.uses_remaining = self.uses_remaining.saturating_sub(1);
		}
	}

	pub fn validate(&self) -> Result<()> {
		if self.token.len() != TOKEN_LEN || !self.token.chars().all(|c| c.is_ascii_alphanumeric()) {
			return Err(ValidationError::invalid("token", "must be 32 alphanumeric characters"));
		}
		if self.networks.is_empty() {
			return Err(ValidationError::invalid("networks", "at least one network is required"));
		}
		if self.kind() == EnrollmentKeyKind::Undefined {
			return Err(ValidationError::invalid(
				"enrollment_key",
				"needs an expiration, a use count, or the unlimited flag",
			));
		}
		Ok(())
	}
}
