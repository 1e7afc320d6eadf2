// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ValidationError;

macro_rules! uuid_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(Uuid);

		impl $name {
			pub fn new() -> Self {
				Self(Uuid::new_v4())
			}

			pub fn from_uuid(uuid: Uuid) -> Self {
				Self(uuid)
			}

			pub fn as_uuid(&self) -> &Uuid {
				&self.0
			}
		}

		impl Default for $name {
			fn default() -> Self {
				Self::new()
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl std::str::FromStr for $name {
			type Err = uuid::Error;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Ok(Self(s.parse()?))
			}
		}
	};
}

uuid_id!(
	/// Server-assigned host identity, stable across networks.
	HostId
);
uuid_id!(
	/// One host's membership in one network.
	NodeId
);

const MAX_NET_ID_LEN: usize = 32;
const MAX_EXT_CLIENT_ID_LEN: usize = 64;

/// DNS-safe network identifier: 1-32 of `[a-z0-9-]`, no leading or
/// trailing hyphen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetId(String);

impl NetId {
	pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
		let value = value.into();
		let reason = if value.is_empty() {
			Some("must not be empty")
		} else if value.len() > MAX_NET_ID_LEN {
			Some("longer than 32 characters")
		} else if !value
			.chars()
			.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
		{
			Some("only lowercase letters, digits and '-' are allowed")
		} else if value.starts_with('-') || value.ends_with('-') {
			Some("must not start or end with '-'")
		} else {
			None
		};

		match reason {
			Some(reason) => Err(ValidationError::NetId { value, reason }),
			None => Ok(Self(value)),
		}
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl TryFrom<String> for NetId {
	type Error = ValidationError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}

impl From<NetId> for String {
	fn from(id: NetId) -> Self {
		id.0
	}
}

impl AsRef<str> for NetId {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for NetId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl std::str::FromStr for NetId {
	type Err = ValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}

/// Operator-chosen ext-client name, unique within a network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExtClientId(String);

impl ExtClientId {
	pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
		let value = value.into();
		let valid = !value.is_empty()
			&& value.len() <= MAX_EXT_CLIENT_ID_LEN
			&& value
				.chars()
				.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

		if valid {
			Ok(Self(value))
		} else {
			Err(ValidationError::ExtClientId(value))
		}
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl TryFrom<String> for ExtClientId {
	type Error = ValidationError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}

impl From<ExtClientId> for String {
	fn from(id: ExtClientId) -> Self {
		id.0
	}
}

impl fmt::Display for ExtClientId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}
