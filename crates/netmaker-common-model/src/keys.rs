// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use base64::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::ValidationError;

pub const WG_KEY_LEN: usize = 32;

/// A WireGuard (Curve25519) public key. The server never sees private keys.
///
/// Serialized as standard base64 so it can also be used as a JSON map key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WgPublicKey([u8; WG_KEY_LEN]);

impl WgPublicKey {
	pub fn from_bytes(bytes: [u8; WG_KEY_LEN]) -> Self {
		Self(bytes)
	}

	pub fn as_bytes(&self) -> &[u8; WG_KEY_LEN] {
		&self.0
	}

	pub fn to_base64(&self) -> String {
		BASE64_STANDARD.encode(self.0)
	}

	pub fn from_base64(s: &str) -> Result<Self, ValidationError> {
		let bytes = BASE64_STANDARD
			.decode(s.trim())
			.map_err(|e| ValidationError::PublicKey(e.to_string()))?;
		let bytes: [u8; WG_KEY_LEN] = bytes
			.try_into()
			.map_err(|v: Vec<u8>| ValidationError::PublicKey(format!("expected 32 bytes, got {}", v.len())))?;
		Ok(Self(bytes))
	}
}

impl fmt::Display for WgPublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_base64())
	}
}

impl fmt::Debug for WgPublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "WgPublicKey({})", self.to_base64())
	}
}

impl std::str::FromStr for WgPublicKey {
	type Err = ValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::from_base64(s)
	}
}

impl Serialize for WgPublicKey {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_base64())
	}
}

impl<'de> Deserialize<'de> for WgPublicKey {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		Self::from_base64(&s).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeMap;

	#[test]
	fn base64_roundtrip() {
		let key = WgPublicKey::from_bytes([7u8; 32]);
		let parsed: WgPublicKey = key.to_base64().parse().unwrap();
		assert_eq!(key, parsed);
	}

	#[test]
	fn rejects_wrong_length() {
		let short = BASE64_STANDARD.encode([1u8; 16]);
		assert!(WgPublicKey::from_base64(&short).is_err());
		assert!(WgPublicKey::from_base64("not base64!").is_err());
	}

	#[test]
	fn usable_as_json_map_key() {
		let mut map = BTreeMap::new();
		map.insert(WgPublicKey::from_bytes([1u8; 32]), 5u32);

		let json = serde_json::to_string(&map).unwrap();
		let back: BTreeMap<WgPublicKey, u32> = serde_json::from_str(&json).unwrap();
		assert_eq!(map, back);
	}
}
