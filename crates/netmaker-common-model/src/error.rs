// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

/// A field-local rule was violated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
	#[error("invalid network id {value:?}: {reason}")]
	NetId { value: String, reason: &'static str },

	#[error("invalid ext-client id {0:?}")]
	ExtClientId(String),

	#[error("invalid public key: {0}")]
	PublicKey(String),

	#[error("{field} out of range: {value} (expected {min}..={max})")]
	OutOfRange {
		field: &'static str,
		value: i64,
		min: i64,
		max: i64,
	},

	#[error("{field}: {reason}")]
	Invalid { field: &'static str, reason: String },
}

impl ValidationError {
	pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
		Self::Invalid {
			field,
			reason: reason.into(),
		}
	}
}

pub type Result<T> = std::result::Result<T, ValidationError>;
