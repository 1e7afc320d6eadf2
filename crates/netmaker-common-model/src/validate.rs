// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::{Result, ValidationError};

pub const MIN_PORT: u16 = 1024;
pub const MAX_PORT: u16 = 65535;
pub const MIN_KEEPALIVE_SECS: u16 = 1;
pub const MAX_KEEPALIVE_SECS: u16 = 1000;
pub const MIN_MTU: u16 = 1280;
pub const MAX_MTU: u16 = 9000;

fn in_range(field: &'static str, value: u16, min: u16, max: u16) -> Result<()> {
	if (min..=max).contains(&value) {
		Ok(())
	} else {
		Err(ValidationError::OutOfRange {
			field,
			value: value.into(),
			min: min.into(),
			max: max.into(),
		})
	}
}

pub fn port(field: &'static str, value: u16) -> Result<()> {
	in_range(field, value, MIN_PORT, MAX_PORT)
}

pub fn keepalive(field: &'static str, value: u16) -> Result<()> {
	in_range(field, value, MIN_KEEPALIVE_SECS, MAX_KEEPALIVE_SECS)
}

pub fn mtu(field: &'static str, value: u16) -> Result<()> {
	in_range(field, value, MIN_MTU, MAX_MTU)
}

pub fn name(field: &'static str, value: &str, max_len: usize) -> Result<()> {
	if value.trim().is_empty() {
		return Err(ValidationError::invalid(field, "must not be empty"));
	}
	if value.len() > max_len {
		return Err(ValidationError::invalid(field, format!("longer than {max_len} bytes")));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn port_bounds() {
		assert!(port("listen_port", 1023).is_err());
		assert!(port("listen_port", 1024).is_ok());
		assert!(port("listen_port", 65535).is_ok());
	}

	#[test]
	fn keepalive_bounds() {
		assert!(keepalive("keepalive", 0).is_err());
		assert!(keepalive("keepalive", 1).is_ok());
		assert!(keepalive("keepalive", 1000).is_ok());
		assert!(keepalive("keepalive", 1001).is_err());
	}

	#[test]
	fn out_of_range_message_names_field() {
		let err = mtu("mtu", 100).unwrap_err();
		assert_eq!(err.to_string(), "mtu out of range: 100 (expected 1280..=9000)");
	}
}
