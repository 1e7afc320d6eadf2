// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StunError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("timeout waiting for STUN response")]
	Timeout,

	#[error("invalid STUN message: {0}")]
	InvalidMessage(&'static str),

	#[error("no STUN servers available")]
	NoServers,

	#[error("failed to resolve STUN server: {0}")]
	Resolution(String),
}

pub type Result<T> = std::result::Result<T, StunError>;
