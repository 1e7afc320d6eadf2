// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netmaker_common_model::HostId;
use netmaker_server_overlay::OverlayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
	#[error("overlay error: {0}")]
	Overlay(#[from] OverlayError),

	#[error("publish to host {host} failed: {reason}")]
	Publish { host: HostId, reason: String },

	#[error("broker is shutting down")]
	ShuttingDown,
}

pub type Result<T> = std::result::Result<T, BrokerError>;
