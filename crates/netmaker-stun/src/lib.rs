// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! STUN support for endpoint discovery and NAT classification.

pub mod client;
pub mod error;
pub mod message;
pub mod nat;
pub mod server;

pub use client::{discover_endpoint, observe, probe, resolve_stun_servers, DEFAULT_STUN_SERVERS};
pub use error::{Result, StunError};
pub use nat::{classify, Classified, HostContext, ObservationMap, ObservationRecord};
pub use server::{StunServer, StunServerStats, DEFAULT_STUN_PORT, SOFTWARE};
