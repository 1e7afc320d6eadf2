// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Netmaker control-plane server.

pub mod app;
pub mod jobs;
pub mod logging;

pub use app::{broker_config, overlay_config, probe_public_endpoint, store_config, App};
pub use logging::init_tracing;
