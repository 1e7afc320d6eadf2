// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod broker;
mod database;
mod failover;
mod logging;
mod nodes;
mod operations;
mod stun;

pub use broker::{BrokerConfig, BrokerConfigLayer};
pub use database::{DatabaseBackend, DatabaseConfig, DatabaseConfigLayer};
pub use failover::{FailoverConfig, FailoverConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use nodes::{NodesConfig, NodesConfigLayer};
pub use operations::{OperationsConfig, OperationsConfigLayer};
pub use stun::{StunConfig, StunConfigLayer};
