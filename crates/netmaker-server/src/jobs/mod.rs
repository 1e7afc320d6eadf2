// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Periodic maintenance jobs.

mod node_expiry;
mod pending_delete;
mod scheduler;

pub use node_expiry::NodeExpiryJob;
pub use pending_delete::PendingDeleteFinalizerJob;
pub use scheduler::{Job, JobContext, JobError, JobOutput, JobScheduler};
