// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Moves nodes whose expiration has passed to pending-delete.

use async_trait::async_trait;
use chrono::Utc;
use netmaker_server_overlay::OverlayService;
use tracing::instrument;

use super::{Job, JobContext, JobError, JobOutput};

pub struct NodeExpiryJob {
	overlay: OverlayService,
}

impl NodeExpiryJob {
	pub fn new(overlay: OverlayService) -> Self {
		Self { overlay }
	}
}

#[async_trait]
impl Job for NodeExpiryJob {
	fn id(&self) -> &str {
		"node-expiry"
	}

	fn name(&self) -> &str {
		"Node Expiry"
	}

	#[instrument(skip(self, ctx), fields(job_id = "node-expiry", run_id = %ctx.run_id))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.cancellation_token.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let expired = self.overlay.expire_nodes(Utc::now()).await?;
		Ok(JobOutput {
			message: format!("Moved {} expired node(s) to pending delete", expired.len()),
			affected: expired.len(),
		})
	}
}
