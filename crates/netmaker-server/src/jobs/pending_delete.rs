// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Finalizes pending-delete nodes once their grace window has elapsed,
//! releasing their addresses.

use async_trait::async_trait;
use chrono::Utc;
use netmaker_server_overlay::OverlayService;
use tracing::instrument;

use super::{Job, JobContext, JobError, JobOutput};

pub struct PendingDeleteFinalizerJob {
	overlay: OverlayService,
}

impl PendingDeleteFinalizerJob {
	pub fn new(overlay: OverlayService) -> Self {
		Self { overlay }
	}
}

#[async_trait]
impl Job for PendingDeleteFinalizerJob {
	fn id(&self) -> &str {
		"pending-delete-finalizer"
	}

	fn name(&self) -> &str {
		"Pending Delete Finalizer"
	}

	#[instrument(skip(self, ctx), fields(job_id = "pending-delete-finalizer", run_id = %ctx.run_id))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.cancellation_token.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let finalized = self.overlay.finalize_pending(Utc::now()).await?;
		Ok(JobOutput {
			message: format!("Finalized {} pending-delete node(s)", finalized.len()),
			affected: finalized.len(),
		})
	}
}
