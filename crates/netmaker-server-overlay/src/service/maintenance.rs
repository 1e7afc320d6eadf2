// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Periodic node lifecycle work.

use chrono::{DateTime, Utc};
use netmaker_common_model::NodeId;
use tracing::{info, warn};

use super::OverlayService;
use crate::error::{ErrorKind, OverlayError, Result};

impl OverlayService {
	/// Moves nodes whose expiration has passed to pending-delete.
	#[tracing::instrument(skip(self))]
	pub async fn expire_nodes(&self, now: DateTime<Utc>) -> Result<Vec<NodeId>> {
		let candidates: Vec<NodeId> = self
			.reader()
			.all_nodes()
			.await?
			.into_iter()
			.filter(|n| n.is_live() && n.is_expired(now))
			.map(|n| n.id)
			.collect();

		let mut expired = Vec::new();
		for node_id in candidates {
			let ctx = self.context();
			match self.mark_node_pending_delete(&ctx, &node_id).await {
				Ok(node) => {
					info!(%node_id, network = %node.network, "node expired");
					expired.push(node_id);
				}
				Err(e) if e.kind() == ErrorKind::NotFound => {}
				Err(e) => warn!(%node_id, error = %e, "failed to expire node"),
			}
		}
		Ok(expired)
	}

	/// Finalizes pending-delete nodes whose grace window has elapsed.
	#[tracing::instrument(skip(self))]
	pub async fn finalize_pending(&self, now: DateTime<Utc>) -> Result<Vec<NodeId>> {
		let grace = chrono::Duration::from_std(self.config.pending_delete_grace)
			.map_err(|e| OverlayError::Internal(format!("pending delete grace out of range: {e}")))?;

		let candidates: Vec<NodeId> = self
			.reader()
			.all_nodes()
			.await?
			.into_iter()
			.filter(|n| n.pending_delete)
			.filter(|n| n.pending_delete_at.map_or(true, |at| at + grace <= now))
			.map(|n| n.id)
			.collect();

		let mut finalized = Vec::new();
		for node_id in candidates {
			let ctx = self.context();
			match self.finalize_node_delete(&ctx, &node_id).await {
				Ok(()) => finalized.push(node_id),
				Err(e) if e.kind() == ErrorKind::NotFound => {}
				Err(e) => warn!(%node_id, error = %e, "failed to finalize node"),
			}
		}
		Ok(finalized)
	}
}
