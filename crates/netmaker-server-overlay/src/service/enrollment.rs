// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use netmaker_common_model::{EnrollmentKey, EnrollmentKeyKind, Host, NetId, Node};
use std::collections::BTreeSet;
use tracing::info;

use super::host::stage_create_host;
use super::node::{stage_create_node, NodeOptions};
use super::OverlayService;
use crate::context::OpContext;
use crate::error::{OverlayError, Result};

#[derive(Debug, Clone, Default)]
pub struct EnrollmentKeySpec {
	pub networks: BTreeSet<NetId>,
	pub expiration: Option<DateTime<Utc>>,
	pub uses: u32,
	pub unlimited: bool,
	pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct EnrollOutcome {
	pub host: Host,
	/// One node per network of the key, including ones that already existed.
	pub nodes: Vec<Node>,
}

impl OverlayService {
	#[tracing::instrument(skip(self, ctx, spec), fields(networks = spec.networks.len()))]
	pub async fn create_enrollment_key(&self, ctx: &OpContext, spec: EnrollmentKeySpec) -> Result<EnrollmentKey> {
		let key = EnrollmentKey::new(spec.networks, spec.expiration, spec.uses, spec.unlimited, spec.tags);
		key.validate()?;
		if key.kind() == EnrollmentKeyKind::Undefined {
			return Err(OverlayError::Validation(
				"an enrollment key needs an expiration, a use count or the unlimited flag".to_string(),
			));
		}

		let mut m = self.begin(ctx, "create_enrollment_key", BTreeSet::new()).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				for net in &key.networks {
					tx.network(net).await?;
				}
				tx.put_enrollment_key(&key)?;
				Ok(key)
			})
			.await;
		let key = self.finish(ctx, m, staged).await?;
		info!(kind = ?key.kind(), "enrollment key created");
		Ok(key)
	}

	pub async fn delete_enrollment_key(&self, ctx: &OpContext, token: &str) -> Result<()> {
		let mut m = self.begin(ctx, "delete_enrollment_key", BTreeSet::new()).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				tx.enrollment_key(token).await?;
				tx.delete_enrollment_key(token)
			})
			.await;
		self.finish(ctx, m, staged).await
	}

	pub async fn get_enrollment_key(&self, ctx: &OpContext, token: &str) -> Result<EnrollmentKey> {
		let reader = self.reader();
		ctx.run(reader.enrollment_key(token)).await
	}

	pub async fn list_enrollment_keys(&self, ctx: &OpContext) -> Result<Vec<EnrollmentKey>> {
		let reader = self.reader();
		ctx.run(reader.enrollment_keys()).await
	}

	/// Joins `host` to every network of the key in one transaction.
	///
	/// A host already known by id or public key is reused; networks it is
	/// already part of are left as they are. The key loses one use only when
	/// a node was created.
	#[tracing::instrument(skip(self, ctx, token, host), fields(host_id = %host.id))]
	pub async fn enroll_host(&self, ctx: &OpContext, token: &str, host: Host) -> Result<EnrollOutcome> {
		let nets = {
			let reader = self.reader();
			ctx.run(reader.enrollment_key(token)).await?.networks
		};

		let mut m = self.begin(ctx, "enroll_host", nets).await?;
		let tx = &mut m.tx;
		let staged = ctx
			.run(async {
				let mut key = tx.enrollment_key(token).await?;
				if !key.is_valid(Utc::now()) {
					return Err(OverlayError::Validation("enrollment key is expired or used up".to_string()));
				}

				let known = match tx.host_opt(&host.id).await? {
					Some(h) => Some(h),
					None => tx
						.hosts()
						.await?
						.into_iter()
						.find(|h| h.public_key == host.public_key),
				};
				let host = match known {
					Some(h) => h,
					None => {
						stage_create_host(tx, &host).await?;
						host
					}
				};

				let existing = tx.nodes_of_host(&host.id).await?;
				let mut nodes = Vec::with_capacity(key.networks.len());
				let mut created = 0;
				for net in &key.networks {
					if let Some(node) = existing.iter().find(|n| &n.network == net) {
						nodes.push(node.clone());
						continue;
					}
					let options = NodeOptions {
						tags: key.tags.clone(),
						..Default::default()
					};
					nodes.push(stage_create_node(tx, &host.id, net, options).await?);
					created += 1;
				}

				if created > 0 {
					key.consume();
					tx.put_enrollment_key(&key)?;
				}
				Ok(EnrollOutcome { host, nodes })
			})
			.await;
		let outcome = self.finish(ctx, m, staged).await?;
		info!(nodes = outcome.nodes.len(), "host enrolled");
		Ok(outcome)
	}
}
