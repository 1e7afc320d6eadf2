// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Deserialize;

use crate::sections::{
	BrokerConfigLayer, DatabaseConfigLayer, FailoverConfigLayer, LoggingConfigLayer, NodesConfigLayer,
	OperationsConfigLayer, StunConfigLayer,
};

/// One source's view of the configuration. Absent sections and fields
/// leave lower-precedence values in place.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfigLayer {
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub broker: Option<BrokerConfigLayer>,
	#[serde(default)]
	pub stun: Option<StunConfigLayer>,
	#[serde(default)]
	pub nodes: Option<NodesConfigLayer>,
	#[serde(default)]
	pub failover: Option<FailoverConfigLayer>,
	#[serde(default)]
	pub operations: Option<OperationsConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

fn merge_section<T>(base: &mut Option<T>, other: Option<T>, merge: impl FnOnce(&mut T, T)) {
	match (base.as_mut(), other) {
		(Some(current), Some(next)) => merge(current, next),
		(None, Some(next)) => *base = Some(next),
		(_, None) => {}
	}
}

impl ServerConfigLayer {
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_section(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_section(&mut self.broker, other.broker, BrokerConfigLayer::merge);
		merge_section(&mut self.stun, other.stun, StunConfigLayer::merge);
		merge_section(&mut self.nodes, other.nodes, NodesConfigLayer::merge);
		merge_section(&mut self.failover, other.failover, FailoverConfigLayer::merge);
		merge_section(&mut self.operations, other.operations, OperationsConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}
