// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use ipnet::{Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::error::{Result, ValidationError};
use crate::ids::{NetId, NodeId};
use crate::{schema_version, validate};

pub const DEFAULT_KEEPALIVE_SECS: u16 = 20;
pub const DEFAULT_MTU: u16 = 1420;
pub const DEFAULT_LISTEN_PORT: u16 = 51821;

/// Network-wide ACL policy applied to pairs with no explicit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultAcl {
	#[default]
	Allow,
	Deny,
}

impl DefaultAcl {
	pub fn allows(self) -> bool {
		matches!(self, Self::Allow)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
	#[serde(default = "schema_version")]
	pub schema_version: u32,
	pub net_id: NetId,
	#[serde(default)]
	pub address_range: Option<Ipv4Net>,
	#[serde(default)]
	pub address_range6: Option<Ipv6Net>,
	#[serde(default)]
	pub default_acl: DefaultAcl,
	pub default_keepalive: u16,
	pub default_mtu: u16,
	pub default_listen_port: u16,
	#[serde(default)]
	pub name_servers: Vec<IpAddr>,
	#[serde(default)]
	pub allow_manual_signup: bool,
	/// Nominated fallback relay for automatic failover.
	#[serde(default)]
	pub failover_node: Option<NodeId>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Network {
	/// A network with default keepalive, MTU and port. Host bits in the
	/// ranges are cleared.
	pub fn new(net_id: NetId, address_range: Option<Ipv4Net>, address_range6: Option<Ipv6Net>) -> Self {
		let now = Utc::now();
		Self {
			schema_version: schema_version(),
			net_id,
			address_range: address_range.map(|r| r.trunc()),
			address_range6: address_range6.map(|r| r.trunc()),
			default_acl: DefaultAcl::Allow,
			default_keepalive: DEFAULT_KEEPALIVE_SECS,
			default_mtu: DEFAULT_MTU,
			default_listen_port: DEFAULT_LISTEN_PORT,
			name_servers: Vec::new(),
			allow_manual_signup: false,
			failover_node: None,
			created_at: now,
			updated_at: now,
		}
	}

	pub fn validate(&self) -> Result<()> {
		if self.address_range.is_none() && self.address_range6.is_none() {
			return Err(ValidationError::invalid(
				"address_range",
				"at least one of the IPv4 or IPv6 ranges is required",
			));
		}
		if let Some(range) = self.address_range {
			if range != range.trunc() {
				return Err(ValidationError::invalid("address_range", format!("{range} has host bits set")));
			}
		}
		if let Some(range) = self.address_range6 {
			if range != range.trunc() {
				return Err(ValidationError::invalid("address_range6", format!("{range} has host bits set")));
			}
		}
		validate::port("default_listen_port", self.default_listen_port)?;
		validate::keepalive("default_keepalive", self.default_keepalive)?;
		validate::mtu("default_mtu", self.default_mtu)?;
		Ok(())
	}

	pub fn contains(&self, ip: IpAddr) -> bool {
		match ip {
			IpAddr::V4(v4) => self.address_range.is_some_and(|r| r.contains(&v4)),
			IpAddr::V6(v6) => self.address_range6.is_some_and(|r| r.contains(&v6)),
		}
	}

	pub fn touch(&mut self) {
		self.updated_at = Utc::now();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn net(v4: Option<&str>, v6: Option<&str>) -> Network {
		Network::new(
			NetId::new("net1").unwrap(),
			v4.map(|s| s.parse().unwrap()),
			v6.map(|s| s.parse().unwrap()),
		)
	}

	#[test]
	fn requires_one_range() {
		assert!(net(None, None).validate().is_err());
		assert!(net(Some("10.0.0.0/24"), None).validate().is_ok());
		assert!(net(None, Some("fd00::/64")).validate().is_ok());
	}

	#[test]
	fn new_truncates_host_bits() {
		let n = net(Some("10.0.0.7/24"), None);
		assert_eq!(n.address_range.unwrap().to_string(), "10.0.0.0/24");
	}

	#[test]
	fn rejects_bad_defaults() {
		let mut n = net(Some("10.0.0.0/24"), None);
		n.default_listen_port = 80;
		assert!(n.validate().is_err());

		let mut n = net(Some("10.0.0.0/24"), None);
		n.default_keepalive = 0;
		assert!(n.validate().is_err());
	}

	#[test]
	fn contains_checks_family() {
		let n = net(Some("10.0.0.0/24"), None);
		assert!(n.contains("10.0.0.9".parse().unwrap()));
		assert!(!n.contains("10.0.1.9".parse().unwrap()));
		assert!(!n.contains("fd00::1".parse().unwrap()));
	}
}
