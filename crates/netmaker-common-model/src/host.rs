// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::Result;
use crate::ids::HostId;
use crate::keys::WgPublicKey;
use crate::network::DEFAULT_LISTEN_PORT;
use crate::{schema_version, validate};

const MAX_HOST_NAME_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NatType {
	#[default]
	Unknown,
	Public,
	Symmetric,
	RestrictedCone,
	PortRestrictedCone,
	FullCone,
}

impl NatType {
	pub fn is_symmetric(self) -> bool {
		matches!(self, Self::Symmetric)
	}
}

/// A machine running the agent. Network-agnostic; joins networks through
/// nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
	#[serde(default = "schema_version")]
	pub schema_version: u32,
	pub id: HostId,
	pub name: String,
	#[serde(default)]
	pub os: String,
	pub public_key: WgPublicKey,
	#[serde(default)]
	pub mac_address: Option<String>,
	#[serde(default)]
	pub endpoint_ip: Option<Ipv4Addr>,
	#[serde(default)]
	pub endpoint_ipv6: Option<Ipv6Addr>,
	/// Endpoint was set by an operator and is not overwritten by check-ins.
	#[serde(default)]
	pub is_static: bool,
	pub listen_port: u16,
	/// Port observed from outside the NAT, latest wins.
	#[serde(default)]
	pub public_listen_port: Option<u16>,
	#[serde(default)]
	pub mtu: Option<u16>,
	#[serde(default)]
	pub persistent_keepalive: Option<u16>,
	#[serde(default)]
	pub nat_type: NatType,
	#[serde(default)]
	pub turn_endpoint: Option<SocketAddr>,
	#[serde(default)]
	pub is_static_port: bool,
	#[serde(default)]
	pub is_default: bool,
	#[serde(default)]
	pub last_checkin: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
}

impl Host {
	pub fn new(name: impl Into<String>, public_key: WgPublicKey) -> Self {
		Self {
			schema_version: schema_version(),
			id: HostId::new(),
			name: name.into(),
			os: String::new(),
			public_key,
			mac_address: None,
			endpoint_ip: None,
			endpoint_ipv6: None,
			is_static: false,
			listen_port: DEFAULT_LISTEN_PORT,
			public_listen_port: None,
			mtu: None,
			persistent_keepalive: None,
			nat_type: NatType::Unknown,
			turn_endpoint: None,
			is_static_port: false,
			is_default: false,
			last_checkin: None,
			created_at: Utc::now(),
		}
	}

	pub fn validate(&self) -> Result<()> {
		validate::name("name", &self.name, MAX_HOST_NAME_LEN)?;
		validate::port("listen_port", self.listen_port)?;
		if let Some(port) = self.public_listen_port {
			validate::port("public_listen_port", port)?;
		}
		if let Some(mtu) = self.mtu {
			validate::mtu("mtu", mtu)?;
		}
		if let Some(keepalive) = self.persistent_keepalive {
			validate::keepalive("persistent_keepalive", keepalive)?;
		}
		Ok(())
	}

	/// The port peers should dial: the declared port when pinned, otherwise
	/// the latest observed public port.
	pub fn advertised_port(&self) -> u16 {
		if self.is_static_port {
			self.listen_port
		} else {
			self.public_listen_port.unwrap_or(self.listen_port)
		}
	}

	/// Public endpoint, preferring IPv4.
	pub fn public_endpoint(&self) -> Option<SocketAddr> {
		let ip = self
			.endpoint_ip
			.map(IpAddr::V4)
			.or(self.endpoint_ipv6.map(IpAddr::V6))?;
		Some(SocketAddr::new(ip, self.advertised_port()))
	}

	/// Two hosts behind the same public address share an L3 domain.
	pub fn shares_public_ip_with(&self, other: &Host) -> bool {
		match (self.endpoint_ip, other.endpoint_ip) {
			(Some(a), Some(b)) => a == b,
			_ => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn host() -> Host {
		Host::new("laptop", WgPublicKey::from_bytes([1u8; 32]))
	}

	#[test]
	fn advertised_port_prefers_observed_unless_static() {
		let mut h = host();
		h.listen_port = 51821;
		assert_eq!(h.advertised_port(), 51821);

		h.public_listen_port = Some(40000);
		assert_eq!(h.advertised_port(), 40000);

		h.is_static_port = true;
		assert_eq!(h.advertised_port(), 51821);
	}

	#[test]
	fn public_endpoint_prefers_v4() {
		let mut h = host();
		assert_eq!(h.public_endpoint(), None);

		h.endpoint_ipv6 = Some("2001:db8::1".parse().unwrap());
		assert_eq!(h.public_endpoint().unwrap().to_string(), "[2001:db8::1]:51821");

		h.endpoint_ip = Some("203.0.113.5".parse().unwrap());
		assert_eq!(h.public_endpoint().unwrap().to_string(), "203.0.113.5:51821");
	}

	#[test]
	fn validation() {
		let mut h = host();
		assert!(h.validate().is_ok());
		h.name = "  ".into();
		assert!(h.validate().is_err());

		let mut h = host();
		h.mtu = Some(100);
		assert!(h.validate().is_err());
	}

	#[test]
	fn legacy_payload_defaults() {
		let h = host();
		let mut value = serde_json::to_value(&h).unwrap();
		let obj = value.as_object_mut().unwrap();
		obj.remove("schema_version");
		obj.remove("nat_type");
		obj.remove("is_static_port");

		let back: Host = serde_json::from_value(value).unwrap();
		assert_eq!(back.schema_version, crate::SCHEMA_VERSION);
		assert_eq!(back.nat_type, NatType::Unknown);
		assert!(!back.is_static_port);
	}
}
