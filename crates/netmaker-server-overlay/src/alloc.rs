// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Smallest-free overlay address allocation.
//!
//! The pool is rebuilt from the nodes and ext-clients of a network each
//! time; nothing besides the entities themselves is persisted. Nodes that
//! are pending deletion keep their address until they are finalized.

use ipnet::{Ipv4Net, Ipv6Net};
use netmaker_common_model::{ExtClient, Network, Node};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::OverlayError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
	#[error("address {0} is already in use")]
	InUse(IpAddr),
	#[error("address {0} is outside the usable range")]
	OutOfRange(IpAddr),
	#[error("no free {0} address left")]
	Exhausted(&'static str),
}

impl From<AllocError> for OverlayError {
	fn from(err: AllocError) -> Self {
		match err {
			AllocError::InUse(_) => OverlayError::Conflict(err.to_string()),
			AllocError::OutOfRange(_) => OverlayError::Validation(err.to_string()),
			AllocError::Exhausted(_) => OverlayError::Exhausted(err.to_string()),
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct IpAllocator {
	range4: Option<Ipv4Net>,
	range6: Option<Ipv6Net>,
	used4: BTreeSet<u32>,
	used6: BTreeSet<u128>,
}

/// First and last assignable v4 addresses (network and broadcast excluded).
fn bounds4(range: &Ipv4Net) -> Option<(u32, u32)> {
	let first = u32::from(range.network()).checked_add(1)?;
	let last = u32::from(range.broadcast()).checked_sub(1)?;
	(first <= last).then_some((first, last))
}

/// v6 skips only the subnet-router anycast address at the floor.
fn bounds6(range: &Ipv6Net) -> Option<(u128, u128)> {
	let first = u128::from(range.network()).checked_add(1)?;
	let last = u128::from(range.broadcast());
	(first <= last).then_some((first, last))
}

fn smallest_free<T>(used: &BTreeSet<T>, first: T, last: T) -> Option<T>
where
	T: Copy + Ord + std::ops::Add<Output = T> + From<u8>,
{
	let mut candidate = first;
	for &taken in used.range(first..=last) {
		if taken != candidate {
			break;
		}
		if candidate == last {
			return None;
		}
		candidate = candidate + T::from(1);
	}
	Some(candidate)
}

impl IpAllocator {
	pub fn new(network: &Network) -> Self {
		Self {
			range4: network.address_range,
			range6: network.address_range6,
			..Self::default()
		}
	}

	pub fn from_entities<'a>(
		network: &Network,
		nodes: impl IntoIterator<Item = &'a Node>,
		clients: impl IntoIterator<Item = &'a ExtClient>,
	) -> Self {
		let mut alloc = Self::new(network);
		for node in nodes {
			alloc.mark_used(node.addresses());
		}
		for client in clients {
			alloc.mark_used(client.addresses());
		}
		alloc
	}

	pub fn mark_used(&mut self, addrs: impl IntoIterator<Item = IpAddr>) {
		for addr in addrs {
			match addr {
				IpAddr::V4(a) => {
					self.used4.insert(u32::from(a));
				}
				IpAddr::V6(a) => {
					self.used6.insert(u128::from(a));
				}
			}
		}
	}

	pub fn allocate4(&mut self, pinned: Option<Ipv4Addr>) -> Result<Option<Ipv4Addr>, AllocError> {
		let Some(range) = self.range4 else {
			return match pinned {
				Some(ip) => Err(AllocError::OutOfRange(IpAddr::V4(ip))),
				None => Ok(None),
			};
		};
		let bounds = bounds4(&range);

		let addr = match pinned {
			Some(ip) => {
				let raw = u32::from(ip);
				match bounds {
					Some((first, last)) if (first..=last).contains(&raw) => {}
					_ => return Err(AllocError::OutOfRange(IpAddr::V4(ip))),
				}
				if self.used4.contains(&raw) {
					return Err(AllocError::InUse(IpAddr::V4(ip)));
				}
				raw
			}
			None => {
				let (first, last) = bounds.ok_or(AllocError::Exhausted("IPv4"))?;
				smallest_free(&self.used4, first, last).ok_or(AllocError::Exhausted("IPv4"))?
			}
		};

		self.used4.insert(addr);
		Ok(Some(Ipv4Addr::from(addr)))
	}

	pub fn allocate6(&mut self, pinned: Option<Ipv6Addr>) -> Result<Option<Ipv6Addr>, AllocError> {
		let Some(range) = self.range6 else {
			return match pinned {
				Some(ip) => Err(AllocError::OutOfRange(IpAddr::V6(ip))),
				None => Ok(None),
			};
		};
		let bounds = bounds6(&range);

		let addr = match pinned {
			Some(ip) => {
				let raw = u128::from(ip);
				match bounds {
					Some((first, last)) if (first..=last).contains(&raw) => {}
					_ => return Err(AllocError::OutOfRange(IpAddr::V6(ip))),
				}
				if self.used6.contains(&raw) {
					return Err(AllocError::InUse(IpAddr::V6(ip)));
				}
				raw
			}
			None => {
				let (first, last) = bounds.ok_or(AllocError::Exhausted("IPv6"))?;
				smallest_free(&self.used6, first, last).ok_or(AllocError::Exhausted("IPv6"))?
			}
		};

		self.used6.insert(addr);
		Ok(Some(Ipv6Addr::from(addr)))
	}

	/// Allocates one address per configured family.
	pub fn allocate(
		&mut self,
		pinned4: Option<Ipv4Addr>,
		pinned6: Option<Ipv6Addr>,
	) -> Result<(Option<Ipv4Addr>, Option<Ipv6Addr>), AllocError> {
		let v4 = self.allocate4(pinned4)?;
		let v6 = self.allocate6(pinned6)?;
		Ok((v4, v6))
	}
}
