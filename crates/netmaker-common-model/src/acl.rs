// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The per-network node-to-node access matrix.
//!
//! Every write goes through [`AclMatrix::set`], [`AclMatrix::attach`] or
//! [`AclMatrix::detach`], each of which updates both directions of a pair.
//! There is no way to write one side only.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

use crate::ids::{NetId, NodeId};
use crate::network::DefaultAcl;
use crate::schema_version;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AclValue {
	#[default]
	NotPresent = 0,
	NotAllowed = 1,
	Allowed = 2,
}

impl AclValue {
	pub fn from_default(default: DefaultAcl) -> Self {
		match default {
			DefaultAcl::Allow => Self::Allowed,
			DefaultAcl::Deny => Self::NotAllowed,
		}
	}
}

impl Serialize for AclValue {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u8(*self as u8)
	}
}

impl<'de> Deserialize<'de> for AclValue {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		match u8::deserialize(deserializer)? {
			0 => Ok(Self::NotPresent),
			1 => Ok(Self::NotAllowed),
			2 => Ok(Self::Allowed),
			other => Err(serde::de::Error::custom(format!("invalid ACL value {other}"))),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AclMatrix(BTreeMap<NodeId, BTreeMap<NodeId, AclValue>>);

impl AclMatrix {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn contains(&self, node: &NodeId) -> bool {
		self.0.contains_key(node)
	}

	pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
		self.0.keys()
	}

	/// Adds a row and column for `node`, filling every new cell with `value`.
	/// Re-attaching an existing node leaves its cells untouched.
	pub fn attach(&mut self, node: NodeId, value: AclValue) {
		if self.0.contains_key(&node) {
			return;
		}
		let others: Vec<NodeId> = self.0.keys().copied().collect();
		let mut row = BTreeMap::new();
		for other in others {
			row.insert(other, value);
			if let Some(other_row) = self.0.get_mut(&other) {
				other_row.insert(node, value);
			}
		}
		self.0.insert(node, row);
	}

	pub fn detach(&mut self, node: &NodeId) {
		self.0.remove(node);
		for row in self.0.values_mut() {
			row.remove(node);
		}
	}

	/// Writes `[a][b]` and `[b][a]`. Self-pairs are ignored.
	pub fn set(&mut self, a: NodeId, b: NodeId, value: AclValue) {
		if a == b {
			return;
		}
		self.0.entry(a).or_default().insert(b, value);
		self.0.entry(b).or_default().insert(a, value);
	}

	pub fn get(&self, a: &NodeId, b: &NodeId) -> AclValue {
		self
			.0
			.get(a)
			.and_then(|row| row.get(b))
			.copied()
			.unwrap_or(AclValue::NotPresent)
	}

	/// Both directions must allow; any `NotPresent` side falls back to
	/// `default`.
	pub fn is_allowed(&self, a: &NodeId, b: &NodeId, default: DefaultAcl) -> bool {
		let resolve = |v: AclValue| match v {
			AclValue::Allowed => true,
			AclValue::NotAllowed => false,
			AclValue::NotPresent => default.allows(),
		};
		resolve(self.get(a, b)) && resolve(self.get(b, a))
	}

	pub fn is_symmetric(&self) -> bool {
		self
			.0
			.iter()
			.all(|(a, row)| row.iter().all(|(b, v)| self.get(b, a) == *v))
	}

	/// Every row has an entry for every other node in the matrix.
	pub fn is_square(&self) -> bool {
		self.0.iter().all(|(a, row)| {
			self
				.0
				.keys()
				.filter(|b| *b != a)
				.all(|b| row.contains_key(b))
		})
	}

	/// Pairs involving `node` and another member of the matrix.
	pub fn row(&self, node: &NodeId) -> impl Iterator<Item = (&NodeId, &AclValue)> {
		self.0.get(node).into_iter().flat_map(|row| row.iter())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclContainer {
	#[serde(default = "schema_version")]
	pub schema_version: u32,
	pub network: NetId,
	pub matrix: AclMatrix,
}

impl AclContainer {
	pub fn new(network: NetId) -> Self {
		Self {
			schema_version: schema_version(),
			network,
			matrix: AclMatrix::new(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn ids(n: usize) -> Vec<NodeId> {
		let mut v: Vec<NodeId> = (0..n).map(|_| NodeId::new()).collect();
		v.sort();
		v
	}

	#[test]
	fn empty_matrix_uses_default() {
		let m = AclMatrix::new();
		let [a, b] = [NodeId::new(), NodeId::new()];
		assert!(m.is_allowed(&a, &b, DefaultAcl::Allow));
		assert!(!m.is_allowed(&a, &b, DefaultAcl::Deny));
		assert!(m.is_symmetric());
		assert!(m.is_square());
	}

	#[test]
	fn attach_fills_row_and_column() {
		let v = ids(3);
		let mut m = AclMatrix::new();
		m.attach(v[0], AclValue::Allowed);
		m.attach(v[1], AclValue::Allowed);
		m.attach(v[2], AclValue::NotAllowed);

		assert_eq!(m.get(&v[0], &v[1]), AclValue::Allowed);
		assert_eq!(m.get(&v[2], &v[0]), AclValue::NotAllowed);
		assert_eq!(m.get(&v[1], &v[2]), AclValue::NotAllowed);
		assert!(m.is_square());
		assert!(m.is_symmetric());
	}

	#[test]
	fn set_writes_both_sides() {
		let v = ids(2);
		let mut m = AclMatrix::new();
		m.attach(v[0], AclValue::Allowed);
		m.attach(v[1], AclValue::Allowed);
		m.set(v[0], v[1], AclValue::NotAllowed);

		assert_eq!(m.get(&v[1], &v[0]), AclValue::NotAllowed);
		assert!(!m.is_allowed(&v[0], &v[1], DefaultAcl::Allow));
		assert!(!m.is_allowed(&v[1], &v[0], DefaultAcl::Allow));
	}

	#[test]
	fn detach_removes_row_and_column() {
		let v = ids(3);
		let mut m = AclMatrix::new();
		for id in &v {
			m.attach(*id, AclValue::Allowed);
		}
		m.detach(&v[1]);

		assert!(!m.contains(&v[1]));
		assert_eq!(m.get(&v[0], &v[1]), AclValue::NotPresent);
		assert!(m.is_square());
	}

	#[test]
	fn serializes_values_as_integers() {
		let v = ids(2);
		let mut m = AclMatrix::new();
		m.set(v[0], v[1], AclValue::Allowed);
		let json = serde_json::to_string(&m).unwrap();
		assert!(json.contains(":2"));
		assert_eq!(serde_json::from_str::<AclMatrix>(&json).unwrap(), m);
		assert!(serde_json::from_str::<AclValue>("7").is_err());
	}

	#[derive(Debug, Clone)]
	enum Op {
		Attach(usize, bool),
		Detach(usize),
		Set(usize, usize, u8),
	}

	fn op() -> impl Strategy<Value = Op> {
		prop_oneof![
			(0usize..6, any::<bool>()).prop_map(|(i, allow)| Op::Attach(i, allow)),
			(0usize..6).prop_map(Op::Detach),
			(0usize..6, 0usize..6, 0u8..3).prop_map(|(a, b, v)| Op::Set(a, b, v)),
		]
	}

	proptest! {
		#[test]
		fn every_operation_sequence_stays_symmetric(ops in prop::collection::vec(op(), 0..40)) {
			let pool = ids(6);
			let mut m = AclMatrix::new();
			for op in ops {
				match op {
					Op::Attach(i, allow) => m.attach(pool[i], if allow { AclValue::Allowed } else { AclValue::NotAllowed }),
					Op::Detach(i) => m.detach(&pool[i]),
					Op::Set(a, b, v) => {
						if m.contains(&pool[a]) && m.contains(&pool[b]) {
							let value = match v { 0 => AclValue::NotPresent, 1 => AclValue::NotAllowed, _ => AclValue::Allowed };
							m.set(pool[a], pool[b], value);
						}
					}
				}
				prop_assert!(m.is_symmetric());
				prop_assert!(m.is_square());
			}
		}

		#[test]
		fn detach_then_attach_preserves_unrelated_pairs(values in prop::collection::vec(any::<bool>(), 10)) {
			let pool = ids(5);
			let mut m = AclMatrix::new();
			for id in &pool {
				m.attach(*id, AclValue::Allowed);
			}
			let mut k = 0;
			for i in 0..pool.len() {
				for j in (i + 1)..pool.len() {
					let v = if values[k % values.len()] { AclValue::Allowed } else { AclValue::NotAllowed };
					m.set(pool[i], pool[j], v);
					k += 1;
				}
			}
			let before = m.clone();

			m.detach(&pool[2]);
			let fresh = NodeId::new();
			m.attach(fresh, AclValue::Allowed);

			for x in &pool {
				for y in &pool {
					if x != y && *x != pool[2] && *y != pool[2] {
						prop_assert_eq!(m.get(x, y), before.get(x, y));
					}
				}
			}
		}
	}
}
