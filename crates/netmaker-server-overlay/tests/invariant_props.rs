// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Random operation sequences never leave a network in a state that breaks
//! its invariants, whatever mix of them succeeds or is rejected.

mod support;

use netmaker_common_model::{AclValue, ExtClientId, GatewayConfig, Host, NodeId};
use netmaker_server_overlay::{invariants, resolve_all, ExtClientSpec, NodeOptions};
use proptest::prelude::*;
use std::collections::BTreeSet;
use support::{harness, key};

const HOSTS: u8 = 5;

#[derive(Debug, Clone)]
enum Op {
	Join(u8),
	Leave(u8),
	Finalize(u8),
	Relay(u8, u8),
	Unrelay(u8),
	Deny(u8, u8),
	Ingress(u8),
	ExtClient(u8, u8),
	InternetGw(u8),
	UseGw(u8, u8),
	DeleteHost(u8),
}

fn host_index() -> impl Strategy<Value = u8> {
	0..HOSTS
}

fn op() -> impl Strategy<Value = Op> {
	prop_oneof![
		3 => host_index().prop_map(Op::Join),
		1 => host_index().prop_map(Op::Leave),
		1 => host_index().prop_map(Op::Finalize),
		1 => (host_index(), host_index()).prop_map(|(a, b)| Op::Relay(a, b)),
		1 => host_index().prop_map(Op::Unrelay),
		1 => (host_index(), host_index()).prop_map(|(a, b)| Op::Deny(a, b)),
		1 => host_index().prop_map(Op::Ingress),
		1 => (host_index(), 0..3u8).prop_map(|(a, k)| Op::ExtClient(a, k)),
		1 => host_index().prop_map(Op::InternetGw),
		1 => (host_index(), host_index()).prop_map(|(a, b)| Op::UseGw(a, b)),
		1 => host_index().prop_map(Op::DeleteHost),
	]
}

async fn run(ops: Vec<Op>) {
	let h = harness("10.0.0.0/28").await;
	let mut hosts = Vec::new();
	for i in 0..HOSTS {
		let mut host = Host::new(format!("h{i}"), key(i + 1));
		host.os = "linux".to_string();
		hosts.push(h.service.create_host(&h.ctx, host).await.unwrap().id);
	}

	let node_of = |i: u8, nodes: &[(u8, NodeId)]| nodes.iter().find(|(h, _)| *h == i).map(|(_, n)| *n);
	let mut nodes: Vec<(u8, NodeId)> = Vec::new();

	for op in ops {
		let svc = &h.service;
		let ctx = &h.ctx;
		// Rejections are expected; only the resulting state matters.
		match op.clone() {
			Op::Join(i) => {
				if let Ok(node) = svc
					.create_node(ctx, &hosts[i as usize], &h.net, NodeOptions::default())
					.await
				{
					nodes.push((i, node.id));
				}
			}
			Op::Leave(i) => {
				if let Some(n) = node_of(i, &nodes) {
					let _ = svc.mark_node_pending_delete(ctx, &n).await;
				}
			}
			Op::Finalize(i) => {
				if let Some(n) = node_of(i, &nodes) {
					if svc.finalize_node_delete(ctx, &n).await.is_ok() {
						nodes.retain(|(_, id)| *id != n);
					}
				}
			}
			Op::Relay(r, x) => {
				if let (Some(r), Some(x)) = (node_of(r, &nodes), node_of(x, &nodes)) {
					let _ = svc.create_relay(ctx, &r, BTreeSet::from([x])).await;
				}
			}
			Op::Unrelay(r) => {
				if let Some(r) = node_of(r, &nodes) {
					let _ = svc.delete_relay(ctx, &r).await;
				}
			}
			Op::Deny(a, b) => {
				if let (Some(a), Some(b)) = (node_of(a, &nodes), node_of(b, &nodes)) {
					let _ = svc.acl_set(ctx, &h.net, &a, &b, AclValue::NotAllowed).await;
				}
			}
			Op::Ingress(i) => {
				if let Some(n) = node_of(i, &nodes) {
					let _ = svc.create_ingress_gateway(ctx, &n, GatewayConfig::default()).await;
				}
			}
			Op::ExtClient(i, k) => {
				if let Some(n) = node_of(i, &nodes) {
					let id = ExtClientId::new(format!("client{k}")).unwrap();
					let spec = ExtClientSpec::new(id, n, key(100 + k));
					let _ = svc.create_ext_client(ctx, &h.net, spec).await;
				}
			}
			Op::InternetGw(i) => {
				if let Some(n) = node_of(i, &nodes) {
					let _ = svc.create_internet_gateway(ctx, &n).await;
				}
			}
			Op::UseGw(a, g) => {
				if let (Some(a), Some(g)) = (node_of(a, &nodes), node_of(g, &nodes)) {
					let _ = svc.set_internet_gateway(ctx, &a, &g).await;
				}
			}
			Op::DeleteHost(i) => {
				if let Some(n) = node_of(i, &nodes) {
					let _ = svc.remove_host_from_network(ctx, &hosts[i as usize], &h.net).await;
					let _ = svc.finalize_node_delete(ctx, &n).await;
					nodes.retain(|(_, id)| *id != n);
				}
			}
		}

		let snapshot = h.service.snapshot(&h.net).await.unwrap().unwrap();
		let violations = invariants::check(&snapshot);
		assert!(violations.is_empty(), "after {op:?}: {violations:?}");

		// Resolution is a pure function of the snapshot.
		let first = resolve_all(&snapshot);
		let second = resolve_all(&snapshot);
		assert_eq!(first, second);
		for update in &first {
			let keys: Vec<_> = update.peers.iter().map(|p| p.public_key).collect();
			let mut sorted = keys.clone();
			sorted.sort();
			sorted.dedup();
			assert_eq!(keys, sorted);
		}
	}
}

proptest! {
	#![proptest_config(ProptestConfig::with_cases(32))]

	#[test]
	fn random_operations_preserve_invariants(ops in proptest::collection::vec(op(), 1..24)) {
		let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
		runtime.block_on(run(ops));
	}
}
