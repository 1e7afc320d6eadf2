// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end topology scenarios driven through the service API and
//! checked against resolved peer maps.

mod support;

use netmaker_common_model::{AclValue, ExtClientId, GatewayConfig, NodeAcl};
use netmaker_server_overlay::{ErrorKind, ExtClientSpec, NodeOptions, NodeUpdate};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use support::{harness, ips, key};

#[tokio::test]
async fn acl_deny_is_symmetric() {
	let h = harness("10.0.0.0/24").await;
	let a = h.join(1).await;
	let b = h.join(2).await;
	let c = h.join(3).await;
	assert_eq!(a.address, Some(Ipv4Addr::new(10, 0, 0, 1)));
	assert_eq!(b.address, Some(Ipv4Addr::new(10, 0, 0, 2)));
	assert_eq!(c.address, Some(Ipv4Addr::new(10, 0, 0, 3)));

	h.service
		.acl_set(&h.ctx, &h.net, &a.id, &b.id, AclValue::NotAllowed)
		.await
		.unwrap();

	assert_eq!(h.peer_table(&a.id).await, vec![(key(3), ips(&["10.0.0.3/32"]))]);
	assert_eq!(h.peer_table(&b.id).await, vec![(key(3), ips(&["10.0.0.3/32"]))]);
	assert_eq!(
		h.peer_table(&c.id).await,
		vec![(key(1), ips(&["10.0.0.1/32"])), (key(2), ips(&["10.0.0.2/32"]))]
	);
	assert!(!h.service.acl_is_allowed(&h.ctx, &h.net, &b.id, &a.id).await.unwrap());
}

#[tokio::test]
async fn deny_node_stays_isolated_from_later_joins() {
	let h = harness("10.0.0.0/24").await;
	let deny = NodeOptions {
		default_acl: NodeAcl::Deny,
		..Default::default()
	};
	let a = h.join_with(1, deny).await;
	let b = h.join(2).await;
	let c = h.join(3).await;

	assert!(!h.service.acl_is_allowed(&h.ctx, &h.net, &b.id, &a.id).await.unwrap());
	assert!(!h.service.acl_is_allowed(&h.ctx, &h.net, &a.id, &c.id).await.unwrap());
	assert!(h.peer_table(&a.id).await.is_empty());
	assert_eq!(h.peer_table(&b.id).await, vec![(key(3), ips(&["10.0.0.3/32"]))]);
	assert_eq!(h.peer_table(&c.id).await, vec![(key(2), ips(&["10.0.0.2/32"]))]);

	let acl = h.service.acl_get(&h.ctx, &h.net).await.unwrap();
	assert!(acl.matrix.is_symmetric());
	assert!(acl.matrix.is_square());

	h.service
		.acl_set(&h.ctx, &h.net, &a.id, &b.id, AclValue::Allowed)
		.await
		.unwrap();
	assert_eq!(h.peer_table(&a.id).await, vec![(key(2), ips(&["10.0.0.2/32"]))]);
}

#[tokio::test]
async fn switching_a_node_to_deny_covers_later_joins() {
	let h = harness("10.0.0.0/24").await;
	let a = h.join(1).await;
	let b = h.join(2).await;

	let update = NodeUpdate {
		default_acl: Some(NodeAcl::Deny),
		..Default::default()
	};
	h.service.update_node(&h.ctx, &a.id, update).await.unwrap();
	assert!(h.peer_table(&b.id).await.is_empty());

	let c = h.join(3).await;
	assert!(h.peer_table(&a.id).await.is_empty());
	assert_eq!(h.peer_table(&c.id).await, vec![(key(2), ips(&["10.0.0.2/32"]))]);
	assert!(!h.service.acl_is_allowed(&h.ctx, &h.net, &c.id, &a.id).await.unwrap());
}

#[tokio::test]
async fn relayed_node_is_reached_through_its_relay() {
	let h = harness("10.0.0.0/24").await;
	let a = h.join(1).await;
	let b = h.join(2).await;
	let c = h.join(3).await;

	h.service
		.create_relay(&h.ctx, &b.id, BTreeSet::from([a.id]))
		.await
		.unwrap();

	let from_c = h.peers_of(&c.id).await;
	assert_eq!(from_c.peers.len(), 1);
	assert!(from_c.peer(&key(1)).is_none());
	let via_b = from_c.peer(&key(2)).unwrap();
	assert_eq!(
		via_b.allowed_ips.iter().map(ToString::to_string).collect::<Vec<_>>(),
		ips(&["10.0.0.1/32", "10.0.0.2/32"])
	);
	assert_eq!(via_b.is_relay_for, vec![a.id]);

	// The relayed node only talks to its relay.
	assert_eq!(
		h.peer_table(&a.id).await,
		vec![(key(2), ips(&["10.0.0.2/32", "10.0.0.3/32"]))]
	);

	h.service.delete_relay(&h.ctx, &b.id).await.unwrap();
	assert_eq!(h.peers_of(&c.id).await.peers.len(), 2);
	assert!(h.peers_of(&c.id).await.peer(&key(1)).is_some());
}

#[tokio::test]
async fn ext_client_is_routed_through_ingress() {
	let h = harness("10.0.0.0/24").await;
	let a = h.join(1).await;
	let b = h.join(2).await;
	let c = h.join(3).await;

	let gateway = GatewayConfig {
		ranges: vec!["10.0.0.0/24".parse().unwrap()],
		..GatewayConfig::default()
	};
	h.service.create_ingress_gateway(&h.ctx, &b.id, gateway).await.unwrap();

	let mut spec = ExtClientSpec::new(ExtClientId::new("phone").unwrap(), b.id, key(100));
	spec.address = Some(Ipv4Addr::new(10, 0, 0, 100));
	let client = h.service.create_ext_client(&h.ctx, &h.net, spec).await.unwrap();
	assert_eq!(client.address, Some(Ipv4Addr::new(10, 0, 0, 100)));

	for node in [&a, &c] {
		let table = h.peer_table(&node.id).await;
		let via_b = table.iter().find(|(k, _)| *k == key(2)).unwrap();
		assert_eq!(via_b.1, ips(&["10.0.0.2/32", "10.0.0.100/32"]));
		assert!(table.iter().all(|(k, _)| *k != key(100)));
	}

	let at_ingress = h.peers_of(&b.id).await;
	assert_eq!(at_ingress.ext_clients.len(), 1);
	let phone = at_ingress.peer(&key(100)).unwrap();
	assert_eq!(
		phone.allowed_ips.iter().map(ToString::to_string).collect::<Vec<_>>(),
		ips(&["10.0.0.100/32"])
	);

	h.service.delete_ingress_gateway(&h.ctx, &b.id).await.unwrap();
	assert!(h.service.list_ext_clients(&h.ctx, &h.net).await.unwrap().is_empty());
}

#[tokio::test]
async fn exhausted_range_reuses_finalized_address() {
	let h = harness("10.0.0.0/30").await;
	let first = h.join(1).await;
	let second = h.join(2).await;
	assert_eq!(first.address, Some(Ipv4Addr::new(10, 0, 0, 1)));
	assert_eq!(second.address, Some(Ipv4Addr::new(10, 0, 0, 2)));

	let mut host = netmaker_common_model::Host::new("host-3", key(3));
	host.os = "linux".to_string();
	let third = h.service.create_host(&h.ctx, host).await.unwrap();
	let err = h
		.service
		.create_node(&h.ctx, &third.id, &h.net, NodeOptions::default())
		.await
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::Exhausted);

	h.service.mark_node_pending_delete(&h.ctx, &first.id).await.unwrap();
	// Pending nodes keep their address until finalized.
	let err = h
		.service
		.create_node(&h.ctx, &third.id, &h.net, NodeOptions::default())
		.await
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::Exhausted);

	h.service.finalize_node_delete(&h.ctx, &first.id).await.unwrap();
	let node = h
		.service
		.create_node(&h.ctx, &third.id, &h.net, NodeOptions::default())
		.await
		.unwrap();
	assert_eq!(node.address, Some(Ipv4Addr::new(10, 0, 0, 1)));
}

#[tokio::test]
async fn relay_cycles_and_chains_are_rejected() {
	let h = harness("10.0.0.0/24").await;
	let a = h.join(1).await;
	let b = h.join(2).await;
	let c = h.join(3).await;

	h.service
		.create_relay(&h.ctx, &b.id, BTreeSet::from([a.id]))
		.await
		.unwrap();
	h.notifier.take();

	let err = h
		.service
		.create_relay(&h.ctx, &a.id, BTreeSet::from([b.id]))
		.await
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::Conflict);

	let err = h
		.service
		.create_relay(&h.ctx, &a.id, BTreeSet::from([c.id]))
		.await
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::Conflict);

	assert!(h.notifier.events().is_empty());
	let c_now = h.service.get_node(&h.ctx, &c.id).await.unwrap();
	assert_eq!(c_now.relayed_by, None);
}
