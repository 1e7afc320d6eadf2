// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Typed access to the overlay tables inside one staged transaction.

use netmaker_common_model::{
	AclContainer, EnrollmentKey, ExtClient, ExtClientId, Host, HostId, NetId, Network, Node, NodeId,
	RelayState,
};
use netmaker_server_db::{is_empty, tables, DbError, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::error::{OverlayError, Result, StorageContext};

pub struct OverlayTx {
	tx: Transaction,
	dirty: BTreeSet<NetId>,
}

impl OverlayTx {
	pub fn new(tx: Transaction) -> Self {
		Self {
			tx,
			dirty: BTreeSet::new(),
		}
	}

	pub fn mark_dirty(&mut self, net: &NetId) {
		self.dirty.insert(net.clone());
	}

	pub fn dirty(&self) -> &BTreeSet<NetId> {
		&self.dirty
	}

	pub fn staged_len(&self) -> usize {
		self.tx.staged_len()
	}

	/// Commits staged writes and hands back the networks that changed.
	pub async fn commit(self) -> Result<BTreeSet<NetId>> {
		self.tx.commit().await.during("commit")?;
		Ok(self.dirty)
	}

	pub fn rollback(self) {
		self.tx.rollback();
	}

	async fn get<T: DeserializeOwned>(&self, table: &'static str, key: &str) -> Result<Option<T>> {
		match self.tx.fetch(table, key).await {
			Ok(raw) => serde_json::from_str(&raw)
				.map(Some)
				.map_err(|e| OverlayError::storage(table, DbError::Serialization(e))),
			Err(e) if e.is_not_found() => Ok(None),
			Err(e) => Err(OverlayError::storage(table, e)),
		}
	}

	async fn list<T: DeserializeOwned>(&self, table: &'static str) -> Result<Vec<T>> {
		let rows = match self.tx.fetch_all(table).await {
			Ok(rows) => rows,
			Err(e) if is_empty(&e) => return Ok(Vec::new()),
			Err(e) => return Err(OverlayError::storage(table, e)),
		};
		rows
			.values()
			.map(|raw| {
				serde_json::from_str(raw).map_err(|e| OverlayError::storage(table, DbError::Serialization(e)))
			})
			.collect()
	}

	fn put<T: Serialize>(&mut self, table: &'static str, key: &str, value: &T) -> Result<()> {
		let raw =
			serde_json::to_string(value).map_err(|e| OverlayError::storage(table, DbError::Serialization(e)))?;
		self.tx.insert(table, key, raw).during(table)
	}

	fn remove(&mut self, table: &'static str, key: &str) -> Result<()> {
		self.tx.delete(table, key).during(table)
	}

	// networks

	pub async fn network_opt(&self, net: &NetId) -> Result<Option<Network>> {
		self.get(tables::NETWORKS, net.as_str()).await
	}

	pub async fn network(&self, net: &NetId) -> Result<Network> {
		self
			.network_opt(net)
			.await?
			.ok_or_else(|| OverlayError::NotFound(format!("network {net}")))
	}

	pub async fn networks(&self) -> Result<Vec<Network>> {
		self.list(tables::NETWORKS).await
	}

	pub fn put_network(&mut self, network: &Network) -> Result<()> {
		self.put(tables::NETWORKS, network.net_id.as_str(), network)?;
		self.mark_dirty(&network.net_id);
		Ok(())
	}

	pub fn delete_network(&mut self, net: &NetId) -> Result<()> {
		self.remove(tables::NETWORKS, net.as_str())?;
		self.mark_dirty(net);
		Ok(())
	}

	// hosts

	pub async fn host_opt(&self, id: &HostId) -> Result<Option<Host>> {
		self.get(tables::HOSTS, &id.to_string()).await
	}

	pub async fn host(&self, id: &HostId) -> Result<Host> {
		self
			.host_opt(id)
			.await?
			.ok_or_else(|| OverlayError::NotFound(format!("host {id}")))
	}

	pub async fn hosts(&self) -> Result<Vec<Host>> {
		self.list(tables::HOSTS).await
	}

	/// Hosts are network-agnostic; callers mark the affected networks.
	pub fn put_host(&mut self, host: &Host) -> Result<()> {
		self.put(tables::HOSTS, &host.id.to_string(), host)
	}

	pub fn delete_host(&mut self, id: &HostId) -> Result<()> {
		self.remove(tables::HOSTS, &id.to_string())
	}

	// nodes

	pub async fn node_opt(&self, id: &NodeId) -> Result<Option<Node>> {
		self.get(tables::NODES, &id.to_string()).await
	}

	pub async fn node(&self, id: &NodeId) -> Result<Node> {
		self
			.node_opt(id)
			.await?
			.ok_or_else(|| OverlayError::NotFound(format!("node {id}")))
	}

	pub async fn all_nodes(&self) -> Result<Vec<Node>> {
		self.list(tables::NODES).await
	}

	pub async fn nodes_in(&self, net: &NetId) -> Result<Vec<Node>> {
		let mut nodes = self.all_nodes().await?;
		nodes.retain(|n| &n.network == net);
		Ok(nodes)
	}

	pub async fn nodes_of_host(&self, host: &HostId) -> Result<Vec<Node>> {
		let mut nodes = self.all_nodes().await?;
		nodes.retain(|n| &n.host_id == host);
		Ok(nodes)
	}

	pub fn put_node(&mut self, node: &Node) -> Result<()> {
		self.put_node_quiet(node)?;
		self.mark_dirty(&node.network);
		Ok(())
	}

	/// Persists bookkeeping that peers never see (check-in timestamps).
	pub fn put_node_quiet(&mut self, node: &Node) -> Result<()> {
		self.put(tables::NODES, &node.id.to_string(), node)
	}

	pub fn delete_node(&mut self, node: &Node) -> Result<()> {
		self.remove(tables::NODES, &node.id.to_string())?;
		self.mark_dirty(&node.network);
		Ok(())
	}

	// ext clients

	pub async fn ext_client_opt(&self, net: &NetId, id: &ExtClientId) -> Result<Option<ExtClient>> {
		self
			.get(tables::EXT_CLIENTS, &tables::ext_client_key(net.as_str(), id.as_str()))
			.await
	}

	pub async fn ext_client(&self, net: &NetId, id: &ExtClientId) -> Result<ExtClient> {
		self
			.ext_client_opt(net, id)
			.await?
			.ok_or_else(|| OverlayError::NotFound(format!("ext client {net}/{id}")))
	}

	pub async fn ext_clients_in(&self, net: &NetId) -> Result<Vec<ExtClient>> {
		let mut clients: Vec<ExtClient> = self.list(tables::EXT_CLIENTS).await?;
		clients.retain(|c| &c.network == net);
		Ok(clients)
	}

	pub fn put_ext_client(&mut self, client: &ExtClient) -> Result<()> {
		let key = tables::ext_client_key(client.network.as_str(), client.client_id.as_str());
		self.put(tables::EXT_CLIENTS, &key, client)?;
		self.mark_dirty(&client.network);
		Ok(())
	}

	pub fn delete_ext_client(&mut self, client: &ExtClient) -> Result<()> {
		let key = tables::ext_client_key(client.network.as_str(), client.client_id.as_str());
		self.remove(tables::EXT_CLIENTS, &key)?;
		self.mark_dirty(&client.network);
		Ok(())
	}

	// acls

	/// The network's matrix, or an empty one if none was written yet.
	pub async fn acl(&self, net: &NetId) -> Result<AclContainer> {
		Ok(self
			.get(tables::ACLS, net.as_str())
			.await?
			.unwrap_or_else(|| AclContainer::new(net.clone())))
	}

	pub fn put_acl(&mut self, acl: &AclContainer) -> Result<()> {
		self.put(tables::ACLS, acl.network.as_str(), acl)?;
		self.mark_dirty(&acl.network);
		Ok(())
	}

	pub fn delete_acl(&mut self, net: &NetId) -> Result<()> {
		self.remove(tables::ACLS, net.as_str())
	}

	// enrollment keys

	pub async fn enrollment_key_opt(&self, token: &str) -> Result<Option<EnrollmentKey>> {
		self.get(tables::ENROLLMENT_KEYS, token).await
	}

	pub async fn enrollment_key(&self, token: &str) -> Result<EnrollmentKey> {
		self
			.enrollment_key_opt(token)
			.await?
			.ok_or_else(|| OverlayError::NotFound("enrollment key".to_string()))
	}

	pub async fn enrollment_keys(&self) -> Result<Vec<EnrollmentKey>> {
		self.list(tables::ENROLLMENT_KEYS).await
	}

	pub fn put_enrollment_key(&mut self, key: &EnrollmentKey) -> Result<()> {
		self.put(tables::ENROLLMENT_KEYS, &key.token, key)
	}

	pub fn delete_enrollment_key(&mut self, token: &str) -> Result<()> {
		self.remove(tables::ENROLLMENT_KEYS, token)
	}

	// relay state

	pub async fn relay_state(&self, net: &NetId, node: &NodeId) -> Result<RelayState> {
		let key = tables::relay_state_key(net.as_str(), &node.to_string());
		Ok(self
			.get(tables::RELAY_STATE, &key)
			.await?
			.unwrap_or_else(|| RelayState::new(net.clone(), *node)))
	}

	pub fn put_relay_state(&mut self, state: &RelayState) -> Result<()> {
		let key = tables::relay_state_key(state.network.as_str(), &state.node.to_string());
		self.put(tables::RELAY_STATE, &key, state)
	}

	pub fn delete_relay_state(&mut self, net: &NetId, node: &NodeId) -> Result<()> {
		let key = tables::relay_state_key(net.as_str(), &node.to_string());
		self.remove(tables::RELAY_STATE, &key)
	}
}
