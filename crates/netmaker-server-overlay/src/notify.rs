// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `NetworkDirty` signalling from committed mutations to the change broker.

use netmaker_common_model::NetId;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

pub trait DirtyNotifier: Send + Sync {
	/// Called once per committed transaction for each network it touched.
	fn network_dirty(&self, net: &NetId);
}

#[derive(Clone)]
pub struct ChannelNotifier {
	tx: mpsc::UnboundedSender<NetId>,
}

impl ChannelNotifier {
	pub fn new() -> (Self, mpsc::UnboundedReceiver<NetId>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { tx }, rx)
	}
}

impl DirtyNotifier for ChannelNotifier {
	fn network_dirty(&self, net: &NetId) {
		if self.tx.send(net.clone()).is_err() {
			warn!(%net, "change broker is gone, dropping dirty signal");
		}
	}
}

#[derive(Default)]
pub struct NoopNotifier;

impl DirtyNotifier for NoopNotifier {
	fn network_dirty(&self, _net: &NetId) {}
}

/// Keeps every signal in order.
#[derive(Default)]
pub struct RecordingNotifier {
	events: Mutex<Vec<NetId>>,
}

impl RecordingNotifier {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn events(&self) -> Vec<NetId> {
		match self.events.lock() {
			Ok(events) => events.clone(),
			Err(poisoned) => poisoned.into_inner().clone(),
		}
	}

	pub fn take(&self) -> Vec<NetId> {
		match self.events.lock() {
			Ok(mut events) => std::mem::take(&mut *events),
			Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
		}
	}
}

impl DirtyNotifier for RecordingNotifier {
	fn network_dirty(&self, net: &NetId) {
		match self.events.lock() {
			Ok(mut events) => events.push(net.clone()),
			Err(poisoned) => poisoned.into_inner().push(net.clone()),
		}
	}
}
