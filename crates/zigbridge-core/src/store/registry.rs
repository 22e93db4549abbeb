// ── Device registry ──
//
// Single source of truth for every known endpoint and node. Both indices
// sit behind one `parking_lot::RwLock`, so a rename (endpoint name plus
// node membership) is one write-locked critical section and readers never
// observe it half-applied. Freshness is broadcast via `watch` channels.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::info;

use crate::model::{Endpoint, EndpointKey, Node};

/// In-memory device registry shared by the poller and the dispatcher.
///
/// Endpoints are created lazily and never removed; a device that leaves
/// the network keeps its last known state until restart.
pub struct DeviceRegistry {
    pub(crate) indices: RwLock<Indices>,
    pub(crate) last_poll: watch::Sender<Option<DateTime<Utc>>>,
    pub(crate) last_stream_delta: watch::Sender<Option<DateTime<Utc>>>,
}

#[derive(Default)]
pub(crate) struct Indices {
    pub(crate) endpoints: HashMap<EndpointKey, Endpoint>,
    pub(crate) nodes: BTreeMap<String, Node>,
}

impl Indices {
    /// Insert a fresh endpoint and attach it to its node.
    pub(crate) fn insert(&mut self, endpoint: Endpoint) {
        self.nodes
            .entry(endpoint.stable_id.clone())
            .or_insert_with(|| Node::new(endpoint.stable_id.clone()))
            .endpoints
            .insert(endpoint.key.clone());
        self.endpoints.insert(endpoint.key.clone(), endpoint);
    }

    /// Move `key` to the node named `new_id`. Returns the previous name if
    /// anything changed. Caller holds the write lock.
    pub(crate) fn rename(&mut self, key: &EndpointKey, new_id: &str) -> Option<String> {
        let endpoint = self.endpoints.get_mut(key)?;
        if endpoint.stable_id == new_id {
            return None;
        }
        let old_id = std::mem::replace(&mut endpoint.stable_id, new_id.to_owned());

        if let Some(old_node) = self.nodes.get_mut(&old_id) {
            old_node.endpoints.remove(key);
            if old_node.is_empty() {
                self.nodes.remove(&old_id);
            }
        }
        self.nodes
            .entry(new_id.to_owned())
            .or_insert_with(|| Node::new(new_id))
            .endpoints
            .insert(key.clone());

        info!(endpoint = %key, from = %old_id, to = %new_id, "endpoint renamed");
        Some(old_id)
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (last_poll, _) = watch::channel(None);
        let (last_stream_delta, _) = watch::channel(None);

        Self {
            indices: RwLock::new(Indices::default()),
            last_poll,
            last_stream_delta,
        }
    }

    // ── Lookups ──────────────────────────────────────────────────────

    /// Endpoint by gateway address. `None` means the device is unknown.
    pub fn lookup(&self, resource_class: &str, local_id: &str) -> Option<Endpoint> {
        let key = EndpointKey::new(resource_class, local_id);
        self.indices.read().endpoints.get(&key).cloned()
    }

    pub fn node(&self, stable_id: &str) -> Option<Node> {
        self.indices.read().nodes.get(stable_id).cloned()
    }

    /// All endpoints of one device, in key order.
    pub fn endpoints_of(&self, stable_id: &str) -> Vec<Endpoint> {
        let indices = self.indices.read();
        let Some(node) = indices.nodes.get(stable_id) else {
            return Vec::new();
        };
        node.endpoints
            .iter()
            .filter_map(|key| indices.endpoints.get(key).cloned())
            .collect()
    }

    // ── Snapshots ────────────────────────────────────────────────────

    /// Every endpoint, sorted by key.
    pub fn endpoints_snapshot(&self) -> Vec<Endpoint> {
        let mut all: Vec<Endpoint> = self.indices.read().endpoints.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Every node, sorted by stable id.
    pub fn nodes_snapshot(&self) -> Vec<Node> {
        self.indices.read().nodes.values().cloned().collect()
    }

    // ── Counts ───────────────────────────────────────────────────────

    pub fn endpoint_count(&self) -> usize {
        self.indices.read().endpoints.len()
    }

    pub fn node_count(&self) -> usize {
        self.indices.read().nodes.len()
    }

    // ── Freshness ────────────────────────────────────────────────────

    pub fn last_poll(&self) -> Option<DateTime<Utc>> {
        *self.last_poll.borrow()
    }

    pub fn last_stream_delta(&self) -> Option<DateTime<Utc>> {
        *self.last_stream_delta.borrow()
    }

    pub fn subscribe_last_poll(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.last_poll.subscribe()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
