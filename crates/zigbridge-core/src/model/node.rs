// ── Node: one physical device ──

use std::collections::BTreeSet;

use serde::Serialize;

use super::endpoint::EndpointKey;

/// A physical device, identified by its stable name.
///
/// Holds only the keys of its endpoints; the registry owns the endpoint
/// values. A node is never empty: the registry drops it when its last
/// endpoint is renamed away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub stable_id: String,
    pub endpoints: BTreeSet<EndpointKey>,
}

impl Node {
    pub fn new(stable_id: impl Into<String>) -> Self {
        Self {
            stable_id: stable_id.into(),
            endpoints: BTreeSet::new(),
        }
    }

    pub fn contains(&self, key: &EndpointKey) -> bool {
        self.endpoints.contains(key)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
