// ── Poll application logic ──
//
// Applies REST snapshots from the gateway poller to the registry. A
// snapshot overwrites the polled sub-objects wholesale; stream-side data
// is never touched here.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::debug;

use zigbridge_api::EndpointSnapshot;

use super::DeviceRegistry;
use crate::model::{Endpoint, EndpointKey};

/// What a single upsert did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
    Renamed { from: String },
}

/// Totals for one applied poll response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub created: usize,
    pub updated: usize,
    pub renamed: usize,
}

impl PollSummary {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.renamed
    }

    fn record(&mut self, upsert: &Upsert) {
        match upsert {
            Upsert::Created => self.created += 1,
            Upsert::Updated => self.updated += 1,
            Upsert::Renamed { .. } => self.renamed += 1,
        }
    }
}

impl std::ops::AddAssign for PollSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.created += rhs.created;
        self.updated += rhs.updated;
        self.renamed += rhs.renamed;
    }
}

impl DeviceRegistry {
    /// Create or refresh one endpoint from a REST snapshot.
    ///
    /// A snapshot whose `name` differs from the endpoint's current stable
    /// id renames it. An unnamed endpoint seen for the first time is filed
    /// under `"{resource_class}/{local_id}"`.
    pub fn upsert_from_poll(
        &self,
        resource_class: &str,
        local_id: &str,
        snapshot: &EndpointSnapshot,
    ) -> Upsert {
        let key = EndpointKey::new(resource_class, local_id);
        let now = Utc::now();
        let mut indices = self.indices.write();

        let mut outcome = Upsert::Updated;
        if indices.endpoints.contains_key(&key) {
            if let Some(ref name) = snapshot.name {
                if let Some(from) = indices.rename(&key, name) {
                    outcome = Upsert::Renamed { from };
                }
            }
        } else {
            let stable_id = snapshot.name.clone().unwrap_or_else(|| key.to_string());
            debug!(endpoint = %key, stable_id = %stable_id, "new endpoint");
            indices.insert(Endpoint::new(key.clone(), stable_id));
            outcome = Upsert::Created;
        }

        if let Some(endpoint) = indices.endpoints.get_mut(&key) {
            if let Some(ref state) = snapshot.state {
                endpoint.rest_state.clone_from(state);
            }
            if let Some(ref config) = snapshot.config {
                endpoint.rest_config.clone_from(config);
            }
            endpoint.rest_meta.clone_from(&snapshot.extra);
            endpoint.last_polled = Some(now);
        }

        outcome
    }

    /// Apply every entry of one `GET /{resource_class}` response, then
    /// stamp the last-poll time.
    pub fn apply_poll(
        &self,
        resource_class: &str,
        snapshots: &BTreeMap<String, EndpointSnapshot>,
    ) -> PollSummary {
        let mut summary = PollSummary::default();
        for (local_id, snapshot) in snapshots {
            let upsert = self.upsert_from_poll(resource_class, local_id, snapshot);
            summary.record(&upsert);
        }

        self.last_poll.send_replace(Some(Utc::now()));
        debug!(
            resource_class,
            created = summary.created,
            updated = summary.updated,
            renamed = summary.renamed,
            "poll applied"
        );
        summary
    }
}
