// ── Stream delta application ──
//
// The enrichment critical section: rename, capture the prior stream view,
// overwrite the sub-objects carried by the delta. All under one write lock
// so concurrent deltas for the same endpoint see a consistent baseline.

use chrono::Utc;

use super::DeviceRegistry;
use crate::model::{EndpointKey, Fields};

/// Result of merging one stream delta.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMerge {
    /// Stable id after any rename.
    pub stable_id: String,
    /// Previous stable id, if this delta renamed the endpoint.
    pub renamed_from: Option<String>,
    /// `stream_state` as it was before this delta.
    pub baseline_state: Fields,
    /// `stream_config` as it was before this delta.
    pub baseline_config: Fields,
}

impl DeviceRegistry {
    /// Merge a stream delta into a known endpoint.
    ///
    /// Returns `None` if the endpoint is unknown. A sub-object missing from
    /// the delta leaves the stored one untouched.
    pub fn apply_stream_delta(
        &self,
        key: &EndpointKey,
        name: Option<&str>,
        state: Option<&Fields>,
        config: Option<&Fields>,
    ) -> Option<StreamMerge> {
        let now = Utc::now();
        let mut indices = self.indices.write();

        if !indices.endpoints.contains_key(key) {
            return None;
        }
        let renamed_from = name.and_then(|n| indices.rename(key, n));

        let endpoint = indices.endpoints.get_mut(key)?;
        let baseline_state = endpoint.stream_state.clone();
        let baseline_config = endpoint.stream_config.clone();
        if let Some(state) = state {
            endpoint.stream_state.clone_from(state);
        }
        if let Some(config) = config {
            endpoint.stream_config.clone_from(config);
        }
        endpoint.last_event = Some(now);
        let stable_id = endpoint.stable_id.clone();
        drop(indices);

        self.last_stream_delta.send_replace(Some(now));

        Some(StreamMerge {
            stable_id,
            renamed_from,
            baseline_state,
            baseline_config,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::Endpoint;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().unwrap().clone()
    }

    fn registry_with_door() -> (DeviceRegistry, EndpointKey) {
        let registry = DeviceRegistry::new();
        let key = EndpointKey::new("sensors", "2");
        registry
            .indices
            .write()
            .insert(Endpoint::new(key.clone(), "aqa-wd-5c91b3"));
        (registry, key)
    }

    #[test]
    fn unknown_endpoint_is_none() {
        let registry = DeviceRegistry::new();
        let merge = registry.apply_stream_delta(&EndpointKey::new("sensors", "99"), None, None, None);
        assert!(merge.is_none());
        assert!(registry.last_stream_delta().is_none());
    }

    #[test]
    fn baseline_is_previous_stream_view() {
        let (registry, key) = registry_with_door();

        let first = registry
            .apply_stream_delta(&key, None, Some(&fields(json!({ "open": false }))), None)
            .unwrap();
        assert!(first.baseline_state.is_empty());

        let second = registry
            .apply_stream_delta(&key, None, Some(&fields(json!({ "open": true }))), None)
            .unwrap();
        assert_eq!(second.baseline_state["open"], json!(false));
        assert_eq!(second.stable_id, "aqa-wd-5c91b3");
        assert!(registry.last_stream_delta().is_some());
    }

    #[test]
    fn config_delta_leaves_state_alone() {
        let (registry, key) = registry_with_door();
        registry.apply_stream_delta(&key, None, Some(&fields(json!({ "open": true }))), None);
        registry.apply_stream_delta(&key, None, None, Some(&fields(json!({ "battery": 95 }))));

        let ep = registry.lookup("sensors", "2").unwrap();
        assert_eq!(ep.stream_state["open"], json!(true));
        assert_eq!(ep.stream_config["battery"], json!(95));
    }

    #[test]
    fn state_delta_leaves_config_alone() {
        let (registry, key) = registry_with_door();
        registry.apply_stream_delta(&key, None, None, Some(&fields(json!({ "temperature": 2400 }))));
        registry.apply_stream_delta(&key, None, Some(&fields(json!({ "open": false }))), None);

        let ep = registry.lookup("sensors", "2").unwrap();
        assert_eq!(ep.stream_config["temperature"], json!(2400));
    }

    #[test]
    fn delta_name_renames_atomically() {
        let (registry, key) = registry_with_door();

        let merge = registry
            .apply_stream_delta(&key, Some("front-door"), None, None)
            .unwrap();

        assert_eq!(merge.stable_id, "front-door");
        assert_eq!(merge.renamed_from.as_deref(), Some("aqa-wd-5c91b3"));
        assert!(registry.node("aqa-wd-5c91b3").is_none());
        assert!(registry.node("front-door").unwrap().contains(&key));
    }
}
