// ── Endpoint: one sensor or actuator channel ──

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Fields;

/// Gateway address of an endpoint: `("sensors", "3")`.
///
/// Local ids are only unique within a resource class, so both parts are
/// needed. Immutable once the endpoint exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointKey {
    pub resource_class: String,
    pub local_id: String,
}

impl EndpointKey {
    pub fn new(resource_class: impl Into<String>, local_id: impl Into<String>) -> Self {
        Self {
            resource_class: resource_class.into(),
            local_id: local_id.into(),
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_class, self.local_id)
    }
}

/// Latest known data for one endpoint, from both sources.
///
/// REST and stream sub-objects are tracked separately: the poller only
/// writes `rest_*`, the event stream only writes `stream_*`. Event
/// derivation compares against `stream_state`, never the polled view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Endpoint {
    pub key: EndpointKey,
    /// Name of the owning node; changes on rename.
    pub stable_id: String,

    pub rest_state: Fields,
    pub rest_config: Fields,
    /// Remaining vendor fields from the last snapshot (`type`, `modelid`, ...).
    pub rest_meta: Fields,

    pub stream_state: Fields,
    pub stream_config: Fields,

    pub last_polled: Option<DateTime<Utc>>,
    pub last_event: Option<DateTime<Utc>>,
}

impl Endpoint {
    pub fn new(key: EndpointKey, stable_id: impl Into<String>) -> Self {
        Self {
            key,
            stable_id: stable_id.into(),
            rest_state: Fields::new(),
            rest_config: Fields::new(),
            rest_meta: Fields::new(),
            stream_state: Fields::new(),
            stream_config: Fields::new(),
            last_polled: None,
            last_event: None,
        }
    }

    /// Gateway device type, e.g. `"ZHAOpenClose"`.
    pub fn kind(&self) -> Option<&str> {
        self.rest_meta.get("type").and_then(Value::as_str)
    }

    pub fn model_id(&self) -> Option<&str> {
        self.rest_meta.get("modelid").and_then(Value::as_str)
    }

    /// Most recent timestamp from either source.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        match (self.last_polled, self.last_event) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn key_display_and_order() {
        let a = EndpointKey::new("lights", "9");
        let b = EndpointKey::new("sensors", "1");
        assert_eq!(b.to_string(), "sensors/1");
        assert!(a < b);
        assert_ne!(EndpointKey::new("lights", "1"), EndpointKey::new("sensors", "1"));
    }

    #[test]
    fn last_seen_takes_latest_source() {
        let mut ep = Endpoint::new(EndpointKey::new("sensors", "1"), "x");
        assert!(ep.last_seen().is_none());

        let early = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().to_utc();
        let late = DateTime::parse_from_rfc3339("2026-01-01T00:05:00Z").unwrap().to_utc();
        ep.last_polled = Some(late);
        ep.last_event = Some(early);
        assert_eq!(ep.last_seen(), Some(late));
    }
}
