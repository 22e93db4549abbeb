// Gateway wire types
//
// Models for deCONZ REST resources and event-stream frames. Only the fields
// the bridge reasons about are typed; everything else the gateway sends is
// kept verbatim in `extra` so nothing is silently dropped on republish.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON object body, as found in `state` / `config` sub-objects.
pub type Fields = serde_json::Map<String, Value>;

/// Resource keys under which an `added` event carries the full object.
const ADDED_RESOURCE_KEYS: [&str; 3] = ["sensor", "light", "group"];

// ── REST snapshot ────────────────────────────────────────────────────

/// One endpoint as returned by `GET /api/{key}/{resource_class}`.
///
/// ```json
/// { "name": "aqa-wd-5c91b3", "type": "ZHAOpenClose",
///   "state": { "open": false, "lastupdated": "2020-04-30T12:07:30" },
///   "config": { "battery": 100, "temperature": 2400 },
///   "uniqueid": "00:15:8d:00:04:5c:91:b3-01-0006" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Fields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Fields>,
    /// Vendor metadata: `type`, `modelid`, `manufacturername`, `uniqueid`, ...
    #[serde(flatten)]
    pub extra: Fields,
}

impl EndpointSnapshot {
    /// Gateway device type, e.g. `"ZHAPresence"`.
    pub fn kind(&self) -> Option<&str> {
        self.extra.get("type").and_then(Value::as_str)
    }

    pub fn model_id(&self) -> Option<&str> {
        self.extra.get("modelid").and_then(Value::as_str)
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.extra.get("uniqueid").and_then(Value::as_str)
    }
}

// ── Stream frame ─────────────────────────────────────────────────────

/// A device delta pushed over the event WebSocket.
///
/// A single frame usually carries either `state` or `config`, never
/// necessarily both:
///
/// ```json
/// { "t": "event", "e": "changed", "r": "sensors", "id": "2",
///   "state": { "open": true, "lastupdated": "2020-04-30T13:44:47" },
///   "uniqueid": "00:15:8d:00:04:5c:91:b3-01-0006" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Resource class (`"sensors"`, `"lights"`, ...).
    #[serde(default, rename = "r", skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Local id within the resource class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Fields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Fields>,
    /// All remaining fields (`t`, `e`, `uniqueid`, ...).
    #[serde(flatten)]
    pub extra: Fields,
}

impl StreamMessage {
    /// Event kind (`"changed"`, `"added"`, `"deleted"`, `"scene-called"`).
    pub fn event_kind(&self) -> Option<&str> {
        self.extra.get("e").and_then(Value::as_str)
    }

    /// `(resource_class, local_id)` if both are present.
    pub fn address(&self) -> Option<(&str, &str)> {
        Some((self.resource.as_deref()?, self.id.as_deref()?))
    }

    /// The full resource object of an `added` event, if this is one.
    pub fn added_resource(&self) -> Option<EndpointSnapshot> {
        if self.event_kind() != Some("added") {
            return None;
        }
        ADDED_RESOURCE_KEYS
            .iter()
            .find_map(|key| self.extra.get(*key))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

// ── Gateway config ───────────────────────────────────────────────────

/// Subset of `GET /api/{key}/config` used to locate the event stream.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub apiversion: Option<String>,
    #[serde(default)]
    pub websocketport: Option<u16>,
    #[serde(flatten)]
    pub extra: Fields,
}

// ── Error envelope ───────────────────────────────────────────────────

/// deCONZ reports failures as `[{"error": {"type", "address", "description"}}]`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorItem {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: u16,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub description: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_keeps_vendor_fields() {
        let snap: EndpointSnapshot = serde_json::from_value(serde_json::json!({
            "name": "aqa-mot-6657d3",
            "type": "ZHAPresence",
            "modelid": "lumi.sensor_motion.aq2",
            "uniqueid": "00:15:8d:00:04:66:57:d3-01-0406",
            "state": { "presence": true },
            "config": { "temperature": 2300, "duration": 90 }
        }))
        .unwrap();

        assert_eq!(snap.name.as_deref(), Some("aqa-mot-6657d3"));
        assert_eq!(snap.kind(), Some("ZHAPresence"));
        assert_eq!(snap.model_id(), Some("lumi.sensor_motion.aq2"));
        assert_eq!(snap.unique_id(), Some("00:15:8d:00:04:66:57:d3-01-0406"));
        assert_eq!(snap.config.unwrap()["temperature"], 2300);
        assert!(!snap.extra.contains_key("state"));
    }

    #[test]
    fn stream_message_address_and_kind() {
        let msg: StreamMessage = serde_json::from_str(
            r#"{"t":"event","e":"changed","r":"sensors","id":"2","state":{"open":true}}"#,
        )
        .unwrap();

        assert_eq!(msg.address(), Some(("sensors", "2")));
        assert_eq!(msg.event_kind(), Some("changed"));
        assert!(msg.config.is_none());
        assert!(msg.added_resource().is_none());
    }

    #[test]
    fn stream_message_without_address() {
        let msg: StreamMessage = serde_json::from_str(r#"{"t":"event","e":"changed"}"#).unwrap();
        assert_eq!(msg.address(), None);
    }

    #[test]
    fn added_event_exposes_resource_object() {
        let msg: StreamMessage = serde_json::from_value(serde_json::json!({
            "t": "event", "e": "added", "r": "sensors", "id": "7",
            "sensor": { "name": "aqa-wd-aa11bb", "type": "ZHAOpenClose",
                        "state": { "open": false } }
        }))
        .unwrap();

        let snap = msg.added_resource().unwrap();
        assert_eq!(snap.name.as_deref(), Some("aqa-wd-aa11bb"));
        assert_eq!(snap.state.unwrap()["open"], false);
    }

    #[test]
    fn stream_message_serializes_back_with_extras() {
        let raw = serde_json::json!({
            "e": "changed", "r": "sensors", "id": "3",
            "config": { "battery": 99 }, "uniqueid": "00:15:8d"
        });
        let msg: StreamMessage = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&msg).unwrap(), raw);
    }
}
