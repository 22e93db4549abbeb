// ── Enrichment engine ──
//
// Turns a raw stream delta into an outbound message: resolves the
// gateway address to a stable device name, merges the delta into the
// registry, derives at most one semantic event from observed state
// changes, and adds standardized value fields.
//
// Output fields:
//   acp_ts           "1588252187.123456" (seconds, 6 decimals)
//   acp_id           resolved stable id
//   acp_event        e.g. "openclose"           (optional)
//   acp_event_value  e.g. "open"                 (optional)
//   <target>         standardized values, e.g. acp_temperature

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;
use tracing::debug;

use zigbridge_api::StreamMessage;

use crate::model::{EndpointKey, Fields};
use crate::store::DeviceRegistry;

// ── Rules ────────────────────────────────────────────────────────────

/// Maps a changed `state` field to a semantic event.
///
/// With both `when_true` and `when_false` set, the rule only fires for
/// boolean values and names them. With neither, the new value is passed
/// through as the event value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRule {
    pub field: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_true: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_false: Option<String>,
}

impl EventRule {
    pub fn boolean(
        field: impl Into<String>,
        event: impl Into<String>,
        when_true: impl Into<String>,
        when_false: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            event: event.into(),
            when_true: Some(when_true.into()),
            when_false: Some(when_false.into()),
        }
    }

    pub fn pass_through(field: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            event: event.into(),
            when_true: None,
            when_false: None,
        }
    }

    /// Event value for `new`, or `None` if this rule does not apply to it.
    fn value_for(&self, new: &Value) -> Option<Value> {
        match (&self.when_true, &self.when_false) {
            (Some(t), Some(f)) => new
                .as_bool()
                .map(|b| Value::String(if b { t.clone() } else { f.clone() })),
            (None, None) => Some(new.clone()),
            // Half-specified rules are rejected at config load.
            _ => None,
        }
    }
}

/// Which sub-object a standard value is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubObject {
    State,
    Config,
}

/// `target = message[source][field] / scale`, when the field is numeric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardRule {
    pub source: SubObject,
    pub field: String,
    pub target: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

/// The configurable part of enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRules {
    /// Checked in order of the delta's `state` fields; first match wins.
    pub events: Vec<EventRule>,
    pub standard: Vec<StandardRule>,
}

impl Default for EnrichmentRules {
    fn default() -> Self {
        Self {
            events: vec![EventRule::boolean("open", "openclose", "open", "close")],
            standard: vec![StandardRule {
                source: SubObject::Config,
                field: "temperature".into(),
                target: "acp_temperature".into(),
                scale: 100.0,
            }],
        }
    }
}

impl EnrichmentRules {
    fn event_rule(&self, field: &str) -> Option<&EventRule> {
        self.events.iter().find(|r| r.field == field)
    }
}

// ── Output ───────────────────────────────────────────────────────────

/// A derived `(acp_event, acp_event_value)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedEvent {
    pub event: String,
    pub value: Value,
}

/// The inbound delta with `acp_*` fields added.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedMessage {
    pub key: EndpointKey,
    pub stable_id: String,
    pub event: Option<DerivedEvent>,
    /// Full outbound JSON object.
    pub body: Fields,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnrichError {
    #[error("unknown device {0}")]
    UnknownDevice(EndpointKey),

    #[error("message has no resource class or id")]
    Unaddressed,

    #[error("message is not a stream delta: {0}")]
    Invalid(String),
}

// ── Engine ───────────────────────────────────────────────────────────

/// `'{:.6}'` seconds since the epoch.
pub fn timestamp(at: DateTime<Utc>) -> String {
    let micros = at.timestamp_micros();
    format!("{}.{:06}", micros.div_euclid(1_000_000), micros.rem_euclid(1_000_000))
}

/// Enrich one stream delta against the registry, stamped with the current time.
pub fn enrich(
    registry: &DeviceRegistry,
    rules: &EnrichmentRules,
    message: Fields,
) -> Result<EnrichedMessage, EnrichError> {
    enrich_at(registry, rules, message, Utc::now())
}

/// As [`enrich`], with an explicit timestamp.
pub fn enrich_at(
    registry: &DeviceRegistry,
    rules: &EnrichmentRules,
    mut body: Fields,
    now: DateTime<Utc>,
) -> Result<EnrichedMessage, EnrichError> {
    let delta: StreamMessage = serde_json::from_value(Value::Object(body.clone()))
        .map_err(|e| EnrichError::Invalid(e.to_string()))?;
    let (class, id) = delta.address().ok_or(EnrichError::Unaddressed)?;
    let key = EndpointKey::new(class, id);

    // Devices paired between polls announce themselves with `e: added`.
    if let Some(snapshot) = delta.added_resource() {
        registry.upsert_from_poll(class, id, &snapshot);
    }

    let merge = registry
        .apply_stream_delta(
            &key,
            delta.name.as_deref(),
            delta.state.as_ref(),
            delta.config.as_ref(),
        )
        .ok_or_else(|| EnrichError::UnknownDevice(key.clone()))?;

    body.insert("acp_ts".into(), Value::String(timestamp(now)));
    body.insert("acp_id".into(), Value::String(merge.stable_id.clone()));

    let event = delta
        .state
        .as_ref()
        .and_then(|state| derive_event(rules, state, &merge.baseline_state));
    if let Some(ref ev) = event {
        debug!(stable_id = %merge.stable_id, event = %ev.event, value = %ev.value, "state change");
        body.insert("acp_event".into(), Value::String(ev.event.clone()));
        body.insert("acp_event_value".into(), ev.value.clone());
    }

    for rule in &rules.standard {
        let source = match rule.source {
            SubObject::State => delta.state.as_ref(),
            SubObject::Config => delta.config.as_ref(),
        };
        if let Some(value) = standard_value(source, rule) {
            body.insert(rule.target.clone(), value);
        }
    }

    Ok(EnrichedMessage {
        key,
        stable_id: merge.stable_id,
        event,
        body,
    })
}

/// First `state` field, in message order, with a rule whose prior value
/// existed and differs.
fn derive_event(rules: &EnrichmentRules, state: &Fields, baseline: &Fields) -> Option<DerivedEvent> {
    state.iter().find_map(|(field, new)| {
        let rule = rules.event_rule(field)?;
        let old = baseline.get(field)?;
        if old == new {
            return None;
        }
        rule.value_for(new).map(|value| DerivedEvent {
            event: rule.event.clone(),
            value,
        })
    })
}

fn standard_value(source: Option<&Fields>, rule: &StandardRule) -> Option<Value> {
    let raw = source?.get(&rule.field)?.as_f64()?;
    Number::from_f64(raw / rule.scale).map(Value::Number)
}
