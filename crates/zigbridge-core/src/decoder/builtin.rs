// ── Built-in decoders ──

use serde_json::{Map, Value};

use super::{DecodeError, Decoder, DecoderInput};

/// Gateway envelope keys with no meaning downstream.
const ENVELOPE_KEYS: [&str; 4] = ["e", "t", "r", "id"];

/// Flattens a deCONZ event into one level: `state` and `config` fields
/// move to the top, the envelope (`e`, `t`, `r`, `id`) is dropped, and
/// everything else (including `acp_*`) is kept. Top-level keys win over
/// `state`, which wins over `config`.
pub struct DeconzDecoder;

impl Decoder for DeconzDecoder {
    fn name(&self) -> &str {
        "deconz"
    }

    fn test(&self, input: &DecoderInput<'_>) -> bool {
        input.object().is_some_and(|obj| {
            obj.contains_key("r") && (obj.contains_key("state") || obj.contains_key("config"))
        })
    }

    fn decode(&self, input: &DecoderInput<'_>) -> Result<Value, DecodeError> {
        let obj = input.object().ok_or_else(|| DecodeError::Failed {
            decoder: self.name().to_owned(),
            reason: "payload is not a JSON object".into(),
        })?;

        let mut out = Map::new();
        for (k, v) in obj {
            if ENVELOPE_KEYS.contains(&k.as_str()) || k == "state" || k == "config" {
                continue;
            }
            out.insert(k.clone(), v.clone());
        }
        for section in ["state", "config"] {
            if let Some(Value::Object(fields)) = obj.get(section) {
                for (k, v) in fields {
                    out.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
        }
        Ok(Value::Object(out))
    }
}

/// Passes through any JSON object that already carries `acp_id`.
pub struct AcpJsonDecoder;

impl Decoder for AcpJsonDecoder {
    fn name(&self) -> &str {
        "acp_json"
    }

    fn test(&self, input: &DecoderInput<'_>) -> bool {
        input.object().is_some_and(|obj| obj.contains_key("acp_id"))
    }

    fn decode(&self, input: &DecoderInput<'_>) -> Result<Value, DecodeError> {
        input.json.cloned().ok_or_else(|| DecodeError::Failed {
            decoder: self.name().to_owned(),
            reason: "no JSON payload".into(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn input(json: &Value) -> DecoderInput<'_> {
        DecoderInput {
            topic: None,
            payload: b"",
            json: Some(json),
        }
    }

    #[test]
    fn deconz_flattens_and_strips_envelope() {
        let msg = json!({
            "t": "event", "e": "changed", "r": "sensors", "id": "2",
            "uniqueid": "00:15:8d:00:04:5c:91:b3-01-0006",
            "state": { "open": true, "lastupdated": "2020-04-30T13:44:47" },
            "config": { "battery": 100 },
            "acp_id": "aqa-wd-5c91b3", "acp_ts": "1588254287.000000"
        });

        assert!(DeconzDecoder.test(&input(&msg)));
        let out = DeconzDecoder.decode(&input(&msg)).unwrap();

        assert_eq!(
            out,
            json!({
                "uniqueid": "00:15:8d:00:04:5c:91:b3-01-0006",
                "acp_id": "aqa-wd-5c91b3", "acp_ts": "1588254287.000000",
                "open": true, "lastupdated": "2020-04-30T13:44:47",
                "battery": 100
            })
        );
    }

    #[test]
    fn deconz_state_wins_over_config() {
        let msg = json!({ "r": "sensors", "state": { "on": true }, "config": { "on": false } });
        let out = DeconzDecoder.decode(&input(&msg)).unwrap();
        assert_eq!(out["on"], json!(true));
    }

    #[test]
    fn deconz_ignores_non_gateway_messages() {
        assert!(!DeconzDecoder.test(&input(&json!({ "acp_id": "x", "temp": 21 }))));
        assert!(!DeconzDecoder.test(&input(&json!({ "r": "sensors" }))));
        assert!(!DeconzDecoder.test(&DecoderInput {
            topic: None,
            payload: b"raw",
            json: None
        }));
    }

    #[test]
    fn acp_json_passes_through() {
        let msg = json!({ "acp_id": "elsys-co2-0461", "co2": 412 });
        assert!(AcpJsonDecoder.test(&input(&msg)));
        assert_eq!(AcpJsonDecoder.decode(&input(&msg)).unwrap(), msg);
        assert!(!AcpJsonDecoder.test(&input(&json!({ "co2": 412 }))));
    }
}
