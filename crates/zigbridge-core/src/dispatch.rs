// ── Dispatcher ──
//
// Single consumer of every inbound message. Each message goes through:
//   loop filter → JSON parse → enrichment → decoder chain → publish sink
// and yields a `DispatchOutcome`. Nothing here is retried; a message that
// cannot be handled is dropped and logged with its raw payload.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use zigbridge_api::MqttPublisher;

use crate::decoder::{DecoderChain, DecoderInput};
use crate::enrich::{self, EnrichError, EnrichmentRules};
use crate::error::CoreError;
use crate::model::EndpointKey;
use crate::store::DeviceRegistry;

// ── Inbound messages ─────────────────────────────────────────────────

/// Where a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSource {
    /// The gateway event WebSocket.
    GatewayStream,
    /// The optional input broker.
    MqttInput,
}

#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// MQTT topic; `None` for stream frames.
    pub topic: Option<String>,
    pub payload: Bytes,
    pub source: MessageSource,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn from_stream(text: String) -> Self {
        Self {
            topic: None,
            payload: Bytes::from(text),
            source: MessageSource::GatewayStream,
            received_at: Utc::now(),
        }
    }

    pub fn from_mqtt(topic: String, payload: Bytes) -> Self {
        Self {
            topic: Some(topic),
            payload,
            source: MessageSource::MqttInput,
            received_at: Utc::now(),
        }
    }

    fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

// ── Outcomes ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Topic carries our own output prefix.
    Loopback,
    Malformed(String),
    UnknownDevice(EndpointKey),
    Unaddressed,
    /// No decoder accepted the message.
    Undecoded,
    DecodeFailed { decoder: String, reason: String },
    /// Neither an inbound topic nor an `acp_id` to name the output.
    NoTopic,
    PublishFailed(String),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loopback => f.write_str("loopback"),
            Self::Malformed(e) => write!(f, "malformed payload: {e}"),
            Self::UnknownDevice(key) => write!(f, "unknown device {key}"),
            Self::Unaddressed => f.write_str("no resource address"),
            Self::Undecoded => f.write_str("no decoder matched"),
            Self::DecodeFailed { decoder, reason } => write!(f, "{decoder} failed: {reason}"),
            Self::NoTopic => f.write_str("no output topic"),
            Self::PublishFailed(e) => write!(f, "publish failed: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Published { topic: String },
    Previewed { topic: String },
    Dropped(DropReason),
}

// ── Sinks ────────────────────────────────────────────────────────────

/// Destination for outbound messages. Fire-and-forget: implementations
/// must not block.
pub trait PublishSink: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), CoreError>;
}

impl PublishSink for MqttPublisher {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), CoreError> {
        Ok(MqttPublisher::publish(self, topic, payload.to_vec())?)
    }
}

/// Logs pretty-printed messages instead of publishing them.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreviewSink;

impl PreviewSink {
    fn show(topic: &str, body: &Value) {
        let pretty = serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string());
        info!(topic, "preview\n{pretty}");
    }
}

impl PublishSink for PreviewSink {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), CoreError> {
        match serde_json::from_slice::<Value>(payload) {
            Ok(body) => Self::show(topic, &body),
            Err(_) => info!(topic, payload = %String::from_utf8_lossy(payload), "preview"),
        }
        Ok(())
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────

/// Per-dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub output_prefix: String,
    pub rules: EnrichmentRules,
    /// Enrich MQTT input too, not just stream frames.
    pub enrich_mqtt: bool,
    /// Preview instead of publishing.
    pub debug: bool,
}

pub struct Dispatcher {
    registry: Arc<DeviceRegistry>,
    chain: Arc<DecoderChain>,
    settings: DispatchSettings,
    sink: Arc<dyn PublishSink>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        chain: Arc<DecoderChain>,
        settings: DispatchSettings,
        sink: Arc<dyn PublishSink>,
    ) -> Self {
        Self {
            registry,
            chain,
            settings,
            sink,
        }
    }

    /// Handle one message end to end.
    pub fn dispatch(&self, msg: &InboundMessage) -> DispatchOutcome {
        let outcome = self.process(msg);
        match outcome {
            DispatchOutcome::Dropped(DropReason::Loopback) => {
                debug!(topic = ?msg.topic, "dropped own publish");
            }
            DispatchOutcome::Dropped(DropReason::UnknownDevice(ref key)) => {
                info!(endpoint = %key, payload = %msg.payload_lossy(), "not sent: unknown device");
            }
            DispatchOutcome::Dropped(ref reason) => {
                warn!(%reason, topic = ?msg.topic, payload = %msg.payload_lossy(), "not sent");
            }
            DispatchOutcome::Published { ref topic } => debug!(topic = %topic, "published"),
            DispatchOutcome::Previewed { .. } => {}
        }
        outcome
    }

    fn process(&self, msg: &InboundMessage) -> DispatchOutcome {
        if let Some(ref topic) = msg.topic {
            if topic.starts_with(&self.settings.output_prefix) {
                return DispatchOutcome::Dropped(DropReason::Loopback);
            }
        }

        let parsed = serde_json::from_slice::<Value>(&msg.payload);
        let decoding = !self.chain.is_empty();
        let enriching = match msg.source {
            MessageSource::GatewayStream => true,
            MessageSource::MqttInput => self.settings.enrich_mqtt,
        };

        // Raw payloads are only useful to a decoder that reads bytes.
        let mut json = match parsed {
            Ok(value) => Some(value),
            Err(e) if enriching || !decoding => {
                return DispatchOutcome::Dropped(DropReason::Malformed(e.to_string()));
            }
            Err(_) => None,
        };

        if enriching {
            let Some(Value::Object(obj)) = json.take() else {
                return DispatchOutcome::Dropped(DropReason::Malformed(
                    "expected a JSON object".into(),
                ));
            };
            match enrich::enrich(&self.registry, &self.settings.rules, obj) {
                Ok(enriched) => json = Some(Value::Object(enriched.body)),
                Err(EnrichError::UnknownDevice(key)) => {
                    return DispatchOutcome::Dropped(DropReason::UnknownDevice(key));
                }
                Err(EnrichError::Unaddressed) => {
                    return DispatchOutcome::Dropped(DropReason::Unaddressed);
                }
                Err(EnrichError::Invalid(e)) => {
                    return DispatchOutcome::Dropped(DropReason::Malformed(e));
                }
            }
        }

        let mut body = if decoding {
            let input = DecoderInput {
                topic: msg.topic.as_deref(),
                payload: &msg.payload,
                json: json.as_ref(),
            };
            let Some(decoded) = self.chain.decode(&input) else {
                return DispatchOutcome::Dropped(DropReason::Undecoded);
            };
            match decoded.output {
                Ok(value) => value,
                Err(e) => {
                    return DispatchOutcome::Dropped(DropReason::DecodeFailed {
                        decoder: decoded.decoder,
                        reason: e.to_string(),
                    });
                }
            }
        } else {
            // Not decoding implies the payload parsed.
            json.unwrap_or(Value::Null)
        };

        if let Value::Object(ref mut obj) = body {
            if !obj.contains_key("acp_ts") {
                obj.insert(
                    "acp_ts".into(),
                    Value::String(enrich::timestamp(msg.received_at)),
                );
            }
        }

        let Some(topic) = self.output_topic(msg, &body) else {
            return DispatchOutcome::Dropped(DropReason::NoTopic);
        };

        if self.settings.debug {
            PreviewSink::show(&topic, &body);
            return DispatchOutcome::Previewed { topic };
        }

        let payload = match serde_json::to_vec(&body) {
            Ok(p) => p,
            Err(e) => return DispatchOutcome::Dropped(DropReason::Malformed(e.to_string())),
        };
        match self.sink.publish(&topic, &payload) {
            Ok(()) => DispatchOutcome::Published { topic },
            Err(e) => DispatchOutcome::Dropped(DropReason::PublishFailed(e.to_string())),
        }
    }

    /// `prefix + inbound topic`, or `prefix + acp_id` for stream frames.
    fn output_topic(&self, msg: &InboundMessage, body: &Value) -> Option<String> {
        let suffix = match msg.topic {
            Some(ref t) => t.as_str(),
            None => body.get("acp_id").and_then(Value::as_str)?,
        };
        Some(format!("{}{suffix}", self.settings.output_prefix))
    }

    /// Drain `rx` until it closes or `cancel` fires.
    pub async fn run(self, mut rx: mpsc::Receiver<InboundMessage>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    self.dispatch(&msg);
                }
            }
        }
        debug!("dispatcher exiting");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::decoder::DecoderRegistry;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<(String, Value)>>,
    }

    impl PublishSink for Recording {
        fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), CoreError> {
            let body = serde_json::from_slice(payload).unwrap();
            self.sent.lock().push((topic.to_owned(), body));
            Ok(())
        }
    }

    struct Failing;

    impl PublishSink for Failing {
        fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<(), CoreError> {
            Err(CoreError::Publish {
                message: "queue full".into(),
            })
        }
    }

    fn settings() -> DispatchSettings {
        DispatchSettings {
            output_prefix: "acp/".into(),
            rules: EnrichmentRules::default(),
            enrich_mqtt: false,
            debug: false,
        }
    }

    fn setup(decoders: &[&str], settings: DispatchSettings) -> (Dispatcher, Arc<Recording>) {
        let registry = Arc::new(DeviceRegistry::new());
        let snap = serde_json::from_value(json!({ "name": "aqa-wd-5c91b3" })).unwrap();
        registry.upsert_from_poll("sensors", "2", &snap);

        let chain = Arc::new(DecoderChain::empty());
        let names: Vec<String> = decoders.iter().map(|s| (*s).to_owned()).collect();
        chain.rebuild(&DecoderRegistry::with_builtins(), &names).unwrap();

        let sink = Arc::new(Recording::default());
        let dispatcher = Dispatcher::new(registry, chain, settings, sink.clone());
        (dispatcher, sink)
    }

    fn stream(value: Value) -> InboundMessage {
        InboundMessage::from_stream(value.to_string())
    }

    #[test]
    fn stream_frame_is_enriched_and_published_by_acp_id() {
        let (dispatcher, sink) = setup(&[], settings());

        let outcome = dispatcher.dispatch(&stream(
            json!({ "e": "changed", "r": "sensors", "id": "2", "state": { "open": true } }),
        ));

        assert_eq!(
            outcome,
            DispatchOutcome::Published {
                topic: "acp/aqa-wd-5c91b3".into()
            }
        );
        let sent = sink.sent.lock();
        assert_eq!(sent[0].1["acp_id"], json!("aqa-wd-5c91b3"));
        assert_eq!(sent[0].1["state"], json!({ "open": true }));
    }

    #[test]
    fn loopback_topics_are_dropped_first() {
        let (dispatcher, sink) = setup(&["acp_json"], settings());

        let outcome = dispatcher.dispatch(&InboundMessage::from_mqtt(
            "acp/aqa-wd-5c91b3".into(),
            Bytes::from_static(b"not even json"),
        ));

        assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::Loopback));
        assert!(sink.sent.lock().is_empty());
    }

    #[test]
    fn unknown_device_is_not_sent() {
        let (dispatcher, sink) = setup(&[], settings());
        let outcome = dispatcher.dispatch(&stream(
            json!({ "r": "sensors", "id": "99", "state": { "open": true } }),
        ));
        assert_eq!(
            outcome,
            DispatchOutcome::Dropped(DropReason::UnknownDevice(EndpointKey::new("sensors", "99")))
        );
        assert!(sink.sent.lock().is_empty());
    }

    #[test]
    fn malformed_stream_frame_is_dropped() {
        let (dispatcher, _) = setup(&[], settings());
        let outcome = dispatcher.dispatch(&InboundMessage::from_stream("{oops".into()));
        assert!(matches!(outcome, DispatchOutcome::Dropped(DropReason::Malformed(_))));
    }

    #[test]
    fn mqtt_input_keeps_its_topic() {
        let (dispatcher, sink) = setup(&["acp_json"], settings());

        let outcome = dispatcher.dispatch(&InboundMessage::from_mqtt(
            "elsys/elsys-co2-0461".into(),
            Bytes::from(json!({ "acp_id": "elsys-co2-0461", "co2": 412 }).to_string()),
        ));

        assert_eq!(
            outcome,
            DispatchOutcome::Published {
                topic: "acp/elsys/elsys-co2-0461".into()
            }
        );
        // Receipt time fills in the missing timestamp.
        assert!(sink.sent.lock()[0].1["acp_ts"].is_string());
    }

    #[test]
    fn undecoded_message_is_dropped() {
        let (dispatcher, _) = setup(&["acp_json"], settings());
        let outcome = dispatcher.dispatch(&InboundMessage::from_mqtt(
            "other/topic".into(),
            Bytes::from_static(b"{\"temp\": 21}"),
        ));
        assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::Undecoded));
    }

    #[test]
    fn decoder_sees_enriched_stream_frame() {
        let (dispatcher, sink) = setup(&["deconz"], settings());

        dispatcher.dispatch(&stream(
            json!({ "e": "changed", "r": "sensors", "id": "2", "config": { "temperature": 2400 } }),
        ));

        let sent = sink.sent.lock();
        assert_eq!(sent[0].0, "acp/aqa-wd-5c91b3");
        assert_eq!(sent[0].1["temperature"], json!(2400));
        assert_eq!(sent[0].1["acp_temperature"], json!(24.0));
        assert!(sent[0].1.get("r").is_none());
    }

    #[test]
    fn mqtt_enrichment_when_enabled() {
        let mut s = settings();
        s.enrich_mqtt = true;
        let (dispatcher, sink) = setup(&[], s);

        dispatcher.dispatch(&InboundMessage::from_mqtt(
            "deconz/events".into(),
            Bytes::from(json!({ "r": "sensors", "id": "2", "state": { "open": false } }).to_string()),
        ));

        assert_eq!(sink.sent.lock()[0].1["acp_id"], json!("aqa-wd-5c91b3"));
    }

    #[test]
    fn debug_previews_instead_of_publishing() {
        let mut s = settings();
        s.debug = true;
        let (dispatcher, sink) = setup(&[], s);

        let outcome = dispatcher.dispatch(&stream(
            json!({ "r": "sensors", "id": "2", "state": { "open": true } }),
        ));

        assert_eq!(
            outcome,
            DispatchOutcome::Previewed {
                topic: "acp/aqa-wd-5c91b3".into()
            }
        );
        assert!(sink.sent.lock().is_empty());
    }

    #[test]
    fn publish_failure_is_reported() {
        let registry = Arc::new(DeviceRegistry::new());
        let dispatcher = Dispatcher::new(
            registry,
            Arc::new(DecoderChain::empty()),
            settings(),
            Arc::new(Failing),
        );

        let outcome = dispatcher.dispatch(&InboundMessage::from_mqtt(
            "x".into(),
            Bytes::from_static(b"{}"),
        ));
        assert!(matches!(outcome, DispatchOutcome::Dropped(DropReason::PublishFailed(_))));
    }

    #[tokio::test]
    async fn run_drains_channel_until_closed() {
        let (dispatcher, sink) = setup(&[], settings());
        let (tx, rx) = mpsc::channel(8);

        tx.send(stream(json!({ "r": "sensors", "id": "2", "state": { "open": true } })))
            .await
            .unwrap();
        drop(tx);

        dispatcher.run(rx, CancellationToken::new()).await;
        assert_eq!(sink.sent.lock().len(), 1);
    }
}
