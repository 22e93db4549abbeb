#![allow(clippy::unwrap_used)]

// End-to-end: a mocked gateway poll fills the registry, then stream
// frames and MQTT input run through the dispatcher into a recording sink.

use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use zigbridge_api::GatewayClient;
use zigbridge_core::{
    CoreError, DecoderChain, DecoderRegistry, DeviceRegistry, DispatchOutcome, DispatchSettings,
    Dispatcher, DropReason, EnrichmentRules, EventRule, InboundMessage, PublishSink, poll_once,
};

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<(String, Value)>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<(String, Value)> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl PublishSink for RecordingSink {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), CoreError> {
        let body = serde_json::from_slice(payload).unwrap();
        self.sent.lock().push((topic.to_owned(), body));
        Ok(())
    }
}

async fn setup() -> (MockServer, GatewayClient) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sensors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "3": {
                "name": "aqa-mot-6657",
                "type": "ZHAPresence",
                "config": { "temperature": 2300 },
                "state": { "presence": false }
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/lights"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let client =
        GatewayClient::with_client(reqwest::Client::new(), Url::parse(&server.uri()).unwrap());
    (server, client)
}

fn rules() -> EnrichmentRules {
    let mut rules = EnrichmentRules::default();
    rules
        .events
        .push(EventRule::boolean("presence", "motion", "detected", "clear"));
    rules
}

fn dispatcher(
    registry: &Arc<DeviceRegistry>,
    chain: DecoderChain,
    sink: &Arc<RecordingSink>,
) -> Dispatcher {
    Dispatcher::new(
        Arc::clone(registry),
        Arc::new(chain),
        DispatchSettings {
            output_prefix: "acp/".into(),
            rules: rules(),
            enrich_mqtt: false,
            debug: false,
        },
        Arc::clone(sink) as Arc<dyn PublishSink>,
    )
}

fn frame(value: Value) -> InboundMessage {
    InboundMessage::from_stream(value.to_string())
}

#[tokio::test]
async fn poll_then_stream_delta_is_enriched() {
    let (_server, client) = setup().await;
    let registry = Arc::new(DeviceRegistry::new());

    let summary = poll_once(&client, &registry, &["sensors".into(), "lights".into()])
        .await
        .unwrap();
    assert_eq!(summary.created, 1);

    let node = registry.node("aqa-mot-6657").unwrap();
    assert_eq!(node.len(), 1);
    let endpoint = registry.lookup("sensors", "3").unwrap();
    assert_eq!(endpoint.rest_config["temperature"], json!(2300));

    let sink = Arc::new(RecordingSink::default());
    let dispatch = dispatcher(&registry, DecoderChain::empty(), &sink);

    // No stream baseline yet: enriched but no event.
    let outcome = dispatch.dispatch(&frame(json!({
        "t": "event", "e": "changed", "r": "sensors", "id": "3",
        "state": { "presence": false }
    })));
    assert_eq!(outcome, DispatchOutcome::Published { topic: "acp/aqa-mot-6657".into() });

    let outcome = dispatch.dispatch(&frame(json!({
        "t": "event", "e": "changed", "r": "sensors", "id": "3",
        "state": { "presence": true }
    })));
    assert!(matches!(outcome, DispatchOutcome::Published { .. }));

    let sent = sink.take();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].1.get("acp_event").is_none());

    let (topic, body) = &sent[1];
    assert_eq!(topic, "acp/aqa-mot-6657");
    assert_eq!(body["acp_id"], json!("aqa-mot-6657"));
    assert_eq!(body["state"]["presence"], json!(true));
    assert_eq!(body["acp_event"], json!("motion"));
    assert_eq!(body["acp_event_value"], json!("detected"));
    assert!(body["acp_ts"].as_str().unwrap().contains('.'));
}

#[tokio::test]
async fn config_delta_adds_standard_temperature() {
    let (_server, client) = setup().await;
    let registry = Arc::new(DeviceRegistry::new());
    poll_once(&client, &registry, &["sensors".into()]).await.unwrap();

    let sink = Arc::new(RecordingSink::default());
    let dispatch = dispatcher(&registry, DecoderChain::empty(), &sink);
    dispatch.dispatch(&frame(json!({
        "r": "sensors", "id": "3", "config": { "temperature": 2450, "battery": 90 }
    })));

    let sent = sink.take();
    assert_eq!(sent[0].1["acp_temperature"], json!(24.5));
    // Poll view is untouched by the stream.
    assert_eq!(
        registry.lookup("sensors", "3").unwrap().rest_config["temperature"],
        json!(2300)
    );
}

#[tokio::test]
async fn unknown_device_is_not_sent() {
    let (_server, client) = setup().await;
    let registry = Arc::new(DeviceRegistry::new());
    poll_once(&client, &registry, &["sensors".into()]).await.unwrap();

    let sink = Arc::new(RecordingSink::default());
    let dispatch = dispatcher(&registry, DecoderChain::empty(), &sink);
    let outcome = dispatch.dispatch(&frame(json!({
        "r": "sensors", "id": "42", "state": { "open": true }
    })));

    assert!(matches!(outcome, DispatchOutcome::Dropped(DropReason::UnknownDevice(_))));
    assert!(sink.take().is_empty());
}

#[tokio::test]
async fn decoded_stream_output_is_flattened() {
    let (_server, client) = setup().await;
    let registry = Arc::new(DeviceRegistry::new());
    poll_once(&client, &registry, &["sensors".into()]).await.unwrap();

    let chain = DecoderChain::empty();
    chain
        .rebuild(&DecoderRegistry::with_builtins(), &["deconz".into()])
        .unwrap();

    let sink = Arc::new(RecordingSink::default());
    let dispatch = dispatcher(&registry, chain, &sink);
    dispatch.dispatch(&frame(json!({
        "t": "event", "e": "changed", "r": "sensors", "id": "3",
        "state": { "presence": true, "lastupdated": "2020-04-30T13:44:47" }
    })));

    let sent = sink.take();
    let (topic, body) = &sent[0];
    assert_eq!(topic, "acp/aqa-mot-6657");
    assert_eq!(body["presence"], json!(true));
    assert_eq!(body["acp_id"], json!("aqa-mot-6657"));
    assert!(body.get("r").is_none());
}

#[tokio::test]
async fn run_loop_handles_mqtt_input_and_loopback() {
    let registry = Arc::new(DeviceRegistry::new());
    let sink = Arc::new(RecordingSink::default());
    let dispatch = dispatcher(&registry, DecoderChain::empty(), &sink);

    let (tx, rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(dispatch.run(rx, cancel.clone()));

    tx.send(InboundMessage::from_mqtt(
        "acp/csn-ble-1".into(),
        br#"{"acp_id":"csn-ble-1"}"#.as_slice().into(),
    ))
    .await
    .unwrap();
    tx.send(InboundMessage::from_mqtt(
        "csn/ble/1".into(),
        br#"{"acp_id":"csn-ble-1","rssi":-70}"#.as_slice().into(),
    ))
    .await
    .unwrap();
    drop(tx);
    task.await.unwrap();

    let sent = sink.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "acp/csn/ble/1");
    assert_eq!(sent[0].1["rssi"], json!(-70));
    assert!(sent[0].1.get("acp_ts").is_some());
}
