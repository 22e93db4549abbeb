// Integration tests for `GatewayClient` using wiremock.

use pretty_assertions::assert_eq;
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use zigbridge_api::{Error, GatewayClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, GatewayClient) {
    let server = MockServer::start().await;
    let gateway = Url::parse(&server.uri()).unwrap();
    let base = GatewayClient::api_root(&gateway, "B9FAF065F0").unwrap();
    let client = GatewayClient::with_client(reqwest::Client::new(), base);
    (server, client)
}

// ── Happy-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_list_sensors() {
    let (server, client) = setup().await;

    let body = json!({
        "2": {
            "name": "aqa-wd-5c91b3",
            "type": "ZHAOpenClose",
            "modelid": "lumi.sensor_magnet.aq2",
            "uniqueid": "00:15:8d:00:04:5c:91:b3-01-0006",
            "state": { "open": false, "lastupdated": "2020-04-30T12:07:30" },
            "config": { "battery": 100, "on": true, "reachable": true, "temperature": 2400 }
        },
        "3": {
            "name": "aqa-mot-6657d3",
            "type": "ZHAPresence",
            "state": { "presence": false },
            "config": { "temperature": 2300 }
        }
    });

    Mock::given(method("GET"))
        .and(path("/api/B9FAF065F0/sensors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let sensors = client.list("sensors").await.unwrap();

    assert_eq!(sensors.len(), 2);
    let door = &sensors["2"];
    assert_eq!(door.name.as_deref(), Some("aqa-wd-5c91b3"));
    assert_eq!(door.kind(), Some("ZHAOpenClose"));
    assert_eq!(door.state.as_ref().unwrap()["open"], json!(false));
    assert_eq!(door.config.as_ref().unwrap()["temperature"], json!(2400));
    assert_eq!(sensors["3"].model_id(), None);
}

#[tokio::test]
async fn test_list_empty_class() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/B9FAF065F0/lights"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    assert!(client.list("lights").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_gateway_config_websocket_port() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/B9FAF065F0/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Phoscon-GW",
            "apiversion": "1.16.0",
            "websocketport": 443,
            "zigbeechannel": 15
        })))
        .mount(&server)
        .await;

    let config = client.gateway_config().await.unwrap();
    assert_eq!(config.websocketport, Some(443));
    assert_eq!(config.name.as_deref(), Some("Phoscon-GW"));
    assert_eq!(config.extra["zigbeechannel"], json!(15));
}

// ── Error-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_unauthorized_error_envelope() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/B9FAF065F0/sensors"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!([
            { "error": { "type": 1, "address": "/sensors", "description": "unauthorized user" } }
        ])))
        .mount(&server)
        .await;

    let err = client.list("sensors").await.unwrap_err();

    assert!(err.is_auth_failure());
    match err {
        Error::Gateway {
            kind,
            address,
            description,
        } => {
            assert_eq!(kind, 1);
            assert_eq!(address, "/sensors");
            assert_eq!(description, "unauthorized user");
        }
        other => panic!("expected Gateway error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_http_error_without_envelope() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/B9FAF065F0/sensors"))
        .respond_with(ResponseTemplate::new(503).set_body_string("gateway busy"))
        .mount(&server)
        .await;

    let err = client.list("sensors").await.unwrap_err();
    assert!(!err.is_auth_failure());
    assert!(matches!(err, Error::Gateway { kind: 503, .. }));
}

#[tokio::test]
async fn test_malformed_body_keeps_raw_text() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/B9FAF065F0/sensors"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client.list("sensors").await.unwrap_err();
    match err {
        Error::Deserialization { body, .. } => assert_eq!(body, "not json"),
        other => panic!("expected Deserialization error, got {other:?}"),
    }
}
