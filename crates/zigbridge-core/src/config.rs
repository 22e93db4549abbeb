// ── Runtime bridge configuration ──
//
// These types describe *what* the bridge connects to and how messages are
// shaped. They carry credential data and tuning, but never touch disk.
// The CLI builds a `BridgeConfig` from its settings file and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use url::Url;

use zigbridge_api::transport::{TlsMode, TransportConfig};
use zigbridge_api::{GatewayClient, MqttConfig, ReconnectConfig};

use crate::enrich::EnrichmentRules;
use crate::error::CoreError;

/// TLS verification strategy for HTTPS gateways.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-signed gateway images).
    DangerAcceptInvalid,
}

/// How to reach the deCONZ REST API.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Gateway address, e.g. `http://192.168.1.118`. Used verbatim as the
    /// API root when no key is set.
    pub url: Url,
    pub api_key: Option<SecretString>,
    /// Resource classes to poll, in order.
    pub resource_classes: Vec<String>,
    pub poll_interval: Duration,
    pub tls: TlsVerification,
    pub timeout: Duration,
}

impl GatewayOptions {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            api_key: None,
            resource_classes: vec!["sensors".into(), "lights".into()],
            poll_interval: Duration::from_secs(15),
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// `{url}/api/{key}/` with a key, otherwise `url` itself.
    pub fn api_root(&self) -> Result<Url, CoreError> {
        match self.api_key {
            Some(ref key) => Ok(GatewayClient::api_root(&self.url, key.expose_secret())?),
            None => Ok(self.url.clone()),
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: match &self.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            timeout: self.timeout,
        }
    }

    /// Build the REST client for this gateway.
    pub fn client(&self) -> Result<GatewayClient, CoreError> {
        Ok(GatewayClient::new(self.api_root()?, &self.transport())?)
    }
}

/// The gateway's live event WebSocket.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Explicit stream URL. When absent it is derived from the
    /// `websocketport` the gateway reports in `/config`.
    pub url: Option<Url>,
    pub reconnect: ReconnectConfig,
}

/// An optional MQTT broker to consume messages from.
#[derive(Debug, Clone)]
pub struct MqttInputOptions {
    pub broker: MqttConfig,
    /// Topic filter, e.g. `#` or `zigbee/+/events`.
    pub topic: String,
    /// Run enrichment on MQTT input as well as on stream frames.
    pub enrich: bool,
}

/// Everything `Bridge` needs, already resolved and validated.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub gateway: GatewayOptions,
    /// `None` disables the gateway event stream.
    pub stream: Option<StreamOptions>,
    pub mqtt_input: Option<MqttInputOptions>,
    /// Prepended to every outbound topic; inbound topics with this prefix
    /// are our own publishes and are dropped.
    pub output_prefix: String,
    pub rules: EnrichmentRules,
    /// Decoder names, in priority order. Empty disables decoding.
    pub decoders: Vec<String>,
    /// Log outbound messages instead of publishing them.
    pub debug: bool,
}

impl BridgeConfig {
    pub fn new(gateway: GatewayOptions) -> Self {
        Self {
            gateway,
            stream: Some(StreamOptions::default()),
            mqtt_input: None,
            output_prefix: "acp/".into(),
            rules: EnrichmentRules::default(),
            decoders: Vec::new(),
            debug: false,
        }
    }
}
