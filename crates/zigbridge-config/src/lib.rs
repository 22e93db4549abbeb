//! Settings for the zigbridge bridge.
//!
//! One TOML (or JSON) settings file layered over built-in defaults and
//! `ZIGBRIDGE_*` environment variables, credential resolution, and the
//! translation to `zigbridge_core::BridgeConfig`. The core crate never
//! reads files; everything it needs arrives through here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use zigbridge_core::{
    BridgeConfig, EnrichmentRules, EventRule, GatewayOptions, MqttConfig, MqttInputOptions,
    ReconnectConfig, StandardRule, StreamOptions, TlsVerification,
};

const ENV_PREFIX: &str = "ZIGBRIDGE_";
const REDACTED: &str = "********";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("settings file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to serialize settings: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("settings loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── Settings structs ────────────────────────────────────────────────

/// Top-level settings file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Preview outbound messages instead of publishing them.
    #[serde(default)]
    pub debug: bool,

    /// Decoder names in priority order. Empty disables decoding.
    #[serde(default = "default_decoders")]
    pub decoders: Vec<String>,

    /// JSON file `{"decoders": [...]}` that overrides `decoders` and is
    /// re-read on reload.
    pub decoders_file: Option<PathBuf>,

    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default)]
    pub input_ws: WsInputSettings,

    /// Optional second input broker.
    pub input_mqtt: Option<MqttInputSettings>,

    #[serde(default)]
    pub output_mqtt: MqttOutputSettings,

    /// Semantic event table. Replaces the built-in table when non-empty.
    #[serde(default)]
    pub events: Vec<EventRule>,

    /// Standard-value rules. Replace the built-in rules when non-empty.
    #[serde(default)]
    pub standard: Vec<StandardRule>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            decoders: default_decoders(),
            decoders_file: None,
            gateway: GatewaySettings::default(),
            input_ws: WsInputSettings::default(),
            input_mqtt: None,
            output_mqtt: MqttOutputSettings::default(),
            events: Vec::new(),
            standard: Vec::new(),
        }
    }
}

fn default_decoders() -> Vec<String> {
    vec!["deconz".into()]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewaySettings {
    /// Gateway base URL, e.g. "http://192.168.1.118". Required.
    pub url: Option<String>,

    /// REST API key (plaintext; prefer `api_key_env`).
    pub api_key: Option<String>,

    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,

    #[serde(default = "default_resource_classes")]
    pub resource_classes: Vec<String>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Accept self-signed certificates.
    #[serde(default)]
    pub insecure: bool,

    /// Custom CA certificate for HTTPS gateways.
    pub ca_cert: Option<PathBuf>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            api_key_env: None,
            resource_classes: default_resource_classes(),
            poll_interval_secs: default_poll_interval(),
            timeout_secs: default_timeout(),
            insecure: false,
            ca_cert: None,
        }
    }
}

fn default_resource_classes() -> Vec<String> {
    vec!["sensors".into(), "lights".into()]
}
fn default_poll_interval() -> u64 {
    15
}
fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WsInputSettings {
    /// Stream URL; discovered from the gateway when unset.
    pub url: Option<String>,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for WsInputSettings {
    fn default() -> Self {
        Self {
            url: None,
            reconnect_delay_secs: default_reconnect_delay(),
            enabled: true,
        }
    }
}

fn default_reconnect_delay() -> u64 {
    2
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MqttInputSettings {
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    pub user: Option<String>,

    /// Plaintext password; prefer `password_env`.
    pub password: Option<String>,

    pub password_env: Option<String>,

    #[serde(default = "default_input_topic")]
    pub topic: String,

    /// Enrich input messages as gateway stream deltas.
    #[serde(default)]
    pub enrich: bool,

    pub client_id: Option<String>,
}

fn default_mqtt_port() -> u16 {
    1883
}
fn default_input_topic() -> String {
    "#".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MqttOutputSettings {
    #[serde(default = "default_output_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    pub user: Option<String>,

    /// Plaintext password; prefer `password_env`.
    pub password: Option<String>,

    pub password_env: Option<String>,

    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    pub client_id: Option<String>,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

impl Default for MqttOutputSettings {
    fn default() -> Self {
        Self {
            host: default_output_host(),
            port: default_mqtt_port(),
            user: None,
            password: None,
            password_env: None,
            topic_prefix: default_topic_prefix(),
            client_id: None,
            keep_alive_secs: default_keep_alive(),
        }
    }
}

fn default_output_host() -> String {
    "localhost".into()
}
fn default_topic_prefix() -> String {
    "acp/".into()
}
fn default_keep_alive() -> u64 {
    60
}

// ── Settings file path ──────────────────────────────────────────────

/// `./settings.toml` if present, else the platform config dir.
pub fn default_settings_path() -> PathBuf {
    let local = PathBuf::from("settings.toml");
    if local.exists() {
        return local;
    }
    ProjectDirs::from("org", "zigbridge", "zigbridge").map_or(local, |dirs| {
        dirs.config_dir().join("settings.toml")
    })
}

// ── Loading ─────────────────────────────────────────────────────────

impl Settings {
    /// Load defaults → settings file → `ZIGBRIDGE_*` env.
    ///
    /// An explicit `path` must exist; the default location may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) if !p.exists() => {
                return Err(ConfigError::NotFound { path: p.to_owned() });
            }
            Some(p) => p.to_owned(),
            None => default_settings_path(),
        };

        let figment = Figment::new().merge(Serialized::defaults(Self::default()));
        let figment = if path.extension().is_some_and(|ext| ext == "json") {
            figment.merge(Json::file(&path))
        } else {
            figment.merge(Toml::file(&path))
        };
        let settings: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would only fail later, at connect time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gateway_url()?;
        if self.gateway.resource_classes.is_empty() {
            return Err(invalid("gateway.resource_classes", "at least one class is required"));
        }
        if self.gateway.poll_interval_secs == 0 {
            return Err(invalid("gateway.poll_interval_secs", "must be greater than zero"));
        }
        if let Some(ref url) = self.input_ws.url {
            parse_url("input_ws.url", url)?;
        }
        if self.output_mqtt.topic_prefix.is_empty() {
            return Err(invalid(
                "output_mqtt.topic_prefix",
                "must not be empty; it is what stops republish loops",
            ));
        }
        for (i, rule) in self.events.iter().enumerate() {
            if rule.when_true.is_some() != rule.when_false.is_some() {
                return Err(invalid(
                    &format!("events[{i}]"),
                    format!(
                        "rule for '{}' needs both when_true and when_false, or neither",
                        rule.field
                    ),
                ));
            }
        }
        for (i, rule) in self.standard.iter().enumerate() {
            if !rule.scale.is_normal() {
                return Err(invalid(&format!("standard[{i}].scale"), "must be a non-zero number"));
            }
        }
        Ok(())
    }

    fn gateway_url(&self) -> Result<Url, ConfigError> {
        let raw = self
            .gateway
            .url
            .as_deref()
            .ok_or_else(|| invalid("gateway.url", "required"))?;
        parse_url("gateway.url", raw)
    }

    /// Decoder names, from `decoders_file` when set.
    pub fn decoder_names(&self) -> Result<Vec<String>, ConfigError> {
        match self.decoders_file {
            Some(ref path) => load_decoders_file(path),
            None => Ok(self.decoders.clone()),
        }
    }

    /// Settings as TOML with every secret replaced.
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut copy = self.clone();
        redact(&mut copy.gateway.api_key);
        redact(&mut copy.output_mqtt.password);
        if let Some(ref mut input) = copy.input_mqtt {
            redact(&mut input.password);
        }
        Ok(toml::to_string_pretty(&copy)?)
    }
}

fn redact(secret: &mut Option<String>) {
    if secret.is_some() {
        *secret = Some(REDACTED.into());
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse()
        .map_err(|e| invalid(field, format!("invalid URL '{raw}': {e}")))
}

/// Read `{"decoders": [...]}`.
pub fn load_decoders_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound { path: path.to_owned() });
    }
    Ok(Figment::from(Json::file(path)).extract_inner("decoders")?)
}

// ── Credential resolution ───────────────────────────────────────────

/// `*_env` variable first, then the plaintext value.
fn resolve_secret(env_name: Option<&str>, plaintext: Option<&str>) -> Option<SecretString> {
    if let Some(name) = env_name {
        if let Ok(val) = std::env::var(name) {
            return Some(SecretString::from(val));
        }
    }
    plaintext.map(SecretString::from)
}

fn default_client_id(role: &str) -> String {
    format!("zigbridge-{role}-{}", std::process::id())
}

// ── Translation to core types ───────────────────────────────────────

impl Settings {
    /// Build the core bridge configuration. Reads `decoders_file` and any
    /// `*_env` credential variables.
    pub fn to_bridge_config(&self) -> Result<BridgeConfig, ConfigError> {
        let mut gateway = GatewayOptions::new(self.gateway_url()?);
        gateway.api_key = resolve_secret(
            self.gateway.api_key_env.as_deref(),
            self.gateway.api_key.as_deref(),
        );
        gateway.resource_classes.clone_from(&self.gateway.resource_classes);
        gateway.poll_interval = Duration::from_secs(self.gateway.poll_interval_secs);
        gateway.timeout = Duration::from_secs(self.gateway.timeout_secs);
        gateway.tls = if self.gateway.insecure {
            TlsVerification::DangerAcceptInvalid
        } else if let Some(ref ca) = self.gateway.ca_cert {
            TlsVerification::CustomCa(ca.clone())
        } else {
            TlsVerification::SystemDefaults
        };

        let stream = if self.input_ws.enabled {
            Some(StreamOptions {
                url: self
                    .input_ws
                    .url
                    .as_deref()
                    .map(|u| parse_url("input_ws.url", u))
                    .transpose()?,
                reconnect: ReconnectConfig {
                    delay: Duration::from_secs(self.input_ws.reconnect_delay_secs),
                },
            })
        } else {
            None
        };

        let mqtt_input = self.input_mqtt.as_ref().map(|input| {
            let mut broker = MqttConfig::new(
                input.host.clone(),
                input.port,
                input.client_id.clone().unwrap_or_else(|| default_client_id("in")),
            );
            broker.username.clone_from(&input.user);
            broker.password =
                resolve_secret(input.password_env.as_deref(), input.password.as_deref());
            MqttInputOptions {
                broker,
                topic: input.topic.clone(),
                enrich: input.enrich,
            }
        });

        let defaults = EnrichmentRules::default();
        let rules = EnrichmentRules {
            events: if self.events.is_empty() {
                defaults.events
            } else {
                self.events.clone()
            },
            standard: if self.standard.is_empty() {
                defaults.standard
            } else {
                self.standard.clone()
            },
        };

        Ok(BridgeConfig {
            gateway,
            stream,
            mqtt_input,
            output_prefix: self.output_mqtt.topic_prefix.clone(),
            rules,
            decoders: self.decoder_names()?,
            debug: self.debug,
        })
    }

    /// Connection settings for the output broker.
    pub fn output_mqtt_config(&self) -> MqttConfig {
        let out = &self.output_mqtt;
        let mut cfg = MqttConfig::new(
            out.host.clone(),
            out.port,
            out.client_id.clone().unwrap_or_else(|| default_client_id("out")),
        );
        cfg.username.clone_from(&out.user);
        cfg.password = resolve_secret(out.password_env.as_deref(), out.password.as_deref());
        cfg.keep_alive = Duration::from_secs(out.keep_alive_secs);
        cfg
    }
}
