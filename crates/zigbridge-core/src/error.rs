// ── Core error types ──
//
// User-facing errors from zigbridge-core. Consumers never see reqwest,
// tungstenite, or rumqttc errors directly. The `From<zigbridge_api::Error>`
// impl translates wire-layer failures into domain-appropriate variants.
//
// Per-message failures (unknown device, undecodable payload) are not
// errors at this level: they surface as `DispatchOutcome::Dropped`.

use thiserror::Error;

use crate::decoder::DecodeError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Request timed out")]
    Timeout,

    // ── Gateway errors ───────────────────────────────────────────────
    #[error("Gateway error: {message}")]
    Gateway {
        message: String,
        /// deCONZ error type or HTTP status, when known.
        code: Option<u16>,
    },

    #[error("Event stream unavailable: {reason}")]
    StreamUnavailable { reason: String },

    // ── Pipeline errors ──────────────────────────────────────────────
    #[error(transparent)]
    Decoder(#[from] DecodeError),

    #[error("Publish failed: {message}")]
    Publish { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Bridge already started")]
    AlreadyStarted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Credentials were rejected by the gateway or a broker.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<zigbridge_api::Error> for CoreError {
    fn from(err: zigbridge_api::Error) -> Self {
        use zigbridge_api::Error as Api;

        if err.is_auth_failure() {
            return match err {
                Api::MqttAuthentication { host, reason } => CoreError::AuthenticationFailed {
                    message: format!("MQTT broker {host} rejected credentials ({reason})"),
                },
                other => CoreError::AuthenticationFailed {
                    message: format!("gateway rejected the API key: {other}"),
                },
            };
        }

        match err {
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map(|u| u.to_string())
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Gateway {
                        message: e.to_string(),
                        code: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            Api::Gateway {
                kind,
                address,
                description,
            } => CoreError::Gateway {
                message: format!("{description} ({address})"),
                code: Some(kind),
            },
            Api::WebSocketConnect(reason) => CoreError::StreamUnavailable { reason },
            Api::MqttAuthentication { host, reason } => CoreError::AuthenticationFailed {
                message: format!("MQTT broker {host} rejected credentials ({reason})"),
            },
            Api::MqttConnection(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("MQTT: {reason}"),
            },
            Api::MqttClient(e) => CoreError::Publish {
                message: e.to_string(),
            },
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
