use thiserror::Error;

/// Top-level error type for the `zigbridge-api` crate.
///
/// Covers every failure mode across the three wire surfaces:
/// gateway REST, event WebSocket, and MQTT. `zigbridge-core` maps these
/// into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Gateway REST ────────────────────────────────────────────────
    /// Error object returned by the gateway (`[{"error": {...}}]`).
    #[error("Gateway error {kind} at {address}: {description}")]
    Gateway {
        kind: u16,
        address: String,
        description: String,
    },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    // ── MQTT ────────────────────────────────────────────────────────
    /// The broker refused our credentials. Retrying will not help.
    #[error("MQTT authentication failed for {host}: {reason}")]
    MqttAuthentication { host: String, reason: String },

    /// MQTT connection dropped or could not be established.
    #[error("MQTT connection error: {0}")]
    MqttConnection(String),

    /// Request could not be queued on the MQTT client.
    #[error("MQTT client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

/// deCONZ error type 1: "unauthorized user".
const GATEWAY_UNAUTHORIZED: u16 = 1;

impl Error {
    /// Returns `true` if credentials were rejected and retrying
    /// without intervention cannot succeed.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::MqttAuthentication { .. } => true,
            Self::Gateway { kind, .. } => *kind == GATEWAY_UNAUTHORIZED,
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::FORBIDDEN),
            _ => false,
        }
    }
}
