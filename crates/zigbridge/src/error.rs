//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and a process exit code.

use miette::Diagnostic;
use thiserror::Error;

use zigbridge_config::ConfigError;
use zigbridge_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to {url}")]
    #[diagnostic(
        code(zigbridge::connection_failed),
        help(
            "Check that the gateway or broker is running and reachable.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Request timed out")]
    #[diagnostic(
        code(zigbridge::timeout),
        help("Raise gateway.timeout_secs or check the gateway's responsiveness.")
    )]
    Timeout,

    #[error("Gateway event stream unavailable: {reason}")]
    #[diagnostic(
        code(zigbridge::stream_unavailable),
        help("Set input_ws.url explicitly, or input_ws.enabled = false to run on polling alone.")
    )]
    StreamUnavailable { reason: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(zigbridge::auth_failed),
        help(
            "Check gateway.api_key (or the variable named by gateway.api_key_env)\n\
             and the MQTT user/password settings."
        )
    )]
    AuthFailed { message: String },

    // ── Gateway ──────────────────────────────────────────────────────
    #[error("Gateway error: {message}")]
    #[diagnostic(code(zigbridge::gateway))]
    Gateway { message: String },

    #[error("Publish failed: {message}")]
    #[diagnostic(code(zigbridge::publish))]
    Publish { message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(zigbridge::validation))]
    Validation { field: String, reason: String },

    #[error("Settings file not found: {path}")]
    #[diagnostic(
        code(zigbridge::no_config),
        help(
            "Pass --config <path>, or create ./settings.toml with at least:\n\n\
             [gateway]\n\
             url = \"http://192.168.1.118\""
        )
    )]
    NoConfig { path: String },

    #[error("{message}")]
    #[diagnostic(code(zigbridge::config))]
    Config { message: String },

    #[error("{message}")]
    #[diagnostic(
        code(zigbridge::decoder),
        help("Known decoders: {known}")
    )]
    Decoder { message: String, known: String },

    // ── Other ────────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    #[diagnostic(code(zigbridge::internal))]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    #[diagnostic(code(zigbridge::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout | Self::StreamUnavailable { .. } => {
                exit_code::CONNECTION
            }
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::Validation { .. }
            | Self::NoConfig { .. }
            | Self::Config { .. }
            | Self::Decoder { .. } => exit_code::CONFIG,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed { url, reason },
            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },
            CoreError::Timeout => CliError::Timeout,
            CoreError::Gateway { message, code } => CliError::Gateway {
                message: match code {
                    Some(code) => format!("{message} (code {code})"),
                    None => message,
                },
            },
            CoreError::StreamUnavailable { reason } => CliError::StreamUnavailable { reason },
            CoreError::Decoder(e) => CliError::Decoder {
                message: e.to_string(),
                known: zigbridge_core::DecoderRegistry::with_builtins()
                    .names()
                    .join(", "),
            },
            CoreError::Publish { message } => CliError::Publish { message },
            CoreError::Config { message } => CliError::Config { message },
            CoreError::AlreadyStarted => CliError::Internal("bridge already started".into()),
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NotFound { path } => CliError::NoConfig {
                path: path.display().to_string(),
            },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_by_category() {
        let auth: CliError = CoreError::AuthenticationFailed {
            message: "nope".into(),
        }
        .into();
        assert_eq!(auth.exit_code(), exit_code::AUTH);

        let conn: CliError = CoreError::ConnectionFailed {
            url: "http://gw".into(),
            reason: "refused".into(),
        }
        .into();
        assert_eq!(conn.exit_code(), exit_code::CONNECTION);

        let cfg: CliError = ConfigError::Validation {
            field: "gateway.url".into(),
            reason: "required".into(),
        }
        .into();
        assert_eq!(cfg.exit_code(), exit_code::CONFIG);

        let gw: CliError = CoreError::Gateway {
            message: "unauthorized user".into(),
            code: Some(503),
        }
        .into();
        assert_eq!(gw.exit_code(), exit_code::GENERAL);
    }

    #[test]
    fn unknown_decoder_lists_builtins() {
        let err: CliError =
            CoreError::Decoder(zigbridge_core::DecodeError::UnknownDecoder("csn".into())).into();
        assert_eq!(err.exit_code(), exit_code::CONFIG);
        match err {
            CliError::Decoder { known, .. } => assert!(known.contains("deconz")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
