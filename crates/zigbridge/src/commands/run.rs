//! `zigbridge run`: start the bridge and keep it up until a signal.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use zigbridge_config::Settings;
use zigbridge_core::{Bridge, PreviewSink};

use crate::error::CliError;

/// Upper bound on `Bridge::shutdown` before giving up on the tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// What the process was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Shutdown,
    Reload,
}

// ── Signal handling ──────────────────────────────────────────────────

struct Signals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl Signals {
    #[cfg(unix)]
    fn install() -> Result<Self, CliError> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    #[cfg(not(unix))]
    fn install() -> Result<Self, CliError> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn next(&mut self) -> Signal {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down");
                Signal::Shutdown
            }
            _ = self.terminate.recv() => {
                info!("received SIGTERM, shutting down");
                Signal::Shutdown
            }
            _ = self.hangup.recv() => {
                info!("received SIGHUP, reloading decoders");
                Signal::Reload
            }
        }
    }

    #[cfg(not(unix))]
    async fn next(&mut self) -> Signal {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl+C, shutting down");
        Signal::Shutdown
    }
}

// ── Handler ──────────────────────────────────────────────────────────

pub async fn handle(settings: Settings, config_path: Option<&Path>) -> Result<(), CliError> {
    let config = settings.to_bridge_config()?;

    let bridge = if config.debug {
        info!("debug mode: messages are previewed, not published");
        Bridge::new(config, Arc::new(PreviewSink))?
    } else {
        let output = settings.output_mqtt_config();
        info!(host = %output.host, port = output.port, "publishing to MQTT broker");
        Bridge::with_mqtt_output(config, &output)?
    };

    let mut signals = Signals::install()?;
    bridge.start().await?;

    let cancel = bridge.cancel_token();
    loop {
        tokio::select! {
            // Cancelled from inside: a fatal error, reported by shutdown().
            () = cancel.cancelled() => break,
            signal = signals.next() => match signal {
                Signal::Shutdown => break,
                Signal::Reload => reload_decoders(&bridge, config_path),
            },
        }
    }

    let registry = bridge.registry();
    info!(
        endpoints = registry.endpoint_count(),
        nodes = registry.node_count(),
        last_poll = ?registry.last_poll(),
        last_stream_delta = ?registry.last_stream_delta(),
        "stopping bridge"
    );

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, bridge.shutdown()).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            warn!(timeout_secs = SHUTDOWN_TIMEOUT.as_secs(), "bridge tasks did not stop in time");
            Ok(())
        }
    }
}

/// Re-read settings (and `decoders_file`) and swap the decoder chain.
/// Failures keep the running chain.
fn reload_decoders(bridge: &Bridge, config_path: Option<&Path>) {
    let names = Settings::load(config_path).and_then(|s| s.decoder_names());
    match names {
        Ok(names) => match bridge.reload_decoders(&names) {
            Ok(()) => info!(decoders = ?names, "decoder chain reloaded"),
            Err(e) => warn!(error = %e, "decoder reload rejected, keeping current chain"),
        },
        Err(e) => warn!(error = %e, "could not re-read settings, keeping current chain"),
    }
}
