//! Gateway event WebSocket with auto-reconnect.
//!
//! Connects to the deCONZ event stream and forwards every text frame, raw,
//! through a [`tokio::sync::mpsc`] channel. Decoding happens downstream in
//! the dispatcher so malformed frames can be reported with their payload.
//!
//! Reconnection uses a fixed delay and never gives up; only cancellation
//! ends the loop. Progress is published as a [`ConnectionState`] on a
//! [`tokio::sync::watch`] channel.
//!
//! # Example
//!
//! ```rust,ignore
//! use zigbridge_api::websocket::{EventStream, ReconnectConfig, ConnectionState};
//! use tokio::sync::{mpsc, watch};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let (frame_tx, mut frame_rx) = mpsc::channel(256);
//! let (state_tx, _state_rx) = watch::channel(ConnectionState::Idle);
//!
//! let stream = EventStream::new(Url::parse("ws://192.168.1.118:443")?, ReconnectConfig::default());
//! tokio::spawn(stream.run(frame_tx, state_tx, cancel.clone()));
//!
//! while let Some(text) = frame_rx.recv().await {
//!     println!("{text}");
//! }
//! ```

use std::fmt;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

// ── ConnectionState ──────────────────────────────────────────────────

/// Lifecycle of the event-stream connection.
///
/// `Idle → Connecting → Streaming ⇄ Reconnecting → Connecting`, with
/// `Stopped` reached only on cancellation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Reconnecting,
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Fixed-delay reconnection policy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Pause between a dropped connection and the next attempt. Default: 2s.
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
        }
    }
}

// ── EventStream ──────────────────────────────────────────────────────

/// A gateway event stream, ready to be driven by [`run`](Self::run).
#[derive(Debug, Clone)]
pub struct EventStream {
    url: Url,
    reconnect: ReconnectConfig,
}

impl EventStream {
    pub fn new(url: Url, reconnect: ReconnectConfig) -> Self {
        Self { url, reconnect }
    }

    /// Derive the stream URL from the gateway address and the
    /// `websocketport` it advertises in `/config`.
    pub fn url_for_gateway(gateway: &Url, port: u16) -> Result<Url, Error> {
        let host = gateway
            .host_str()
            .ok_or_else(|| Error::WebSocketConnect(format!("gateway URL has no host: {gateway}")))?;
        let scheme = if gateway.scheme() == "https" { "wss" } else { "ws" };
        Ok(Url::parse(&format!("{scheme}://{host}:{port}/"))?)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Main loop: connect → read → on drop, wait → reconnect.
    ///
    /// Returns once `cancel` fires or every frame receiver is gone.
    pub async fn run(
        self,
        frame_tx: mpsc::Sender<String>,
        state_tx: watch::Sender<ConnectionState>,
        cancel: CancellationToken,
    ) {
        loop {
            state_tx.send_replace(ConnectionState::Connecting);

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = connect_and_read(&self.url, &frame_tx, &state_tx, &cancel) => {
                    match result {
                        Ok(ReadEnd::Cancelled | ReadEnd::ReceiverGone) => break,
                        Ok(ReadEnd::Closed) => {
                            tracing::info!(url = %self.url, "WebSocket disconnected, reconnecting");
                        }
                        Err(e) => {
                            tracing::warn!(url = %self.url, error = %e, "WebSocket error");
                        }
                    }
                }
            }

            state_tx.send_replace(ConnectionState::Reconnecting);
            tracing::info!(
                delay_ms = u64::try_from(self.reconnect.delay.as_millis()).unwrap_or(u64::MAX),
                "Waiting before reconnect"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.reconnect.delay) => {}
            }
        }

        state_tx.send_replace(ConnectionState::Stopped);
        tracing::debug!("WebSocket loop exiting");
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum ReadEnd {
    /// Server close frame or end of stream.
    Closed,
    Cancelled,
    /// The dispatcher side hung up; nothing left to feed.
    ReceiverGone,
}

/// What to do with one inbound frame.
#[derive(Debug, PartialEq, Eq)]
enum FrameAction {
    Forward(String),
    Skip,
    Close,
}

fn classify(frame: tungstenite::Message) -> FrameAction {
    match frame {
        tungstenite::Message::Text(text) => FrameAction::Forward(text.as_str().to_owned()),
        tungstenite::Message::Binary(data) => match String::from_utf8(data.to_vec()) {
            Ok(text) => FrameAction::Forward(text),
            Err(_) => {
                tracing::debug!(len = data.len(), "Skipping non-UTF-8 binary frame");
                FrameAction::Skip
            }
        },
        tungstenite::Message::Close(frame) => {
            if let Some(ref cf) = frame {
                tracing::info!(code = %cf.code, reason = %cf.reason, "WebSocket close frame received");
            } else {
                tracing::info!("WebSocket close frame received (no payload)");
            }
            FrameAction::Close
        }
        // tungstenite answers pings itself
        tungstenite::Message::Ping(_)
        | tungstenite::Message::Pong(_)
        | tungstenite::Message::Frame(_) => FrameAction::Skip,
    }
}

async fn connect_and_read(
    url: &Url,
    frame_tx: &mpsc::Sender<String>,
    state_tx: &watch::Sender<ConnectionState>,
    cancel: &CancellationToken,
) -> Result<ReadEnd, Error> {
    tracing::info!(url = %url, "Connecting to WebSocket");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!(url = %url, "WebSocket connected");
    state_tx.send_replace(ConnectionState::Streaming);

    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(ReadEnd::Cancelled),
            frame = read.next() => {
                let Some(frame) = frame else {
                    tracing::info!("WebSocket stream ended");
                    return Ok(ReadEnd::Closed);
                };
                let frame = frame.map_err(|e| Error::WebSocketConnect(e.to_string()))?;

                match classify(frame) {
                    FrameAction::Forward(text) => {
                        tracing::trace!(len = text.len(), "WebSocket frame");
                        if frame_tx.send(text).await.is_err() {
                            return Ok(ReadEnd::ReceiverGone);
                        }
                    }
                    FrameAction::Skip => {}
                    FrameAction::Close => return Ok(ReadEnd::Closed),
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
