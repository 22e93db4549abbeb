// ── Bridge lifecycle ──
//
// Owns the registry, decoder chain, and dispatcher, and runs the
// background tasks that feed them: the REST poller, the gateway event
// stream, the optional MQTT input, and the output broker's event loop.
// One `CancellationToken` stops all of them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use zigbridge_api::{
    ConnectionState, Error as ApiError, EventStream, GatewayClient, MqttConfig, MqttPublisher,
    MqttSubscriber, ReconnectConfig,
};

use crate::config::{BridgeConfig, StreamOptions};
use crate::decoder::{DecoderChain, DecoderRegistry};
use crate::dispatch::{DispatchSettings, Dispatcher, InboundMessage, PublishSink};
use crate::error::CoreError;
use crate::store::{DeviceRegistry, PollSummary};

const INBOUND_CHANNEL_SIZE: usize = 256;

// ── One-shot poll ────────────────────────────────────────────────

/// Poll every resource class once and apply the results.
///
/// Stops at the first failing class; what was already applied stays.
pub async fn poll_once(
    client: &GatewayClient,
    registry: &DeviceRegistry,
    resource_classes: &[String],
) -> Result<PollSummary, CoreError> {
    let mut summary = PollSummary::default();
    for class in resource_classes {
        let snapshots = client.list(class).await?;
        summary += registry.apply_poll(class, &snapshots);
    }
    Ok(summary)
}

// ── Bridge ───────────────────────────────────────────────────────

/// The running bridge.
///
/// Cheaply cloneable via `Arc<BridgeInner>`. Does nothing until
/// [`start()`](Self::start) is called.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    registry: Arc<DeviceRegistry>,
    decoders: DecoderRegistry,
    chain: Arc<DecoderChain>,
    sink: Arc<dyn PublishSink>,
    connection_state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    /// First unrecoverable error from a background task.
    fatal: parking_lot::Mutex<Option<CoreError>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Output broker event loop, handed to a supervisor on `start()`.
    output_loop: parking_lot::Mutex<Option<JoinHandle<Result<(), ApiError>>>>,
    started: parking_lot::Mutex<bool>,
}

impl Bridge {
    /// Create a bridge publishing to `sink`. Decoder names in the config
    /// are resolved here, so an unknown name fails construction.
    pub fn new(config: BridgeConfig, sink: Arc<dyn PublishSink>) -> Result<Self, CoreError> {
        Self::build(config, sink, CancellationToken::new(), None)
    }

    /// Create a bridge publishing to an MQTT broker. The broker's event
    /// loop runs under the bridge's cancel token; rejected credentials
    /// stop the whole bridge.
    pub fn with_mqtt_output(config: BridgeConfig, output: &MqttConfig) -> Result<Self, CoreError> {
        let cancel = CancellationToken::new();
        let (publisher, event_loop) = MqttPublisher::connect(output, cancel.clone());
        Self::build(config, Arc::new(publisher), cancel, Some(event_loop))
    }

    fn build(
        config: BridgeConfig,
        sink: Arc<dyn PublishSink>,
        cancel: CancellationToken,
        output_loop: Option<JoinHandle<Result<(), ApiError>>>,
    ) -> Result<Self, CoreError> {
        let decoders = DecoderRegistry::with_builtins();
        let chain = Arc::new(DecoderChain::empty());
        chain.rebuild(&decoders, &config.decoders)?;
        let (connection_state, _) = watch::channel(ConnectionState::Idle);

        Ok(Self {
            inner: Arc::new(BridgeInner {
                config,
                registry: Arc::new(DeviceRegistry::new()),
                decoders,
                chain,
                sink,
                connection_state,
                cancel,
                fatal: parking_lot::Mutex::new(None),
                task_handles: Mutex::new(Vec::new()),
                output_loop: parking_lot::Mutex::new(output_loop),
                started: parking_lot::Mutex::new(false),
            }),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.registry
    }

    /// Decoder table; register custom decoders here before reloading.
    pub fn decoders(&self) -> &DecoderRegistry {
        &self.inner.decoders
    }

    pub fn decoder_chain(&self) -> &Arc<DecoderChain> {
        &self.inner.chain
    }

    /// Subscribe to event-stream connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the poller, the input readers, and the dispatcher.
    ///
    /// Nothing here waits on the network. When no stream URL is
    /// configured, the stream task discovers it from the gateway's
    /// `/config`, retrying until the gateway answers.
    pub async fn start(&self) -> Result<(), CoreError> {
        let config = &self.inner.config;
        let cancel = &self.inner.cancel;
        let client = config.gateway.client()?;

        {
            let mut started = self.inner.started.lock();
            if *started {
                return Err(CoreError::AlreadyStarted);
            }
            *started = true;
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_SIZE);
        let mut handles = self.inner.task_handles.lock().await;

        let output_loop = self.inner.output_loop.lock().take();
        if let Some(event_loop) = output_loop {
            handles.push(tokio::spawn(supervise(self.clone(), "mqtt output", event_loop)));
        }

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.inner.registry),
            Arc::clone(&self.inner.chain),
            DispatchSettings {
                output_prefix: config.output_prefix.clone(),
                rules: config.rules.clone(),
                enrich_mqtt: config.mqtt_input.as_ref().is_some_and(|m| m.enrich),
                debug: config.debug,
            },
            Arc::clone(&self.inner.sink),
        );
        handles.push(tokio::spawn(dispatcher.run(inbound_rx, cancel.clone())));

        handles.push(tokio::spawn(poll_task(
            client.clone(),
            Arc::clone(&self.inner.registry),
            config.gateway.resource_classes.clone(),
            config.gateway.poll_interval,
            cancel.clone(),
        )));

        if let Some(ref stream) = config.stream {
            let (frame_tx, frame_rx) = mpsc::channel(INBOUND_CHANNEL_SIZE);
            handles.push(tokio::spawn(stream_task(
                client,
                config.gateway.url.clone(),
                stream.clone(),
                frame_tx,
                self.inner.connection_state.clone(),
                cancel.clone(),
            )));
            handles.push(tokio::spawn(forward(
                frame_rx,
                inbound_tx.clone(),
                InboundMessage::from_stream,
                cancel.clone(),
            )));
        }

        if let Some(ref input) = config.mqtt_input {
            let (msg_tx, msg_rx) = mpsc::channel(INBOUND_CHANNEL_SIZE);
            let event_loop =
                MqttSubscriber::spawn(&input.broker, input.topic.clone(), msg_tx, cancel.clone());
            handles.push(tokio::spawn(supervise(self.clone(), "mqtt input", event_loop)));
            handles.push(tokio::spawn(forward(
                msg_rx,
                inbound_tx,
                |m: zigbridge_api::MqttMessage| InboundMessage::from_mqtt(m.topic, m.payload),
                cancel.clone(),
            )));
        }

        info!(
            gateway = %config.gateway.url,
            decoders = ?self.inner.chain.names(),
            debug = config.debug,
            "bridge started"
        );
        Ok(())
    }

    /// Swap in a new decoder chain. On an unknown name the current chain
    /// stays active.
    pub fn reload_decoders(&self, names: &[String]) -> Result<(), CoreError> {
        self.inner.chain.rebuild(&self.inner.decoders, names)?;
        Ok(())
    }

    /// Cancel every task and wait for them to finish. Returns the error
    /// that stopped the bridge, if one did.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "bridge task panicked");
            }
        }
        // Never started: the output loop is still ours to reap.
        let orphan = self.inner.output_loop.lock().take();
        if let Some(event_loop) = orphan {
            match event_loop.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.inner.fatal.lock().get_or_insert(e.into());
                }
                Err(e) => warn!(error = %e, "mqtt output task panicked"),
            }
        }

        self.inner
            .connection_state
            .send_replace(ConnectionState::Stopped);
        debug!("bridge stopped");

        let fatal = self.inner.fatal.lock().take();
        fatal.map_or(Ok(()), Err)
    }

    fn fail(&self, err: CoreError) {
        error!(error = %err, "fatal bridge error, shutting down");
        self.inner.fatal.lock().get_or_insert(err);
        self.inner.cancel.cancel();
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Poll immediately, then every `interval`.
async fn poll_task(
    client: GatewayClient,
    registry: Arc<DeviceRegistry>,
    classes: Vec<String>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match poll_once(&client, &registry, &classes).await {
                    Ok(summary) => debug!(
                        endpoints = registry.endpoint_count(),
                        nodes = registry.node_count(),
                        created = summary.created,
                        renamed = summary.renamed,
                        "poll complete"
                    ),
                    Err(e) if e.is_auth_failure() => {
                        error!(error = %e, "gateway rejected the API key, will retry");
                    }
                    Err(e) => warn!(error = %e, "gateway poll failed"),
                }
            }
        }
    }
}

/// Move items from a reader's channel into the dispatcher's.
async fn forward<T, F>(
    mut rx: mpsc::Receiver<T>,
    tx: mpsc::Sender<InboundMessage>,
    wrap: F,
    cancel: CancellationToken,
) where
    T: Send,
    F: Fn(T) -> InboundMessage + Send,
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            item = rx.recv() => {
                let Some(item) = item else { break };
                if tx.send(wrap(item)).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Await a broker event loop and escalate a fatal exit.
async fn supervise(
    bridge: Bridge,
    name: &'static str,
    handle: JoinHandle<Result<(), ApiError>>,
) {
    match handle.await {
        Ok(Ok(())) => debug!(task = name, "event loop finished"),
        Ok(Err(e)) => bridge.fail(e.into()),
        Err(e) => bridge.fail(CoreError::Internal(format!("{name} task panicked: {e}"))),
    }
}

/// Resolve the stream URL, then run the event stream until cancelled.
async fn stream_task(
    client: GatewayClient,
    gateway: Url,
    options: StreamOptions,
    frame_tx: mpsc::Sender<String>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    let url = match options.url {
        Some(url) => url,
        None => {
            let discovered =
                discover_until_ready(&client, &gateway, &options.reconnect, &state_tx, &cancel)
                    .await;
            let Some(url) = discovered else {
                state_tx.send_replace(ConnectionState::Stopped);
                return;
            };
            url
        }
    };

    EventStream::new(url, options.reconnect)
        .run(frame_tx, state_tx, cancel)
        .await;
}

/// Retry discovery at the reconnect delay. `None` means cancelled.
async fn discover_until_ready(
    client: &GatewayClient,
    gateway: &Url,
    reconnect: &ReconnectConfig,
    state_tx: &watch::Sender<ConnectionState>,
    cancel: &CancellationToken,
) -> Option<Url> {
    loop {
        state_tx.send_replace(ConnectionState::Connecting);
        tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            result = discover_stream_url(client, gateway) => match result {
                Ok(url) => return Some(url),
                Err(e) => warn!(error = %e, "stream discovery failed, retrying"),
            },
        }

        state_tx.send_replace(ConnectionState::Reconnecting);
        tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            () = tokio::time::sleep(reconnect.delay) => {}
        }
    }
}

/// Ask the gateway where its event WebSocket listens.
async fn discover_stream_url(client: &GatewayClient, gateway: &Url) -> Result<Url, CoreError> {
    let info = client.gateway_config().await?;
    let port = info.websocketport.ok_or_else(|| CoreError::StreamUnavailable {
        reason: "gateway did not report a websocketport".into(),
    })?;
    let url = EventStream::url_for_gateway(gateway, port)?;
    info!(url = %url, "discovered event stream");
    Ok(url)
}
