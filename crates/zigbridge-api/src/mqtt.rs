//! MQTT broker clients built on `rumqttc`.
//!
//! [`MqttPublisher`] is the bridge's output: fire-and-forget QoS 0
//! publishes queued on the client and flushed by a background event-loop
//! task. [`MqttSubscriber`] is the optional input: it subscribes to a topic
//! filter and forwards every publish through an `mpsc` channel.
//!
//! Both event loops survive broker outages by polling again after a fixed
//! delay. A refused CONNECT for bad credentials is not retried; the task
//! returns [`Error::MqttAuthentication`] so the caller can shut down.

use std::time::Duration;

use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Capacity of the request queue between client handles and the event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Upper bound on flushing a DISCONNECT during shutdown.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

// ── Connection settings ──────────────────────────────────────────────

/// Broker connection settings shared by the publisher and the subscriber.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub keep_alive: Duration,
    /// Pause before polling the event loop again after a connection error.
    pub retry_delay: Duration,
}

impl MqttConfig {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            retry_delay: Duration::from_secs(2),
        }
    }

    fn options(&self) -> MqttOptions {
        let mut opts = MqttOptions::new(&self.client_id, &self.host, self.port);
        opts.set_keep_alive(self.keep_alive);

        if let Some(ref user) = self.username {
            let pass = self
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_owned())
                .unwrap_or_default();
            opts.set_credentials(user, pass);
        }
        opts
    }
}

// ── Publisher ────────────────────────────────────────────────────────

/// Output side: queues QoS 0, non-retained publishes.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    host: String,
}

impl MqttPublisher {
    /// Create the client and spawn its event loop.
    ///
    /// The returned task resolves when `cancel` fires (after sending a
    /// DISCONNECT) or with an error if the broker rejects the credentials.
    pub fn connect(
        config: &MqttConfig,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<Result<(), Error>>) {
        let (client, eventloop) = AsyncClient::new(config.options(), REQUEST_CHANNEL_CAPACITY);
        let host = config.host.clone();

        let task = tokio::spawn(drive_event_loop(
            eventloop,
            client.clone(),
            host.clone(),
            config.retry_delay,
            cancel,
            |_| {},
        ));

        (Self { client, host }, task)
    }

    /// Queue a publish without waiting. Fails only if the request queue is
    /// full or the event loop has stopped; nothing is retried.
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<(), Error> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(Error::MqttClient)
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl std::fmt::Debug for MqttPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttPublisher").field("host", &self.host).finish()
    }
}

// ── Subscriber ───────────────────────────────────────────────────────

/// One publish received on the input broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Input side: forwards every publish matching `filter`.
pub struct MqttSubscriber;

impl MqttSubscriber {
    /// Spawn the event loop. The subscription is re-sent on every CONNACK
    /// so it survives reconnects to a clean-session broker.
    pub fn spawn(
        config: &MqttConfig,
        filter: String,
        message_tx: mpsc::Sender<MqttMessage>,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<(), Error>> {
        let (client, eventloop) = AsyncClient::new(config.options(), REQUEST_CHANNEL_CAPACITY);
        let resubscribe = client.clone();
        let host = config.host.clone();

        tokio::spawn(drive_event_loop(
            eventloop,
            client,
            host,
            config.retry_delay,
            cancel,
            move |event| match event {
                Event::Incoming(Packet::ConnAck(_)) => {
                    tracing::info!(filter = %filter, "Subscribing to MQTT input");
                    if let Err(e) = resubscribe.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                        tracing::warn!(error = %e, "Failed to queue MQTT subscription");
                    }
                }
                Event::Incoming(Packet::Publish(p)) => {
                    let msg = MqttMessage {
                        topic: p.topic,
                        payload: p.payload,
                    };
                    if message_tx.try_send(msg).is_err() {
                        tracing::warn!("MQTT input queue full or closed, message dropped");
                    }
                }
                _ => {}
            },
        ))
    }
}

// ── Event loop ───────────────────────────────────────────────────────

async fn drive_event_loop<F>(
    mut eventloop: EventLoop,
    client: AsyncClient,
    host: String,
    retry_delay: Duration,
    cancel: CancellationToken,
    mut on_event: F,
) -> Result<(), Error>
where
    F: FnMut(Event) + Send,
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            polled = eventloop.poll() => match polled {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    tracing::info!(host = %host, code = ?ack.code, "MQTT connected");
                    on_event(Event::Incoming(Packet::ConnAck(ack)));
                }
                Ok(event) => on_event(event),
                Err(e) => {
                    let err = classify_connection_error(&host, &e);
                    if err.is_auth_failure() {
                        tracing::error!(host = %host, error = %err, "MQTT credentials rejected");
                        return Err(err);
                    }
                    tracing::warn!(host = %host, error = %err, "MQTT connection error");

                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(retry_delay) => {}
                    }
                }
            }
        }
    }

    // Best effort: push a DISCONNECT out before dropping the socket.
    if client.try_disconnect().is_ok() {
        let flush = async {
            while let Ok(event) = eventloop.poll().await {
                if matches!(event, Event::Outgoing(rumqttc::Outgoing::Disconnect)) {
                    break;
                }
            }
        };
        let _ = tokio::time::timeout(DISCONNECT_GRACE, flush).await;
    }
    tracing::debug!(host = %host, "MQTT event loop exiting");
    Ok(())
}

/// Map an event-loop failure to a crate error, singling out refused
/// credentials.
pub(crate) fn classify_connection_error(host: &str, err: &ConnectionError) -> Error {
    match err {
        ConnectionError::ConnectionRefused(
            code @ (ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized),
        ) => Error::MqttAuthentication {
            host: host.to_owned(),
            reason: format!("{code:?}"),
        },
        other => Error::MqttConnection(other.to_string()),
    }
}
