//! Device registry, enrichment, decoding, and the bridge lifecycle
//! between `zigbridge-api` and the CLI.
//!
//! - **[`Bridge`]** runs the poller, the event stream, the optional MQTT
//!   input, and the dispatcher under one cancel token.
//! - **[`DeviceRegistry`]** maps gateway endpoints to stable node ids and
//!   keeps the REST and stream views of each endpoint.
//! - **[`DecoderChain`]** turns enriched messages into outbound payloads and
//!   can be swapped while the bridge runs.

pub mod bridge;
pub mod config;
pub mod decoder;
pub mod dispatch;
pub mod enrich;
pub mod error;
pub mod model;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::{Bridge, poll_once};
pub use config::{BridgeConfig, GatewayOptions, MqttInputOptions, StreamOptions, TlsVerification};
pub use error::CoreError;
pub use zigbridge_api::{ConnectionState, MqttConfig, ReconnectConfig};

pub use decoder::{Decoder, DecodeError, DecoderChain, DecoderInput, DecoderRegistry};
pub use dispatch::{
    DispatchOutcome, DispatchSettings, Dispatcher, DropReason, InboundMessage, MessageSource,
    PreviewSink, PublishSink,
};
pub use enrich::{EnrichedMessage, EnrichmentRules, EventRule, StandardRule, SubObject};
pub use model::{Endpoint, EndpointKey, Fields, Node};
pub use store::{DeviceRegistry, PollSummary, StreamMerge, Upsert};
