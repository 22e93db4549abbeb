//! Async clients for the deCONZ gateway (REST and event WebSocket) and
//! MQTT brokers.

pub mod error;
pub mod gateway;
pub mod mqtt;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use gateway::{EndpointSnapshot, GatewayClient, GatewayConfig, StreamMessage};
pub use mqtt::{MqttConfig, MqttMessage, MqttPublisher, MqttSubscriber};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{ConnectionState, EventStream, ReconnectConfig};
