// Gateway REST modules
//
// Read-only client for the deCONZ REST API plus the wire types shared with
// the event stream.

pub mod client;
pub mod models;

pub use client::GatewayClient;
pub use models::{EndpointSnapshot, Fields, GatewayConfig, StreamMessage};
