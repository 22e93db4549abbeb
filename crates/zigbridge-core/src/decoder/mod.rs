// ── Decoder chain ──
//
// Format-specific transformers tried in priority order; the first decoder
// whose `test` accepts a message produces the outbound payload. The chain
// is rebuilt by name from a registry and swapped atomically, so a reload
// never leaves a dispatch looking at a half-built list.

mod builtin;
mod chain;
mod registry;

use serde_json::Value;
use thiserror::Error;

pub use builtin::{AcpJsonDecoder, DeconzDecoder};
pub use chain::{Decoded, DecoderChain};
pub use registry::{DecoderFactory, DecoderRegistry};

/// What a decoder sees: the inbound topic, the raw payload, and the
/// parsed (and possibly enriched) JSON if there is any.
#[derive(Debug, Clone, Copy)]
pub struct DecoderInput<'a> {
    pub topic: Option<&'a str>,
    pub payload: &'a [u8],
    pub json: Option<&'a Value>,
}

impl DecoderInput<'_> {
    /// The JSON object, if the payload was one.
    pub fn object(&self) -> Option<&serde_json::Map<String, Value>> {
        self.json.and_then(Value::as_object)
    }
}

/// A matcher/transformer pair.
pub trait Decoder: Send + Sync {
    /// Registry name, e.g. `"deconz"`.
    fn name(&self) -> &str;

    /// Whether this decoder handles the message.
    fn test(&self, input: &DecoderInput<'_>) -> bool;

    /// Transform the message into its outbound shape.
    fn decode(&self, input: &DecoderInput<'_>) -> Result<Value, DecodeError>;
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown decoder: {0}")]
    UnknownDecoder(String),

    #[error("decoder {decoder} failed: {reason}")]
    Failed { decoder: String, reason: String },
}
