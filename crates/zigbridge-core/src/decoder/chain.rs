// ── Ordered, swappable decoder list ──

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::Value;
use tracing::info;

use super::{DecodeError, Decoder, DecoderInput, DecoderRegistry};

/// First-match-wins decoder list.
///
/// Readers load the current `Arc<Vec<_>>` without locking; a rebuild
/// stores a complete new list in one pointer swap, so an in-flight
/// dispatch sees either the old chain or the new one, never a mix.
pub struct DecoderChain {
    decoders: ArcSwap<Vec<Arc<dyn Decoder>>>,
}

/// A decoder matched; `output` is its result.
pub struct Decoded {
    pub decoder: String,
    pub output: Result<Value, DecodeError>,
}

impl DecoderChain {
    pub fn new(decoders: Vec<Arc<dyn Decoder>>) -> Self {
        Self {
            decoders: ArcSwap::from_pointee(decoders),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Resolve `names` against `registry` and swap in the result. On an
    /// unknown name nothing changes and the current chain stays active.
    pub fn rebuild(&self, registry: &DecoderRegistry, names: &[String]) -> Result<(), DecodeError> {
        let decoders = registry.resolve(names)?;
        self.swap(decoders);
        info!(decoders = ?names, "decoder chain rebuilt");
        Ok(())
    }

    pub fn swap(&self, decoders: Vec<Arc<dyn Decoder>>) {
        self.decoders.store(Arc::new(decoders));
    }

    /// Names of the active decoders, in priority order.
    pub fn names(&self) -> Vec<String> {
        self.decoders
            .load()
            .iter()
            .map(|d| d.name().to_owned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.load().is_empty()
    }

    pub fn len(&self) -> usize {
        self.decoders.load().len()
    }

    /// Run the first decoder that accepts `input`. `None` if none did.
    pub fn decode(&self, input: &DecoderInput<'_>) -> Option<Decoded> {
        let decoders = self.decoders.load();
        let decoder = decoders.iter().find(|d| d.test(input))?;
        Some(Decoded {
            decoder: decoder.name().to_owned(),
            output: decoder.decode(input),
        })
    }
}

impl Default for DecoderChain {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Accepts payloads containing `needle`; decodes to its own name.
    struct Tagging {
        name: &'static str,
        needle: &'static str,
    }

    impl Decoder for Tagging {
        fn name(&self) -> &str {
            self.name
        }

        fn test(&self, input: &DecoderInput<'_>) -> bool {
            std::str::from_utf8(input.payload).is_ok_and(|s| s.contains(self.needle))
        }

        fn decode(&self, _input: &DecoderInput<'_>) -> Result<Value, DecodeError> {
            Ok(json!({ "by": self.name }))
        }
    }

    fn input(payload: &[u8]) -> DecoderInput<'_> {
        DecoderInput {
            topic: Some("zigbee/x"),
            payload,
            json: None,
        }
    }

    fn chain_of(decoders: &[(&'static str, &'static str)]) -> DecoderChain {
        DecoderChain::new(
            decoders
                .iter()
                .map(|&(name, needle)| Arc::new(Tagging { name, needle }) as Arc<dyn Decoder>)
                .collect(),
        )
    }

    #[test]
    fn first_match_wins() {
        let chain = chain_of(&[("a", "foo"), ("b", "o")]);

        let decoded = chain.decode(&input(b"foo")).unwrap();
        assert_eq!(decoded.decoder, "a");
        assert_eq!(decoded.output.unwrap(), json!({ "by": "a" }));

        let decoded = chain.decode(&input(b"bo")).unwrap();
        assert_eq!(decoded.decoder, "b");
    }

    #[test]
    fn no_match_is_none() {
        let chain = chain_of(&[("a", "foo")]);
        assert!(chain.decode(&input(b"bar")).is_none());
        assert!(DecoderChain::empty().decode(&input(b"foo")).is_none());
    }

    #[test]
    fn rebuild_with_unknown_name_keeps_old_chain() {
        let registry = DecoderRegistry::with_builtins();
        let chain = DecoderChain::empty();
        chain
            .rebuild(&registry, &["acp_json".to_owned()])
            .unwrap();

        let err = chain
            .rebuild(&registry, &["deconz".to_owned(), "nope".to_owned()])
            .unwrap_err();

        assert!(matches!(err, DecodeError::UnknownDecoder(ref n) if n == "nope"));
        assert_eq!(chain.names(), ["acp_json"]);
    }

    #[test]
    fn rebuild_swaps_in_order() {
        let registry = DecoderRegistry::with_builtins();
        let chain = DecoderChain::empty();
        chain
            .rebuild(&registry, &["acp_json".to_owned(), "deconz".to_owned()])
            .unwrap();
        assert_eq!(chain.names(), ["acp_json", "deconz"]);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn loaded_snapshot_survives_swap() {
        let chain = chain_of(&[("a", "x")]);
        let held = chain.decoders.load_full();
        chain.swap(Vec::new());

        assert_eq!(held.len(), 1);
        assert!(chain.is_empty());
    }
}
