// ── Decoder name table ──

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::builtin::{AcpJsonDecoder, DeconzDecoder};
use super::{DecodeError, Decoder};

/// Builds a fresh decoder instance.
pub type DecoderFactory = Arc<dyn Fn() -> Arc<dyn Decoder> + Send + Sync>;

/// Maps decoder names to constructors. Chains are built from this table
/// by name; new decoders can be registered at runtime.
pub struct DecoderRegistry {
    factories: RwLock<BTreeMap<String, DecoderFactory>>,
}

impl DecoderRegistry {
    /// An empty table.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(BTreeMap::new()),
        }
    }

    /// The table with `deconz` and `acp_json` registered.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("deconz", || Arc::new(DeconzDecoder));
        registry.register("acp_json", || Arc::new(AcpJsonDecoder));
        registry
    }

    /// Add or replace a decoder constructor.
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Decoder> + Send + Sync + 'static,
    {
        self.factories.write().insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }

    /// Instantiate `names` in order. Fails on the first unknown name
    /// without building anything.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Arc<dyn Decoder>>, DecodeError> {
        let factories = self.factories.read();
        let selected = names
            .iter()
            .map(|name| {
                factories
                    .get(name)
                    .cloned()
                    .ok_or_else(|| DecodeError::UnknownDecoder(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        drop(factories);

        Ok(selected.iter().map(|factory| factory()).collect())
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::decoder::DecoderInput;

    struct Never;

    impl Decoder for Never {
        fn name(&self) -> &str {
            "never"
        }

        fn test(&self, _input: &DecoderInput<'_>) -> bool {
            false
        }

        fn decode(&self, _input: &DecoderInput<'_>) -> Result<Value, DecodeError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn builtins_are_registered() {
        let registry = DecoderRegistry::with_builtins();
        assert_eq!(registry.names(), ["acp_json", "deconz"]);
    }

    #[test]
    fn runtime_registration() {
        let registry = DecoderRegistry::new();
        assert!(!registry.contains("never"));

        registry.register("never", || Arc::new(Never));

        let decoders = registry.resolve(&["never".to_owned()]).unwrap();
        assert_eq!(decoders[0].name(), "never");
    }

    #[test]
    fn resolve_reports_unknown_name() {
        let registry = DecoderRegistry::with_builtins();
        let err = registry
            .resolve(&["deconz".to_owned(), "zigbee2mqtt".to_owned()])
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "unknown decoder: zigbee2mqtt");
    }
}
