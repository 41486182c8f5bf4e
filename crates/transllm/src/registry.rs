//! Process-wide provider registry.
//!
//! A read-heavy shared table: the built-in adapters are installed on first
//! access, further writes normally happen only during process
//! initialisation. Reads take the shared side of the lock; `register`,
//! `unregister` and `clear` take the exclusive side. Translation operations
//! never write.

use std::collections::HashMap;
use std::sync::{LazyLock, PoisonError, RwLock};

use crate::adapter::DialectAdapter;
use crate::adapters::{AnthropicAdapter, GeminiAdapter, OpenAiAdapter};
use crate::error::{Result, TransLLMError};
use crate::ir::Provider;

/// Builds a fresh adapter instance. Instances are per-session; the registry
/// stores only constructors.
pub type AdapterConstructor = fn() -> Box<dyn DialectAdapter>;

static REGISTRY: LazyLock<RwLock<HashMap<Provider, AdapterConstructor>>> = LazyLock::new(|| {
    let mut adapters: HashMap<Provider, AdapterConstructor> = HashMap::new();
    adapters.insert(Provider::OpenAi, || Box::new(OpenAiAdapter::new()));
    adapters.insert(Provider::Anthropic, || Box::new(AnthropicAdapter::new()));
    adapters.insert(Provider::Gemini, || Box::new(GeminiAdapter::new()));
    RwLock::new(adapters)
});

/// Install (or replace) the adapter constructor for a provider.
pub fn register(provider: Provider, constructor: AdapterConstructor) {
    REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(provider, constructor);
}

/// Remove a provider. Returns whether it was registered.
pub fn unregister(provider: Provider) -> bool {
    REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&provider)
        .is_some()
}

/// Remove every registered adapter, built-ins included.
pub fn clear() {
    REGISTRY.write().unwrap_or_else(PoisonError::into_inner).clear();
}

/// Whether an adapter is registered for the provider.
pub fn is_supported(provider: Provider) -> bool {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .contains_key(&provider)
}

/// Canonical names of all registered providers, sorted.
pub fn list() -> Vec<String> {
    let mut names: Vec<String> = REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .map(|provider| provider.as_str().to_string())
        .collect();
    names.sort();
    names
}

/// A fresh adapter instance for the provider.
pub fn get_adapter(provider: Provider) -> Result<Box<dyn DialectAdapter>> {
    let constructor = REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&provider)
        .copied();

    match constructor {
        Some(constructor) => Ok(constructor()),
        None => Err(TransLLMError::UnsupportedProvider {
            provider: provider.as_str().to_string(),
            supported: list(),
        }),
    }
}

/// The registry is process-global, so a test that unregisters a built-in
/// would race every other test resolving adapters. Tests that mutate the
/// registry take the write side; tests that resolve through it take the read
/// side.
#[cfg(test)]
pub(crate) static REGISTRY_TEST_LOCK: RwLock<()> = RwLock::new(());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_ins_are_registered_by_default() {
        let _guard = REGISTRY_TEST_LOCK.read().unwrap_or_else(PoisonError::into_inner);
        for provider in Provider::all() {
            assert!(is_supported(provider), "{provider} should have a built-in adapter");
        }

        let adapter = get_adapter(Provider::OpenAi).unwrap();
        assert_eq!(adapter.provider(), Provider::OpenAi);
    }

    #[test]
    fn unregister_then_register_round_trips() {
        let _guard = REGISTRY_TEST_LOCK.write().unwrap_or_else(PoisonError::into_inner);

        assert!(unregister(Provider::Gemini));
        assert!(!is_supported(Provider::Gemini));

        let err = get_adapter(Provider::Gemini).unwrap_err();
        let TransLLMError::UnsupportedProvider { provider, supported } = err else {
            unreachable!("missing provider must map to UnsupportedProvider");
        };
        assert_eq!(provider, "gemini");
        assert!(supported.contains(&"openai".to_string()));

        register(Provider::Gemini, || Box::new(crate::adapters::GeminiAdapter::new()));
        assert!(is_supported(Provider::Gemini));
    }
}
