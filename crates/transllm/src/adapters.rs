//! Built-in dialect adapters.

use serde_json::{Map, Value};

use crate::aliases;
use crate::ir::{EXTRA_PARAMS_KEY, ORIGIN_KEY, Provider};

pub(crate) mod anthropic;
pub(crate) mod gemini;
pub(crate) mod openai;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;

/// Build the metadata bag for a freshly parsed document: the origin dialect
/// plus any top-level parameters the IR has no field for, stored under their
/// canonical names.
pub(crate) fn metadata_with_extras(provider: Provider, extra: Map<String, Value>) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert(ORIGIN_KEY.to_string(), Value::String(provider.as_str().to_string()));

    if !extra.is_empty() {
        let mut canonical = Map::new();
        for (name, value) in extra {
            let key = aliases::to_canonical(provider, &name);
            canonical.insert(key.to_string(), value);
        }
        metadata.insert(EXTRA_PARAMS_KEY.to_string(), Value::Object(canonical));
    }

    metadata
}

/// Parameters to splice back into an outgoing document.
///
/// Same-dialect trips restore everything; cross-dialect trips restore only
/// what the target recognises through its alias table, renamed to the
/// target's spelling. The rest is dropped.
pub(crate) fn restore_extras(provider: Provider, metadata: &Map<String, Value>) -> Map<String, Value> {
    let same_dialect = origin_is(metadata, provider);
    let mut restored = Map::new();

    let Some(Value::Object(extras)) = metadata.get(EXTRA_PARAMS_KEY) else {
        return restored;
    };

    for (canonical, value) in extras {
        match aliases::to_dialect(provider, canonical) {
            Some(dialect_name) => {
                restored.insert(dialect_name.to_string(), value.clone());
            }
            None if same_dialect => {
                restored.insert(canonical.clone(), value.clone());
            }
            None => {
                log::debug!("dropping parameter '{canonical}' with no {provider} counterpart");
            }
        }
    }

    restored
}

/// Whether the metadata bag records `provider` as the parsing dialect.
pub(crate) fn origin_is(metadata: &Map<String, Value>, provider: Provider) -> bool {
    metadata
        .get(ORIGIN_KEY)
        .and_then(Value::as_str)
        .is_some_and(|origin| origin == provider.as_str())
}
