//! Per-provider field-alias tables.
//!
//! Each table maps a dialect's top-level parameter name to its canonical
//! name, and is consulted in both directions:
//!
//! - parsing: unrecognised top-level parameters are folded into the request
//!   metadata under their canonical names (rename before structural
//!   conversion);
//! - emitting: a stashed parameter is restored only when the target dialect
//!   has an entry for the canonical name, i.e. recognises it. Everything else
//!   is dropped on cross-dialect trips.
//!
//! Only scalar request parameters (sampling, limits, identifiers) travel this
//! way. Content and tool structures are converted structurally, never by
//! rename.

use crate::ir::Provider;

/// `(dialect_name, canonical_name)` pairs for one provider.
type AliasTable = &'static [(&'static str, &'static str)];

const OPENAI_ALIASES: AliasTable = &[
    ("max_completion_tokens", "max_tokens"),
    ("frequency_penalty", "frequency_penalty"),
    ("presence_penalty", "presence_penalty"),
    ("seed", "seed"),
    ("n", "candidate_count"),
    ("user", "user"),
    ("logprobs", "logprobs"),
    ("top_logprobs", "top_logprobs"),
    ("logit_bias", "logit_bias"),
    ("parallel_tool_calls", "parallel_tool_calls"),
    ("response_format", "response_format"),
    ("service_tier", "service_tier"),
    ("store", "store"),
    ("metadata", "metadata"),
    ("reasoning_effort", "reasoning_effort"),
];

const ANTHROPIC_ALIASES: AliasTable = &[
    ("stop_sequences", "stop"),
    ("top_k", "top_k"),
    ("metadata", "metadata"),
    ("service_tier", "service_tier"),
    ("thinking", "thinking_config"),
];

const GEMINI_ALIASES: AliasTable = &[
    ("maxOutputTokens", "max_tokens"),
    ("stopSequences", "stop"),
    ("topP", "top_p"),
    ("topK", "top_k"),
    ("candidateCount", "candidate_count"),
    ("seed", "seed"),
    ("presencePenalty", "presence_penalty"),
    ("frequencyPenalty", "frequency_penalty"),
    ("responseMimeType", "response_mime_type"),
    ("responseSchema", "response_schema"),
    ("responseLogprobs", "logprobs"),
    ("thinkingConfig", "thinking_config"),
];

/// The rename table for one provider.
pub fn provider_aliases(provider: Provider) -> AliasTable {
    match provider {
        Provider::OpenAi => OPENAI_ALIASES,
        Provider::Anthropic => ANTHROPIC_ALIASES,
        Provider::Gemini => GEMINI_ALIASES,
    }
}

/// Canonical name for a dialect parameter. Unlisted names pass through
/// unchanged; they are still carried, just under their original spelling.
pub fn to_canonical(provider: Provider, name: &str) -> &str {
    provider_aliases(provider)
        .iter()
        .find(|(dialect, _)| *dialect == name)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(name)
}

/// Dialect spelling for a canonical parameter, or `None` when the provider
/// does not recognise it.
pub fn to_dialect(provider: Provider, canonical: &str) -> Option<&'static str> {
    provider_aliases(provider)
        .iter()
        .find(|(_, c)| *c == canonical)
        .map(|(dialect, _)| *dialect)
}

/// Whether the provider has any spelling for a canonical parameter.
pub fn recognizes(provider: Provider, canonical: &str) -> bool {
    to_dialect(provider, canonical).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_bijective_per_provider() {
        use std::collections::BTreeSet;

        for provider in Provider::all() {
            let table = provider_aliases(provider);
            let dialect_names: BTreeSet<_> = table.iter().map(|(d, _)| d).collect();
            let canonical_names: BTreeSet<_> = table.iter().map(|(_, c)| c).collect();
            assert_eq!(dialect_names.len(), table.len(), "{provider}: duplicate dialect name");
            assert_eq!(canonical_names.len(), table.len(), "{provider}: duplicate canonical name");
        }
    }

    #[test]
    fn gemini_limits_map_to_canonical_names() {
        assert_eq!(to_canonical(Provider::Gemini, "maxOutputTokens"), "max_tokens");
        assert_eq!(to_dialect(Provider::Gemini, "top_k"), Some("topK"));
        assert_eq!(to_canonical(Provider::Gemini, "unknownField"), "unknownField");
    }

    #[test]
    fn top_k_crosses_between_anthropic_and_gemini_only() {
        assert!(recognizes(Provider::Anthropic, "top_k"));
        assert!(recognizes(Provider::Gemini, "top_k"));
        assert!(!recognizes(Provider::OpenAi, "top_k"));
    }
}
