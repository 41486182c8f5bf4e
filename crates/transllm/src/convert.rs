//! Stateless one-shot document conversion.

use serde_json::Value;

use crate::compare::{diff, structural_eq};
use crate::error::{Result, TransLLMError};
use crate::ir::Provider;
use crate::registry;

/// Converts whole request and response documents between dialects.
///
/// Holds no state: adapters are resolved per call, and a same-dialect
/// conversion is a deep copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentConverter;

impl DocumentConverter {
    pub fn new() -> Self {
        Self
    }

    /// Translate a request document from one dialect to another.
    pub fn convert_request(&self, doc: &Value, from: Provider, to: Provider) -> Result<Value> {
        if from == to {
            return Ok(doc.clone());
        }

        let source = registry::get_adapter(from)?;
        let target = registry::get_adapter(to)?;

        let unified = source
            .to_unified_request(doc)
            .map_err(|err| err.annotate(from, to))?;
        target
            .from_unified_request(&unified)
            .map_err(|err| err.annotate(from, to))
    }

    /// Translate a response document from one dialect to another.
    pub fn convert_response(&self, doc: &Value, from: Provider, to: Provider) -> Result<Value> {
        if from == to {
            return Ok(doc.clone());
        }

        let source = registry::get_adapter(from)?;
        let target = registry::get_adapter(to)?;

        let unified = source
            .to_unified_response(doc)
            .map_err(|err| err.annotate(from, to))?;
        target
            .from_unified_response(&unified)
            .map_err(|err| err.annotate(from, to))
    }

    /// Verify that a request survives the A → IR → A trip under structural
    /// equality (lists as multisets, maps modulo key order).
    pub fn check_request_idempotency(&self, doc: &Value, provider: Provider) -> Result<()> {
        let adapter = registry::get_adapter(provider)?;
        let unified = adapter.to_unified_request(doc).map_err(|err| err.with_source(provider))?;
        let converted = adapter
            .from_unified_request(&unified)
            .map_err(|err| err.with_target(provider))?;
        verdict(doc, converted)
    }

    /// Same check for responses.
    pub fn check_response_idempotency(&self, doc: &Value, provider: Provider) -> Result<()> {
        let adapter = registry::get_adapter(provider)?;
        let unified = adapter.to_unified_response(doc).map_err(|err| err.with_source(provider))?;
        let converted = adapter
            .from_unified_response(&unified)
            .map_err(|err| err.with_target(provider))?;
        verdict(doc, converted)
    }
}

fn verdict(original: &Value, converted: Value) -> Result<()> {
    if structural_eq(original, &converted) {
        return Ok(());
    }
    Err(TransLLMError::Idempotency {
        differences: diff(original, &converted),
        original: Box::new(original.clone()),
        converted: Box::new(converted),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::REGISTRY_TEST_LOCK;
    use insta::assert_json_snapshot;
    use serde_json::json;
    use std::sync::PoisonError;

    #[test]
    fn simple_text_request_crosses_from_openai_to_anthropic() {
        let _guard = REGISTRY_TEST_LOCK.read().unwrap_or_else(PoisonError::into_inner);
        let converter = DocumentConverter::new();

        let doc = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        });

        let converted = converter
            .convert_request(&doc, Provider::OpenAi, Provider::Anthropic)
            .unwrap();

        // Value objects render with sorted keys.
        assert_json_snapshot!(converted, @r#"
        {
          "max_tokens": 4096,
          "messages": [
            {
              "content": [
                {
                  "text": "hi",
                  "type": "text"
                }
              ],
              "role": "user"
            }
          ],
          "model": "gpt-4o"
        }
        "#);
    }

    #[test]
    fn same_dialect_conversion_is_a_deep_copy() {
        let _guard = REGISTRY_TEST_LOCK.read().unwrap_or_else(PoisonError::into_inner);
        let converter = DocumentConverter::new();

        // Nothing here parses as a valid request; from == to must not care.
        let doc = json!({"anything": {"goes": [1, 2, 3]}});
        let copied = converter
            .convert_request(&doc, Provider::Gemini, Provider::Gemini)
            .unwrap();
        assert_eq!(doc, copied);
    }

    #[test]
    fn tool_information_survives_openai_to_gemini() {
        let _guard = REGISTRY_TEST_LOCK.read().unwrap_or_else(PoisonError::into_inner);
        let converter = DocumentConverter::new();

        let doc = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "Weather in Paris?"}],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "get_weather",
                    "description": "Get the weather",
                    "parameters": {
                        "type": "object",
                        "properties": {"location": {"type": "string"}},
                        "required": ["location"]
                    }
                }
            }],
            "tool_choice": "auto",
            "max_tokens": 300,
            "temperature": 0.5
        });

        let converted = converter
            .convert_request(&doc, Provider::OpenAi, Provider::Gemini)
            .unwrap();

        let declaration = &converted["tools"][0]["functionDeclarations"][0];
        assert_eq!(declaration["name"], "get_weather");
        assert_eq!(declaration["parameters"]["properties"]["location"]["type"], "string");
        assert_eq!(
            converted["toolConfig"]["functionCallingConfig"]["mode"],
            "AUTO"
        );
        assert_eq!(converted["generationConfig"]["maxOutputTokens"], 300);
        assert_eq!(converted["generationConfig"]["temperature"], 0.5);
    }

    #[test]
    fn response_essentials_survive_anthropic_to_openai() {
        let _guard = REGISTRY_TEST_LOCK.read().unwrap_or_else(PoisonError::into_inner);
        let converter = DocumentConverter::new();

        let doc = json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4-20250514",
            "content": [
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"location": "Paris"}}
            ],
            "stop_reason": "tool_use",
            "stop_sequence": null,
            "usage": {"input_tokens": 30, "output_tokens": 11}
        });

        let converted = converter
            .convert_response(&doc, Provider::Anthropic, Provider::OpenAi)
            .unwrap();

        let message = &converted["choices"][0]["message"];
        assert_eq!(message["content"], "Checking.");
        assert_eq!(message["tool_calls"][0]["function"]["name"], "get_weather");
        assert_eq!(
            message["tool_calls"][0]["function"]["arguments"],
            "{\"location\":\"Paris\"}"
        );
        assert_eq!(converted["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(converted["usage"]["prompt_tokens"], 30);
        assert_eq!(converted["usage"]["completion_tokens"], 11);
    }

    #[test]
    fn request_idempotency_holds_for_reference_documents() {
        let _guard = REGISTRY_TEST_LOCK.read().unwrap_or_else(PoisonError::into_inner);
        let converter = DocumentConverter::new();

        let openai = json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "hi"}
            ],
            "temperature": 0.2,
            "stream": false
        });
        converter.check_request_idempotency(&openai, Provider::OpenAi).unwrap();

        let anthropic = json!({
            "model": "claude-sonnet-4-20250514",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}]
        });
        converter
            .check_request_idempotency(&anthropic, Provider::Anthropic)
            .unwrap();

        let gemini = json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "generationConfig": {"maxOutputTokens": 100}
        });
        converter.check_request_idempotency(&gemini, Provider::Gemini).unwrap();
    }

    #[test]
    fn known_lossy_fields_surface_as_idempotency_errors() {
        let _guard = REGISTRY_TEST_LOCK.read().unwrap_or_else(PoisonError::into_inner);
        let converter = DocumentConverter::new();

        // Participant names are not modelled; the check must say so rather
        // than silently passing.
        let doc = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi", "name": "alice"}]
        });

        let err = converter.check_request_idempotency(&doc, Provider::OpenAi).unwrap_err();
        let TransLLMError::Idempotency { differences, .. } = err else {
            unreachable!("expected Idempotency, got {err:?}");
        };
        assert!(
            differences.iter().any(|difference| difference.contains("name")),
            "differences were {differences:?}"
        );
    }

    #[test]
    fn conversion_errors_carry_the_direction() {
        let _guard = REGISTRY_TEST_LOCK.read().unwrap_or_else(PoisonError::into_inner);
        let converter = DocumentConverter::new();

        // Tool message without an id fails in the source adapter.
        let doc = json!({
            "model": "gpt-4o",
            "messages": [{"role": "tool", "content": "orphan"}]
        });

        let err = converter
            .convert_request(&doc, Provider::OpenAi, Provider::Anthropic)
            .unwrap_err();
        let TransLLMError::Conversion { from, to, .. } = err else {
            unreachable!("expected Conversion, got {err:?}");
        };
        assert_eq!(from, Some(Provider::OpenAi));
        assert_eq!(to, Some(Provider::Anthropic));
    }
}
