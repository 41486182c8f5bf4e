//! Per-session stream conversion.
//!
//! One converter instance serves one live stream. It caches an adapter per
//! provider so sequence counters, open-index maps and tool-id bookkeeping
//! persist across the events of the session, and never leak into another
//! session (each session constructs its own converter).

use std::collections::HashMap;

use serde_json::Value;

use crate::adapter::DialectAdapter;
use crate::compare::structural_eq;
use crate::error::{Result, TransLLMError};
use crate::ir::{Provider, StreamEvent};
use crate::registry;

/// Fields a round-trip must reproduce for an event to count as idempotent.
/// Everything else (ids, timestamps, models) is session dressing.
const COMPARED_KEYS: [&str; 6] = ["type", "index", "delta", "choices", "candidates", "usage"];

#[derive(Default)]
pub struct StreamConverter {
    adapters: HashMap<Provider, Box<dyn DialectAdapter>>,
}

impl StreamConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one wire event from `from` into zero or more wire events in
    /// `to`, advancing both sides' session state.
    pub fn convert_stream_event(&mut self, doc: &Value, from: Provider, to: Provider) -> Result<Vec<Value>> {
        let events = self.to_unified_event(doc, from)?;

        let mut converted = Vec::new();
        for event in &events {
            converted.extend(self.from_unified_event(event, to)?);
        }
        Ok(converted)
    }

    /// Wire event → neutral events.
    pub fn to_unified_event(&mut self, doc: &Value, from: Provider) -> Result<Vec<StreamEvent>> {
        self.adapter(from)?
            .to_unified_stream_event(doc)
            .map_err(|err| err.with_source(from))
    }

    /// Neutral event → wire events.
    pub fn from_unified_event(&mut self, event: &StreamEvent, to: Provider) -> Result<Vec<Value>> {
        self.adapter(to)?
            .from_unified_stream_event(event)
            .map_err(|err| err.with_target(to))
    }

    /// Drop the cached adapter for a provider along with all its session
    /// bookkeeping. The next event builds a fresh one.
    pub fn reset_stream_state(&mut self, provider: Provider) {
        if let Some(mut adapter) = self.adapters.remove(&provider) {
            adapter.reset_stream_state();
        }
    }

    /// Drop every cached adapter.
    pub fn reset_all_states(&mut self) {
        for adapter in self.adapters.values_mut() {
            adapter.reset_stream_state();
        }
        self.adapters.clear();
    }

    /// Whether an event survives the A → IR → A trip: the last re-emitted
    /// wire event must structurally match the source on its payload-carrying
    /// fields.
    pub fn check_idempotency(&mut self, doc: &Value, provider: Provider) -> Result<bool> {
        let events = self.to_unified_event(doc, provider)?;

        let mut restored = Vec::new();
        for event in &events {
            restored.extend(self.from_unified_event(event, provider)?);
        }

        let Some(last) = restored.last() else {
            return Ok(false);
        };

        for key in COMPARED_KEYS {
            if let Some(expected) = doc.get(key) {
                let matches = last.get(key).is_some_and(|actual| structural_eq(expected, actual));
                if !matches {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn adapter(&mut self, provider: Provider) -> Result<&mut Box<dyn DialectAdapter>> {
        if !self.adapters.contains_key(&provider) {
            let adapter = registry::get_adapter(provider)?;
            self.adapters.insert(provider, adapter);
        }
        self.adapters.get_mut(&provider).ok_or_else(|| {
            TransLLMError::UnsupportedProvider {
                provider: provider.as_str().to_string(),
                supported: registry::list(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::REGISTRY_TEST_LOCK;
    use serde_json::json;
    use std::sync::PoisonError;

    fn openai_text_chunks() -> Vec<Value> {
        vec![
            json!({"choices": [{"index": 0, "delta": {"content": "Hello"}, "finish_reason": null}]}),
            json!({"choices": [{"index": 0, "delta": {"content": " world"}, "finish_reason": null}]}),
            json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}),
        ]
    }

    #[test]
    fn openai_stream_renders_as_anthropic_sse() {
        let _guard = REGISTRY_TEST_LOCK.read().unwrap_or_else(PoisonError::into_inner);
        let mut converter = StreamConverter::new();

        let mut out = Vec::new();
        for chunk in openai_text_chunks() {
            out.extend(
                converter
                    .convert_stream_event(&chunk, Provider::OpenAi, Provider::Anthropic)
                    .unwrap(),
            );
        }

        let types: Vec<&str> = out.iter().filter_map(|event| event["type"].as_str()).collect();
        assert_eq!(
            types,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        assert_eq!(out[1]["content_block"]["type"], "text");
        assert_eq!(out[2]["delta"]["text"], "Hello");
        assert_eq!(out[3]["delta"]["text"], " world");
        assert_eq!(out[5]["delta"]["stop_reason"], "end_turn");
    }

    #[test]
    fn anthropic_tool_stream_renders_as_openai_fragments() {
        let _guard = REGISTRY_TEST_LOCK.read().unwrap_or_else(PoisonError::into_inner);
        let mut converter = StreamConverter::new();

        let events = vec![
            json!({
                "type": "content_block_start",
                "index": 1,
                "content_block": {"type": "tool_use", "id": "toolu_01", "name": "get_weather", "input": {}}
            }),
            json!({
                "type": "content_block_delta",
                "index": 1,
                "delta": {"type": "input_json_delta", "partial_json": "{\"location\""}
            }),
            json!({
                "type": "content_block_delta",
                "index": 1,
                "delta": {"type": "input_json_delta", "partial_json": ": \"Beijing\"}"}
            }),
        ];

        let mut chunks = Vec::new();
        for event in events {
            chunks.extend(
                converter
                    .convert_stream_event(&event, Provider::Anthropic, Provider::OpenAi)
                    .unwrap(),
            );
        }

        let mut arguments = String::new();
        let mut id = None;
        let mut name = None;
        for chunk in &chunks {
            let Some(calls) = chunk["choices"][0]["delta"]["tool_calls"].as_array() else {
                continue;
            };
            for call in calls {
                if let Some(value) = call["id"].as_str() {
                    id = Some(value.to_string());
                }
                if let Some(value) = call["function"]["name"].as_str() {
                    name = Some(value.to_string());
                }
                if let Some(fragment) = call["function"]["arguments"].as_str() {
                    arguments.push_str(fragment);
                }
            }
        }

        assert_eq!(id.as_deref(), Some("toolu_01"));
        assert_eq!(name.as_deref(), Some("get_weather"));
        assert_eq!(arguments, "{\"location\": \"Beijing\"}");
    }

    #[test]
    fn sessions_do_not_share_state() {
        let _guard = REGISTRY_TEST_LOCK.read().unwrap_or_else(PoisonError::into_inner);
        let chunk = json!({"choices": [{"index": 0, "delta": {"content": "x"}, "finish_reason": null}]});

        let mut first = StreamConverter::new();
        let events = first.to_unified_event(&chunk, Provider::OpenAi).unwrap();
        let last_sequence = events.last().unwrap().sequence_id;
        assert!(last_sequence > 0);

        // A different session starts over at zero.
        let mut second = StreamConverter::new();
        let events = second.to_unified_event(&chunk, Provider::OpenAi).unwrap();
        assert_eq!(events.first().unwrap().sequence_id, 0);
    }

    #[test]
    fn reset_stream_state_forgets_session_bookkeeping() {
        let _guard = REGISTRY_TEST_LOCK.read().unwrap_or_else(PoisonError::into_inner);
        let mut converter = StreamConverter::new();
        let chunk = json!({"choices": [{"index": 0, "delta": {"content": "x"}, "finish_reason": null}]});

        let before = converter.to_unified_event(&chunk, Provider::OpenAi).unwrap();
        converter.reset_stream_state(Provider::OpenAi);
        let after = converter.to_unified_event(&chunk, Provider::OpenAi).unwrap();

        // Same event count and same starting sequence id as a fresh session.
        assert_eq!(before.len(), after.len());
        assert_eq!(after.first().unwrap().sequence_id, 0);

        converter.reset_all_states();
        let again = converter.to_unified_event(&chunk, Provider::OpenAi).unwrap();
        assert_eq!(again.first().unwrap().sequence_id, 0);
    }

    #[test]
    fn stream_events_are_idempotent_per_dialect() {
        let _guard = REGISTRY_TEST_LOCK.read().unwrap_or_else(PoisonError::into_inner);

        let mut converter = StreamConverter::new();
        let openai_chunk = json!({"choices": [{"index": 0, "delta": {"content": "Hello"}, "finish_reason": null}]});
        assert!(converter.check_idempotency(&openai_chunk, Provider::OpenAi).unwrap());

        let mut converter = StreamConverter::new();
        let anthropic_event = json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": "Hello, world!"}
        });
        assert!(converter.check_idempotency(&anthropic_event, Provider::Anthropic).unwrap());
    }
}
