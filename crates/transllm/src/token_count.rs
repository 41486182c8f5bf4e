//! Advisory input-token estimation.
//!
//! Not part of translation: callers (the count_tokens endpoint, logging)
//! want a number before the upstream answers. Uses the real tokenizer when
//! `tiktoken` knows the model, the `cl100k_base` encoding otherwise, and a
//! four-characters-per-token ceiling when no tokenizer is available at all.

use std::sync::LazyLock;

use tiktoken_rs::CoreBPE;

use crate::ir::{ContentBlock, CoreRequest, MessageContent, ToolArguments};

static FALLBACK_ENCODING: LazyLock<Option<CoreBPE>> = LazyLock::new(|| tiktoken_rs::cl100k_base().ok());

/// Estimated input tokens for a request.
pub fn estimate_request_tokens(request: &CoreRequest) -> u32 {
    let text = collect_text(request);
    estimate_tokens(&text, Some(&request.model))
}

/// Estimated tokens for a piece of text.
pub fn estimate_tokens(text: &str, model: Option<&str>) -> u32 {
    if text.is_empty() {
        return 1;
    }

    if let Some(model) = model
        && let Ok(encoding) = tiktoken_rs::get_bpe_from_model(model)
    {
        return encoding.encode_with_special_tokens(text).len() as u32;
    }

    if let Some(encoding) = FALLBACK_ENCODING.as_ref() {
        return encoding.encode_with_special_tokens(text).len() as u32;
    }

    (text.len() as u32).div_ceil(4).max(1)
}

/// Flattens every text-like piece of a request into one string: the system
/// prompt, roles, message content, thinking, tool results and tool-call
/// arguments all count toward the prompt.
fn collect_text(request: &CoreRequest) -> String {
    let mut pieces: Vec<String> = Vec::new();

    if let Some(system) = &request.system_instruction {
        pieces.push(system.clone());
    }

    for message in &request.messages {
        pieces.push(serde_json::to_string(&message.role).unwrap_or_default());

        match &message.content {
            MessageContent::Text(text) => pieces.push(text.clone()),
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } | ContentBlock::Reasoning { text } => {
                            pieces.push(text.clone());
                        }
                        ContentBlock::Thinking { thinking, .. } => pieces.push(thinking.clone()),
                        ContentBlock::RedactedThinking { data } => pieces.push(data.clone()),
                        ContentBlock::ToolResult { content, .. } => {
                            pieces.push(serde_json::to_string(content).unwrap_or_default());
                        }
                        ContentBlock::ToolUse { name, arguments, .. } => {
                            pieces.push(name.clone());
                            pieces.push(arguments.to_json_string());
                        }
                        ContentBlock::ImageUrl { url, .. } => pieces.push(url.clone()),
                    }
                }
            }
        }

        if let Some(calls) = &message.tool_calls {
            for call in calls {
                pieces.push(call.name.clone());
                pieces.push(match &call.arguments {
                    ToolArguments::Text(raw) => raw.clone(),
                    structured => structured.to_json_string(),
                });
            }
        }
    }

    pieces.retain(|piece| !piece.is_empty());
    pieces.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Message, Role, ToolCall};
    use serde_json::json;

    #[test]
    fn empty_text_costs_at_least_one_token() {
        assert_eq!(estimate_tokens("", None), 1);
    }

    #[test]
    fn longer_requests_cost_more() {
        let short = CoreRequest {
            model: "gpt-4o".to_string(),
            messages: vec![Message::text(Role::User, "hi")],
            ..Default::default()
        };

        let long = CoreRequest {
            model: "gpt-4o".to_string(),
            system_instruction: Some("You are an assistant that answers at length.".to_string()),
            messages: vec![
                Message::text(Role::User, "Please explain the borrow checker in detail."),
                Message::text(Role::Assistant, "The borrow checker enforces aliasing rules."),
            ],
            ..Default::default()
        };

        assert!(estimate_request_tokens(&long) > estimate_request_tokens(&short));
    }

    #[test]
    fn tool_calls_count_toward_the_estimate() {
        let bare = CoreRequest {
            model: "gpt-4o".to_string(),
            messages: vec![Message::text(Role::User, "check the weather")],
            ..Default::default()
        };

        let mut with_tools = bare.clone();
        with_tools.messages.push(Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(Vec::new()),
            tool_calls: Some(vec![ToolCall {
                id: "call_1".to_string(),
                name: "get_weather".to_string(),
                arguments: ToolArguments::Structured(json!({"location": "Paris", "units": "celsius"})),
            }]),
            tool_call_id: None,
            id: None,
        });

        assert!(estimate_request_tokens(&with_tools) > estimate_request_tokens(&bare));
    }
}
