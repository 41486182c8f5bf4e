//! OpenAI chat-completions dialect.
//!
//! Streaming is the interesting part: OpenAI has no block lifecycle, only a
//! bare delta per chunk. The adapter invents the lifecycle: it assigns a
//! content index to the text channel, one per streamed tool call, and closes
//! every open index when a `finish_reason` arrives.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::adapter::{DialectAdapter, StreamCursor};
use crate::adapters::{metadata_with_extras, origin_is, restore_extras};
use crate::error::{Result, TransLLMError};
use crate::ir::{self, CHOICES_EXTRA_KEY, ORIGIN_KEY, Provider, RAW_EVENT_KEY};

/// Metadata key remembering that the source spelled the token ceiling as
/// `max_completion_tokens`.
const MAX_TOKENS_FIELD_KEY: &str = "openai_max_tokens_field";
/// Metadata key remembering that `stop` was a bare string, not a list.
const STOP_SHAPE_KEY: &str = "openai_stop_is_string";
/// Metadata key remembering an explicit `"stream": false`.
const STREAM_EXPLICIT_KEY: &str = "openai_stream_explicit";
/// Metadata key carrying a finish reason the IR cannot express.
const FINISH_REASON_RAW_KEY: &str = "finish_reason_raw";
/// Metadata key for usage snapshots travelling inside stream events.
const USAGE_KEY: &str = "usage";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Anything the struct does not model, preserved through the metadata
    /// channel.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `stop` accepts a single sequence or a list.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum StopSequences {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ChatMessage {
    pub role: ChatRole,
    /// Always serialised: OpenAI emits `"content": null` alongside tool
    /// calls, and omitting the key would not survive a round-trip.
    pub content: Option<RequestContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ChatRole {
    System,
    Developer,
    User,
    Assistant,
    Tool,
    #[serde(untagged)]
    Other(String),
}

/// Message content: plain string or multimodal part list.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum RequestContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlPart },
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ImageUrlPart {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Tool {
    pub r#type: ToolType,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ToolType {
    Function,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ToolFunction {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum ToolChoice {
    Mode(ToolChoiceMode),
    Specific {
        r#type: ToolType,
        function: FunctionName,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ToolChoiceMode {
    None,
    Auto,
    Required,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FunctionName {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ToolCall {
    pub id: String,
    pub r#type: ToolType,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FunctionCall {
    pub name: String,
    /// Raw JSON string, exactly as transmitted.
    pub arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    #[serde(untagged)]
    Other(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PromptTokensDetails {
    pub cached_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CompletionTokensDetails {
    pub reasoning_tokens: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct ChatCompletionChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    pub delta: MessageDelta,
    /// Always serialised: real chunks carry `"finish_reason": null` until
    /// the closing one.
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct MessageDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallChunk>>,
}

/// Streamed tool-call fragment. The first fragment for a tool index carries
/// `id`, `type` and the function name; later fragments carry argument bytes.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct ToolCallChunk {
    #[serde(default)]
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<ToolType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionChunk>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct FunctionChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Chat-completions translator.
#[derive(Debug, Default)]
pub struct OpenAiAdapter {
    cursor: StreamCursor,
    inbound: InboundStream,
    outbound: OutboundStream,
}

/// Session state for wire → IR stream translation.
#[derive(Debug, Default)]
struct InboundStream {
    started: bool,
    text_index: Option<u32>,
    reasoning_index: Option<u32>,
    /// `delta.tool_calls[*].index` → IR content index.
    tool_indices: HashMap<u32, u32>,
    open: BTreeSet<u32>,
    next_index: u32,
}

/// Session state for IR → wire stream translation.
#[derive(Debug, Default)]
struct OutboundStream {
    id: Option<String>,
    model: Option<String>,
    created: Option<u64>,
    /// IR content index → `delta.tool_calls[*].index`.
    tool_indices: HashMap<u32, u32>,
    next_tool_index: u32,
    pending_usage: Option<Value>,
}

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DialectAdapter for OpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn to_unified_request(&self, doc: &Value) -> Result<ir::CoreRequest> {
        let request: ChatCompletionRequest = serde_json::from_value(doc.clone())?;
        request_to_ir(request)
    }

    fn from_unified_request(&self, request: &ir::CoreRequest) -> Result<Value> {
        request_from_ir(request)
    }

    fn to_unified_response(&self, doc: &Value) -> Result<ir::CoreResponse> {
        let response: ChatCompletionResponse = serde_json::from_value(doc.clone())?;
        response_to_ir(response, doc)
    }

    fn from_unified_response(&self, response: &ir::CoreResponse) -> Result<Value> {
        response_from_ir(response)
    }

    fn to_unified_stream_event(&mut self, doc: &Value) -> Result<Vec<ir::StreamEvent>> {
        // Anything without a choices list is not a chat-completion chunk;
        // carry it opaquely instead of guessing.
        if doc.get("choices").is_none() && doc.get("usage").is_none() {
            let mut metadata = Map::new();
            metadata.insert(ORIGIN_KEY.to_string(), json!(Provider::OpenAi.as_str()));
            metadata.insert(RAW_EVENT_KEY.to_string(), doc.clone());
            return Ok(vec![self.cursor.stamp(ir::StreamPayload::MetadataUpdate { metadata })]);
        }

        let chunk: ChatCompletionChunk = serde_json::from_value(doc.clone())?;
        let payloads = self.inbound.process(chunk);
        Ok(self.cursor.stamp_all(payloads))
    }

    fn from_unified_stream_event(&mut self, event: &ir::StreamEvent) -> Result<Vec<Value>> {
        self.outbound.process(event)
    }

    fn reset_stream_state(&mut self) {
        self.cursor.reset();
        self.inbound = InboundStream::default();
        self.outbound = OutboundStream::default();
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

fn request_to_ir(request: ChatCompletionRequest) -> Result<ir::CoreRequest> {
    let mut metadata = metadata_with_extras(Provider::OpenAi, request.extra);

    let max_tokens = match (request.max_completion_tokens, request.max_tokens) {
        // Newer name wins when both are present.
        (Some(newer), _) => {
            metadata.insert(MAX_TOKENS_FIELD_KEY.to_string(), json!(true));
            Some(newer)
        }
        (None, older) => older,
    };

    let stop = match request.stop {
        None => None,
        Some(StopSequences::One(sequence)) => {
            metadata.insert(STOP_SHAPE_KEY.to_string(), json!(true));
            Some(vec![sequence])
        }
        Some(StopSequences::Many(sequences)) => Some(sequences),
    };

    if request.stream == Some(false) {
        metadata.insert(STREAM_EXPLICIT_KEY.to_string(), json!(false));
    }

    let mut system_parts = Vec::new();
    let mut messages = Vec::new();

    for message in request.messages {
        match message.role {
            ChatRole::System | ChatRole::Developer => {
                if let Some(content) = message.content {
                    system_parts.push(request_content_text(content));
                }
            }
            _ => messages.push(message_to_ir(message)?),
        }
    }

    let system_instruction = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };

    Ok(ir::CoreRequest {
        model: request.model,
        messages,
        system_instruction,
        tools: request.tools.map(|tools| tools.into_iter().map(tool_to_ir).collect()),
        tool_choice: request.tool_choice.map(tool_choice_to_ir),
        max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stop,
        stream: request.stream.unwrap_or(false),
        metadata,
    })
}

fn request_content_text(content: RequestContent) -> String {
    match content {
        RequestContent::Text(text) => text,
        RequestContent::Parts(parts) => parts
            .into_iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text),
                ContentPart::ImageUrl { .. } => None,
            })
            .collect(),
    }
}

fn message_to_ir(message: ChatMessage) -> Result<ir::Message> {
    let role = match &message.role {
        ChatRole::User => ir::Role::User,
        ChatRole::Assistant => ir::Role::Assistant,
        ChatRole::Tool => ir::Role::Tool,
        ChatRole::System | ChatRole::Developer => ir::Role::System,
        ChatRole::Other(name) => {
            log::warn!("unknown chat role '{name}', treating as user");
            ir::Role::User
        }
    };

    if role == ir::Role::Tool && message.tool_call_id.is_none() {
        return Err(TransLLMError::conversion(
            Provider::OpenAi,
            None,
            "tool message without tool_call_id",
        ));
    }

    let mut content = match message.content {
        None => ir::MessageContent::Blocks(Vec::new()),
        Some(RequestContent::Text(text)) => ir::MessageContent::Text(text),
        Some(RequestContent::Parts(parts)) => {
            ir::MessageContent::Blocks(parts.into_iter().map(part_to_block).collect())
        }
    };

    if let Some(reasoning) = message.reasoning_content {
        let mut blocks = vec![ir::ContentBlock::Reasoning { text: reasoning }];
        match content {
            ir::MessageContent::Text(text) => blocks.push(ir::ContentBlock::Text { text }),
            ir::MessageContent::Blocks(rest) => blocks.extend(rest),
        }
        content = ir::MessageContent::Blocks(blocks);
    }

    let tool_calls = message.tool_calls.map(|calls| {
        calls
            .into_iter()
            .map(|call| ir::ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: ir::ToolArguments::Text(call.function.arguments),
            })
            .collect()
    });

    Ok(ir::Message {
        role,
        content,
        tool_calls,
        tool_call_id: message.tool_call_id,
        id: None,
    })
}

fn part_to_block(part: ContentPart) -> ir::ContentBlock {
    match part {
        ContentPart::Text { text } => ir::ContentBlock::Text { text },
        ContentPart::ImageUrl { image_url } => ir::ContentBlock::ImageUrl {
            url: image_url.url,
            detail: image_url.detail,
        },
    }
}

fn tool_to_ir(tool: Tool) -> ir::ToolDefinition {
    ir::ToolDefinition {
        name: tool.function.name,
        description: tool.function.description,
        parameters: tool.function.parameters.unwrap_or(Value::Null),
    }
}

fn tool_choice_to_ir(choice: ToolChoice) -> ir::ToolChoice {
    match choice {
        ToolChoice::Mode(ToolChoiceMode::None) => ir::ToolChoice::None,
        ToolChoice::Mode(ToolChoiceMode::Auto) => ir::ToolChoice::Auto,
        ToolChoice::Mode(ToolChoiceMode::Required) => ir::ToolChoice::Required,
        ToolChoice::Specific { function, .. } => ir::ToolChoice::Tool { name: function.name },
    }
}

fn request_from_ir(request: &ir::CoreRequest) -> Result<Value> {
    let same_dialect = origin_is(&request.metadata, Provider::OpenAi);

    let mut messages = Vec::new();
    if let Some(system) = &request.system_instruction {
        messages.push(ChatMessage {
            role: ChatRole::System,
            content: Some(RequestContent::Text(system.clone())),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
        });
    }
    for message in &request.messages {
        messages.extend(message_from_ir(message)?);
    }

    let spelled_newer = same_dialect && request.metadata.contains_key(MAX_TOKENS_FIELD_KEY);
    let (max_tokens, max_completion_tokens) = if spelled_newer {
        (None, request.max_tokens)
    } else {
        (request.max_tokens, None)
    };

    let stop = request.stop.as_ref().map(|sequences| {
        let scalar = same_dialect && request.metadata.contains_key(STOP_SHAPE_KEY);
        match sequences.as_slice() {
            [only] if scalar => StopSequences::One(only.clone()),
            _ => StopSequences::Many(sequences.clone()),
        }
    });

    let stream = if request.stream {
        Some(true)
    } else if same_dialect && request.metadata.contains_key(STREAM_EXPLICIT_KEY) {
        Some(false)
    } else {
        None
    };

    let wire = ChatCompletionRequest {
        model: request.model.clone(),
        messages,
        max_tokens,
        max_completion_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stop,
        stream,
        tools: request
            .tools
            .as_ref()
            .map(|tools| tools.iter().map(tool_from_ir).collect()),
        tool_choice: request.tool_choice.as_ref().map(tool_choice_from_ir),
        extra: restore_extras(Provider::OpenAi, &request.metadata),
    };

    Ok(serde_json::to_value(wire)?)
}

fn tool_from_ir(tool: &ir::ToolDefinition) -> Tool {
    Tool {
        r#type: ToolType::Function,
        function: ToolFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: match &tool.parameters {
                Value::Null => None,
                other => Some(other.clone()),
            },
            strict: None,
        },
    }
}

fn tool_choice_from_ir(choice: &ir::ToolChoice) -> ToolChoice {
    match choice {
        ir::ToolChoice::None => ToolChoice::Mode(ToolChoiceMode::None),
        ir::ToolChoice::Auto => ToolChoice::Mode(ToolChoiceMode::Auto),
        ir::ToolChoice::Required => ToolChoice::Mode(ToolChoiceMode::Required),
        ir::ToolChoice::Tool { name } => ToolChoice::Specific {
            r#type: ToolType::Function,
            function: FunctionName { name: name.clone() },
        },
    }
}

/// Renders one IR message as one or more wire messages. Splitting happens
/// when tool results are inlined as blocks (Anthropic and Gemini style):
/// each becomes its own `role: tool` message, in block order.
fn message_from_ir(message: &ir::Message) -> Result<Vec<ChatMessage>> {
    match message.role {
        ir::Role::System => Ok(vec![ChatMessage {
            role: ChatRole::System,
            content: Some(RequestContent::Text(message.content.visible_text())),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
        }]),
        ir::Role::Tool => tool_messages_from_ir(message),
        ir::Role::User => user_messages_from_ir(message),
        ir::Role::Assistant => Ok(vec![assistant_message_from_ir(message)?]),
    }
}

fn tool_messages_from_ir(message: &ir::Message) -> Result<Vec<ChatMessage>> {
    match &message.content {
        ir::MessageContent::Text(text) => {
            let tool_call_id = message.tool_call_id.clone().ok_or_else(|| {
                TransLLMError::conversion(None, Provider::OpenAi, "tool message without tool_call_id")
            })?;
            Ok(vec![ChatMessage {
                role: ChatRole::Tool,
                content: Some(RequestContent::Text(text.clone())),
                reasoning_content: None,
                tool_calls: None,
                tool_call_id: Some(tool_call_id),
            }])
        }
        ir::MessageContent::Blocks(blocks) => {
            let mut messages = Vec::new();
            for block in blocks {
                match block {
                    ir::ContentBlock::ToolResult { tool_use_id, content, .. } => {
                        messages.push(ChatMessage {
                            role: ChatRole::Tool,
                            content: Some(RequestContent::Text(stringify_result(content))),
                            reasoning_content: None,
                            tool_calls: None,
                            tool_call_id: Some(tool_use_id.clone()),
                        });
                    }
                    ir::ContentBlock::Text { text } => {
                        let tool_call_id = message.tool_call_id.clone().ok_or_else(|| {
                            TransLLMError::conversion(None, Provider::OpenAi, "tool message without tool_call_id")
                        })?;
                        messages.push(ChatMessage {
                            role: ChatRole::Tool,
                            content: Some(RequestContent::Text(text.clone())),
                            reasoning_content: None,
                            tool_calls: None,
                            tool_call_id: Some(tool_call_id),
                        });
                    }
                    other => {
                        return Err(TransLLMError::conversion(
                            None,
                            Provider::OpenAi,
                            format!("unsupported block in tool message: {}", block_name(other)),
                        ));
                    }
                }
            }
            Ok(messages)
        }
    }
}

fn user_messages_from_ir(message: &ir::Message) -> Result<Vec<ChatMessage>> {
    let blocks = match &message.content {
        ir::MessageContent::Text(text) => {
            return Ok(vec![ChatMessage {
                role: ChatRole::User,
                content: Some(RequestContent::Text(text.clone())),
                reasoning_content: None,
                tool_calls: None,
                tool_call_id: None,
            }]);
        }
        ir::MessageContent::Blocks(blocks) => blocks,
    };

    let mut messages = Vec::new();
    let mut parts: Vec<ContentPart> = Vec::new();

    let flush = |parts: &mut Vec<ContentPart>, messages: &mut Vec<ChatMessage>| {
        if parts.is_empty() {
            return;
        }
        messages.push(ChatMessage {
            role: ChatRole::User,
            content: Some(RequestContent::Parts(std::mem::take(parts))),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
        });
    };

    for block in blocks {
        match block {
            ir::ContentBlock::Text { text } => parts.push(ContentPart::Text { text: text.clone() }),
            ir::ContentBlock::ImageUrl { url, detail } => parts.push(ContentPart::ImageUrl {
                image_url: ImageUrlPart {
                    url: url.clone(),
                    detail: detail.clone(),
                },
            }),
            ir::ContentBlock::ToolResult { tool_use_id, content, .. } => {
                flush(&mut parts, &mut messages);
                messages.push(ChatMessage {
                    role: ChatRole::Tool,
                    content: Some(RequestContent::Text(stringify_result(content))),
                    reasoning_content: None,
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                });
            }
            other => {
                return Err(TransLLMError::conversion(
                    None,
                    Provider::OpenAi,
                    format!("unsupported block in user message: {}", block_name(other)),
                ));
            }
        }
    }
    flush(&mut parts, &mut messages);

    if messages.is_empty() {
        messages.push(ChatMessage {
            role: ChatRole::User,
            content: Some(RequestContent::Parts(Vec::new())),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
        });
    }

    Ok(messages)
}

fn assistant_message_from_ir(message: &ir::Message) -> Result<ChatMessage> {
    let mut parts: Vec<ContentPart> = Vec::new();
    let mut reasoning_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut plain_text: Option<String> = None;

    match &message.content {
        ir::MessageContent::Text(text) => plain_text = Some(text.clone()),
        ir::MessageContent::Blocks(blocks) => {
            for block in blocks {
                match block {
                    ir::ContentBlock::Text { text } => parts.push(ContentPart::Text { text: text.clone() }),
                    ir::ContentBlock::Reasoning { text } => reasoning_parts.push(text),
                    ir::ContentBlock::Thinking { thinking, .. } => reasoning_parts.push(thinking),
                    ir::ContentBlock::ToolUse { id, name, arguments } => tool_calls.push(ToolCall {
                        id: id.clone(),
                        r#type: ToolType::Function,
                        function: FunctionCall {
                            name: name.clone(),
                            arguments: arguments.to_json_string(),
                        },
                    }),
                    ir::ContentBlock::ImageUrl { .. } => {
                        return Err(TransLLMError::unsupported_feature("image_input", Provider::OpenAi));
                    }
                    ir::ContentBlock::RedactedThinking { .. } => {
                        return Err(TransLLMError::unsupported_feature(
                            "redacted_thinking",
                            Provider::OpenAi,
                        ));
                    }
                    ir::ContentBlock::ToolResult { .. } => {
                        return Err(TransLLMError::conversion(
                            None,
                            Provider::OpenAi,
                            "tool result in assistant message",
                        ));
                    }
                }
            }
        }
    }

    // OpenAI-native tool calls live on the message, not in the blocks; merge
    // without duplicating ids already collected from ToolUse blocks.
    if let Some(native) = &message.tool_calls {
        for call in native {
            if tool_calls.iter().any(|existing| existing.id == call.id) {
                continue;
            }
            tool_calls.push(ToolCall {
                id: call.id.clone(),
                r#type: ToolType::Function,
                function: FunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.to_json_string(),
                },
            });
        }
    }

    let reasoning_content = if reasoning_parts.is_empty() {
        None
    } else {
        Some(reasoning_parts.concat())
    };

    let content = if let Some(text) = plain_text {
        Some(RequestContent::Text(text))
    } else if parts.is_empty() {
        None
    } else if reasoning_content.is_some() && parts.len() == 1 {
        // The reasoning block forced the container into block form; a single
        // remaining text part started life as a plain string.
        match parts.remove(0) {
            ContentPart::Text { text } => Some(RequestContent::Text(text)),
            part => Some(RequestContent::Parts(vec![part])),
        }
    } else {
        Some(RequestContent::Parts(parts))
    };

    Ok(ChatMessage {
        role: ChatRole::Assistant,
        content,
        reasoning_content,
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        tool_call_id: None,
    })
}

fn stringify_result(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn block_name(block: &ir::ContentBlock) -> &'static str {
    match block {
        ir::ContentBlock::Text { .. } => "text",
        ir::ContentBlock::ImageUrl { .. } => "image_url",
        ir::ContentBlock::ToolUse { .. } => "tool_use",
        ir::ContentBlock::ToolResult { .. } => "tool_result",
        ir::ContentBlock::Reasoning { .. } => "reasoning",
        ir::ContentBlock::Thinking { .. } => "thinking",
        ir::ContentBlock::RedactedThinking { .. } => "redacted_thinking",
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

fn response_to_ir(response: ChatCompletionResponse, doc: &Value) -> Result<ir::CoreResponse> {
    let mut metadata = metadata_with_extras(Provider::OpenAi, response.extra);

    let mut choices = response.choices.into_iter();
    let first = choices.next().ok_or_else(|| {
        TransLLMError::conversion(Provider::OpenAi, None, "response has no choices")
    })?;

    // Additional choices survive only a same-dialect round-trip; keep them
    // verbatim from the source document.
    if let Some(Value::Array(raw_choices)) = doc.get("choices")
        && raw_choices.len() > 1
    {
        metadata.insert(
            CHOICES_EXTRA_KEY.to_string(),
            Value::Array(raw_choices[1..].to_vec()),
        );
    }

    let mut content = Vec::new();
    if let Some(reasoning) = first.message.reasoning_content {
        content.push(ir::ContentBlock::Reasoning { text: reasoning });
    }
    match first.message.content {
        Some(RequestContent::Text(text)) if !text.is_empty() => {
            content.push(ir::ContentBlock::Text { text });
        }
        Some(RequestContent::Parts(parts)) => {
            content.extend(parts.into_iter().map(part_to_block));
        }
        _ => {}
    }
    for call in first.message.tool_calls.unwrap_or_default() {
        content.push(ir::ContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            arguments: ir::ToolArguments::Text(call.function.arguments),
        });
    }

    let finish_reason = first.finish_reason.map(|reason| {
        if let FinishReason::Other(raw) = &reason {
            log::warn!("unknown finish reason from OpenAI: {raw}");
            metadata.insert(FINISH_REASON_RAW_KEY.to_string(), json!(raw));
        }
        finish_reason_to_ir(&reason)
    });

    Ok(ir::CoreResponse {
        id: response.id,
        model: response.model,
        created_at: response.created,
        content,
        finish_reason,
        usage: response.usage.map(usage_to_ir).unwrap_or_default(),
        metadata,
    })
}

fn finish_reason_to_ir(reason: &FinishReason) -> ir::FinishReason {
    match reason {
        FinishReason::Stop => ir::FinishReason::Stop,
        FinishReason::Length => ir::FinishReason::Length,
        FinishReason::ToolCalls => ir::FinishReason::ToolUse,
        FinishReason::ContentFilter => ir::FinishReason::ContentFilter,
        FinishReason::Other(_) => ir::FinishReason::Stop,
    }
}

fn finish_reason_from_ir(reason: ir::FinishReason) -> FinishReason {
    match reason {
        ir::FinishReason::Stop => FinishReason::Stop,
        ir::FinishReason::Length => FinishReason::Length,
        ir::FinishReason::ToolUse => FinishReason::ToolCalls,
        ir::FinishReason::ContentFilter => FinishReason::ContentFilter,
        ir::FinishReason::Error => FinishReason::Stop,
    }
}

fn usage_to_ir(usage: Usage) -> ir::Usage {
    ir::Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        cache_read_tokens: usage.prompt_tokens_details.map(|details| details.cached_tokens),
        cache_write_tokens: None,
        reasoning_tokens: usage.completion_tokens_details.map(|details| details.reasoning_tokens),
        total_tokens: Some(usage.total_tokens),
    }
}

fn usage_from_ir(usage: &ir::Usage) -> Usage {
    Usage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.total(),
        prompt_tokens_details: usage
            .cache_read_tokens
            .map(|cached_tokens| PromptTokensDetails { cached_tokens }),
        completion_tokens_details: usage
            .reasoning_tokens
            .map(|reasoning_tokens| CompletionTokensDetails { reasoning_tokens }),
    }
}

fn response_from_ir(response: &ir::CoreResponse) -> Result<Value> {
    let same_dialect = origin_is(&response.metadata, Provider::OpenAi);

    let mut text_parts: Vec<&str> = Vec::new();
    let mut reasoning_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in &response.content {
        match block {
            ir::ContentBlock::Text { text } => text_parts.push(text),
            ir::ContentBlock::Reasoning { text } => reasoning_parts.push(text),
            ir::ContentBlock::Thinking { thinking, .. } => reasoning_parts.push(thinking),
            ir::ContentBlock::ToolUse { id, name, arguments } => tool_calls.push(ToolCall {
                id: id.clone(),
                r#type: ToolType::Function,
                function: FunctionCall {
                    name: name.clone(),
                    arguments: arguments.to_json_string(),
                },
            }),
            ir::ContentBlock::RedactedThinking { .. } => {
                return Err(TransLLMError::unsupported_feature(
                    "redacted_thinking",
                    Provider::OpenAi,
                ));
            }
            other => {
                log::warn!("dropping {} block from OpenAI response", block_name(other));
            }
        }
    }

    let finish_reason = match response.metadata.get(FINISH_REASON_RAW_KEY) {
        Some(Value::String(raw)) if same_dialect => Some(FinishReason::Other(raw.clone())),
        _ => response.finish_reason.map(finish_reason_from_ir),
    };

    let message = ChatMessage {
        role: ChatRole::Assistant,
        content: if text_parts.is_empty() {
            None
        } else {
            Some(RequestContent::Text(text_parts.concat()))
        },
        reasoning_content: if reasoning_parts.is_empty() {
            None
        } else {
            Some(reasoning_parts.concat())
        },
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        tool_call_id: None,
    };

    let wire = ChatCompletionResponse {
        id: response.id.clone(),
        object: "chat.completion".to_string(),
        created: response.created_at,
        model: response.model.clone(),
        choices: vec![ChatChoice {
            index: 0,
            message,
            finish_reason,
        }],
        usage: Some(usage_from_ir(&response.usage)),
        extra: restore_extras(Provider::OpenAi, &response.metadata),
    };

    let mut value = serde_json::to_value(wire)?;
    if same_dialect
        && let Some(Value::Array(extra_choices)) = response.metadata.get(CHOICES_EXTRA_KEY)
        && let Some(Value::Array(choices)) = value.get_mut("choices")
    {
        choices.extend(extra_choices.iter().cloned());
    }

    Ok(value)
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

impl InboundStream {
    fn process(&mut self, chunk: ChatCompletionChunk) -> Vec<ir::StreamPayload> {
        let mut payloads = Vec::new();

        if !self.started {
            self.started = true;
            let mut metadata = Map::new();
            if !chunk.id.is_empty() {
                metadata.insert("id".to_string(), json!(chunk.id));
            }
            if !chunk.model.is_empty() {
                metadata.insert("model".to_string(), json!(chunk.model));
            }
            if chunk.created != 0 {
                metadata.insert("created".to_string(), json!(chunk.created));
            }
            if let Some(role) = chunk.choices.first().and_then(|choice| choice.delta.role.as_ref()) {
                metadata.insert("role".to_string(), json!(role));
            }
            payloads.push(ir::StreamPayload::MetadataUpdate { metadata });
        }

        let Some(choice) = chunk.choices.first() else {
            // Usage-only chunk at the tail of a stream_options stream.
            if let Some(usage) = chunk.usage {
                let mut metadata = Map::new();
                metadata.insert(USAGE_KEY.to_string(), usage_snapshot(&usage_to_ir(usage)));
                payloads.push(ir::StreamPayload::MetadataUpdate { metadata });
            }
            return payloads;
        };

        if let Some(reasoning) = &choice.delta.reasoning_content {
            let index = match self.reasoning_index {
                Some(index) => index,
                None => {
                    let index = self.allocate();
                    self.reasoning_index = Some(index);
                    payloads.push(ir::StreamPayload::ContentStart {
                        index,
                        kind: ir::ContentKind::Thinking,
                    });
                    index
                }
            };
            payloads.push(ir::StreamPayload::ContentDelta {
                index,
                kind: ir::DeltaKind::Thinking,
                text: reasoning.clone(),
            });
        }

        if let Some(content) = &choice.delta.content {
            let index = match self.text_index {
                Some(index) => index,
                None => {
                    let index = self.allocate();
                    self.text_index = Some(index);
                    payloads.push(ir::StreamPayload::ContentStart {
                        index,
                        kind: ir::ContentKind::Text,
                    });
                    index
                }
            };
            payloads.push(ir::StreamPayload::ContentDelta {
                index,
                kind: ir::DeltaKind::Text,
                text: content.clone(),
            });
        }

        if let Some(tool_calls) = &choice.delta.tool_calls {
            for call in tool_calls {
                let delta = ir::ToolCallDelta {
                    id: call.id.clone(),
                    name: call.function.as_ref().and_then(|function| function.name.clone()),
                    arguments_delta: call
                        .function
                        .as_ref()
                        .and_then(|function| function.arguments.clone()),
                };
                match self.tool_indices.get(&call.index) {
                    Some(&index) => payloads.push(ir::StreamPayload::ToolCallDelta { index, delta }),
                    None => {
                        let index = self.allocate();
                        self.tool_indices.insert(call.index, index);
                        payloads.push(ir::StreamPayload::ContentStart {
                            index,
                            kind: ir::ContentKind::ToolUse,
                        });
                        payloads.push(ir::StreamPayload::ToolCallDelta { index, delta });
                    }
                }
            }
        }

        if let Some(reason) = &choice.finish_reason {
            for index in std::mem::take(&mut self.open) {
                payloads.push(ir::StreamPayload::ContentFinish { index });
            }

            let mut metadata = Map::new();
            if let Some(usage) = chunk.usage {
                metadata.insert(USAGE_KEY.to_string(), usage_snapshot(&usage_to_ir(usage)));
            }
            if let FinishReason::Other(raw) = reason {
                metadata.insert(FINISH_REASON_RAW_KEY.to_string(), json!(raw));
            }
            payloads.push(ir::StreamPayload::StreamEnd {
                finish_reason: Some(finish_reason_to_ir(reason)),
                metadata,
            });
        }

        payloads
    }

    fn allocate(&mut self) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        self.open.insert(index);
        index
    }
}

fn usage_snapshot(usage: &ir::Usage) -> Value {
    serde_json::to_value(usage).unwrap_or(Value::Null)
}

fn usage_from_snapshot(value: &Value) -> Option<ir::Usage> {
    serde_json::from_value(value.clone()).ok()
}

impl OutboundStream {
    fn process(&mut self, event: &ir::StreamEvent) -> Result<Vec<Value>> {
        let values = match &event.payload {
            ir::StreamPayload::MetadataUpdate { metadata } => {
                if let Some(raw) = metadata.get(RAW_EVENT_KEY) {
                    // Opaque foreign events are restored only on their own
                    // dialect; everything else drops them.
                    return if origin_is(metadata, Provider::OpenAi) {
                        Ok(vec![raw.clone()])
                    } else {
                        Ok(Vec::new())
                    };
                }

                if let Some(Value::String(id)) = metadata.get("id") {
                    self.id = Some(id.clone());
                }
                if let Some(Value::String(model)) = metadata.get("model") {
                    self.model = Some(model.clone());
                }
                if let Some(created) = metadata.get("created").and_then(Value::as_u64) {
                    self.created = Some(created);
                }
                if let Some(usage) = metadata.get(USAGE_KEY) {
                    self.pending_usage = Some(usage.clone());
                }

                if metadata.get("role").is_some() {
                    vec![self.chunk(
                        MessageDelta {
                            role: Some(ChatRole::Assistant),
                            ..Default::default()
                        },
                        None,
                        None,
                    )?]
                } else {
                    Vec::new()
                }
            }

            // OpenAI has no block lifecycle on the wire.
            ir::StreamPayload::ContentStart { .. } | ir::StreamPayload::ContentFinish { .. } => Vec::new(),

            ir::StreamPayload::ContentDelta { kind, text, .. } => match kind {
                ir::DeltaKind::Text => vec![self.chunk(
                    MessageDelta {
                        content: Some(text.clone()),
                        ..Default::default()
                    },
                    None,
                    None,
                )?],
                ir::DeltaKind::Thinking => vec![self.chunk(
                    MessageDelta {
                        reasoning_content: Some(text.clone()),
                        ..Default::default()
                    },
                    None,
                    None,
                )?],
                // Thinking signatures have no chat-completions counterpart.
                ir::DeltaKind::Signature => Vec::new(),
            },

            ir::StreamPayload::ToolCallDelta { index, delta } => {
                let (wire_index, first) = self.wire_tool_index(*index);
                let fragment = if first {
                    ToolCallChunk {
                        index: wire_index,
                        id: Some(
                            delta
                                .id
                                .clone()
                                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4())),
                        ),
                        r#type: Some(ToolType::Function),
                        function: Some(FunctionChunk {
                            name: Some(delta.name.clone().unwrap_or_default()),
                            arguments: Some(delta.arguments_delta.clone().unwrap_or_default()),
                        }),
                    }
                } else {
                    ToolCallChunk {
                        index: wire_index,
                        id: None,
                        r#type: None,
                        function: Some(FunctionChunk {
                            name: None,
                            arguments: Some(delta.arguments_delta.clone().unwrap_or_default()),
                        }),
                    }
                };
                vec![self.chunk(
                    MessageDelta {
                        tool_calls: Some(vec![fragment]),
                        ..Default::default()
                    },
                    None,
                    None,
                )?]
            }

            ir::StreamPayload::ToolCall { index, tool_call } => {
                let (wire_index, _) = self.wire_tool_index(*index);
                let fragment = ToolCallChunk {
                    index: wire_index,
                    id: Some(tool_call.id.clone()),
                    r#type: Some(ToolType::Function),
                    function: Some(FunctionChunk {
                        name: Some(tool_call.name.clone()),
                        arguments: Some(tool_call.arguments.to_json_string()),
                    }),
                };
                vec![self.chunk(
                    MessageDelta {
                        tool_calls: Some(vec![fragment]),
                        ..Default::default()
                    },
                    None,
                    None,
                )?]
            }

            ir::StreamPayload::StreamEnd { finish_reason, metadata } => {
                let usage = metadata
                    .get(USAGE_KEY)
                    .cloned()
                    .or_else(|| self.pending_usage.take())
                    .as_ref()
                    .and_then(usage_from_snapshot)
                    .as_ref()
                    .map(usage_from_ir);
                let finish = match metadata.get(FINISH_REASON_RAW_KEY) {
                    Some(Value::String(raw)) => Some(FinishReason::Other(raw.clone())),
                    _ => finish_reason.map(finish_reason_from_ir),
                };
                vec![self.chunk(MessageDelta::default(), finish, usage)?]
            }

            ir::StreamPayload::Error { kind, message } => {
                vec![json!({"error": {"type": kind, "message": message}})]
            }
        };

        Ok(values)
    }

    fn wire_tool_index(&mut self, content_index: u32) -> (u32, bool) {
        match self.tool_indices.get(&content_index) {
            Some(&wire_index) => (wire_index, false),
            None => {
                let wire_index = self.next_tool_index;
                self.next_tool_index += 1;
                self.tool_indices.insert(content_index, wire_index);
                (wire_index, true)
            }
        }
    }

    fn chunk(
        &mut self,
        delta: MessageDelta,
        finish_reason: Option<FinishReason>,
        usage: Option<Usage>,
    ) -> Result<Value> {
        let created = *self.created.get_or_insert_with(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        });

        let chunk = ChatCompletionChunk {
            id: self.id.clone().unwrap_or_default(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: self.model.clone().unwrap_or_default(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        };

        Ok(serde_json::to_value(chunk)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::DialectAdapter;
    use crate::compare::{diff, structural_eq};
    use crate::ir::StreamEventType;

    fn stream_chunks() -> Vec<Value> {
        vec![
            json!({
                "id": "chatcmpl-1",
                "object": "chat.completion.chunk",
                "created": 1736000000u64,
                "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}, "finish_reason": null}]
            }),
            json!({"choices": [{"index": 0, "delta": {"content": "Hello"}, "finish_reason": null}]}),
            json!({"choices": [{"index": 0, "delta": {"content": " world"}, "finish_reason": null}]}),
            json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}),
        ]
    }

    #[test]
    fn request_round_trips_structurally() {
        let adapter = OpenAiAdapter::new();
        let doc = json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "hi"}
            ],
            "max_tokens": 256,
            "temperature": 0.7,
            "top_p": 0.9,
            "stop": ["END"],
            "stream": true,
            "seed": 7
        });

        let unified = adapter.to_unified_request(&doc).unwrap();
        assert_eq!(unified.system_instruction.as_deref(), Some("Be brief."));
        assert_eq!(unified.messages.len(), 1);
        assert!(unified.stream);

        let back = adapter.from_unified_request(&unified).unwrap();
        assert!(structural_eq(&doc, &back), "diverged:\n{}", diff(&doc, &back).join("\n"));
    }

    #[test]
    fn newer_token_limit_name_wins_and_survives() {
        let adapter = OpenAiAdapter::new();
        let doc = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "max_completion_tokens": 512
        });

        let unified = adapter.to_unified_request(&doc).unwrap();
        assert_eq!(unified.max_tokens, Some(512));

        let back = adapter.from_unified_request(&unified).unwrap();
        assert_eq!(back["max_completion_tokens"], 512);
        assert!(back.get("max_tokens").is_none());

        let both = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 100,
            "max_completion_tokens": 512
        });
        assert_eq!(adapter.to_unified_request(&both).unwrap().max_tokens, Some(512));
    }

    #[test]
    fn multimodal_request_round_trips() {
        let adapter = OpenAiAdapter::new();
        let doc = json!({
            "model": "gpt-4o",
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "What is in this image?"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,aGk=", "detail": "high"}}
                ]
            }]
        });

        let unified = adapter.to_unified_request(&doc).unwrap();
        let ir::MessageContent::Blocks(blocks) = &unified.messages[0].content else {
            unreachable!("part arrays map to block content");
        };
        assert!(matches!(
            &blocks[1],
            ir::ContentBlock::ImageUrl { detail: Some(detail), .. } if detail == "high"
        ));

        let back = adapter.from_unified_request(&unified).unwrap();
        assert!(structural_eq(&doc, &back), "diverged:\n{}", diff(&doc, &back).join("\n"));
    }

    #[test]
    fn tool_flow_round_trips() {
        let adapter = OpenAiAdapter::new();
        let doc = json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "Weather in Paris?"},
                {"role": "assistant", "content": null, "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "get_weather", "arguments": "{\"location\": \"Paris\"}"}
                }]},
                {"role": "tool", "content": "Sunny", "tool_call_id": "call_1"}
            ],
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
            "tool_choice": {"type": "function", "function": {"name": "get_weather"}}
        });

        let unified = adapter.to_unified_request(&doc).unwrap();
        assert_eq!(
            unified.tool_choice,
            Some(ir::ToolChoice::Tool { name: "get_weather".to_string() })
        );

        let back = adapter.from_unified_request(&unified).unwrap();
        assert!(structural_eq(&doc, &back), "diverged:\n{}", diff(&doc, &back).join("\n"));
    }

    #[test]
    fn tool_message_without_id_is_a_conversion_error() {
        let adapter = OpenAiAdapter::new();
        let doc = json!({
            "model": "gpt-4o",
            "messages": [{"role": "tool", "content": "orphan result"}]
        });

        let err = adapter.to_unified_request(&doc).unwrap_err();
        assert!(matches!(err, TransLLMError::Conversion { .. }), "got {err:?}");
    }

    #[test]
    fn response_round_trips_with_tool_calls_and_usage_details() {
        let adapter = OpenAiAdapter::new();
        let doc = json!({
            "id": "chatcmpl-9",
            "object": "chat.completion",
            "created": 1736000000u64,
            "model": "gpt-4o",
            "system_fingerprint": "fp_abc",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Checking the weather.",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"location\": \"Paris\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {
                "prompt_tokens": 20,
                "completion_tokens": 12,
                "total_tokens": 32,
                "prompt_tokens_details": {"cached_tokens": 8},
                "completion_tokens_details": {"reasoning_tokens": 4}
            }
        });

        let unified = adapter.to_unified_response(&doc).unwrap();
        assert_eq!(unified.finish_reason, Some(ir::FinishReason::ToolUse));
        assert_eq!(unified.usage.cache_read_tokens, Some(8));
        assert_eq!(unified.usage.reasoning_tokens, Some(4));
        assert_eq!(unified.content.len(), 2);

        let back = adapter.from_unified_response(&unified).unwrap();
        assert!(structural_eq(&doc, &back), "diverged:\n{}", diff(&doc, &back).join("\n"));
    }

    #[test]
    fn extra_choices_survive_a_same_dialect_trip() {
        let adapter = OpenAiAdapter::new();
        let doc = json!({
            "id": "chatcmpl-9",
            "object": "chat.completion",
            "created": 1736000000u64,
            "model": "gpt-4o",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "First."}, "finish_reason": "stop"},
                {"index": 1, "message": {"role": "assistant", "content": "Second."}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 5, "completion_tokens": 4, "total_tokens": 9}
        });

        let unified = adapter.to_unified_response(&doc).unwrap();
        assert!(unified.metadata.contains_key(CHOICES_EXTRA_KEY));

        let back = adapter.from_unified_response(&unified).unwrap();
        assert!(structural_eq(&doc, &back), "diverged:\n{}", diff(&doc, &back).join("\n"));
    }

    #[test]
    fn stream_invents_the_block_lifecycle() {
        let mut adapter = OpenAiAdapter::new();
        let mut events = Vec::new();
        for chunk in stream_chunks() {
            events.extend(adapter.to_unified_stream_event(&chunk).unwrap());
        }

        let types: Vec<StreamEventType> = events.iter().map(|event| event.event_type()).collect();
        assert_eq!(
            types,
            vec![
                StreamEventType::MetadataUpdate,
                StreamEventType::ContentStart,
                StreamEventType::ContentDelta,
                StreamEventType::ContentDelta,
                StreamEventType::ContentDelta,
                StreamEventType::ContentFinish,
                StreamEventType::StreamEnd,
            ]
        );

        // P4: sequence ids are 0, 1, 2, … and timestamps never regress.
        for (position, event) in events.iter().enumerate() {
            assert_eq!(event.sequence_id, position as u64);
        }
        for pair in events.windows(2) {
            assert!(pair[1].timestamp >= pair[0].timestamp);
        }

        // P5: the delta index was started before and finished after.
        let started: Vec<u32> = events.iter().filter(|e| e.event_type() == StreamEventType::ContentStart).filter_map(|e| e.content_index()).collect();
        let finished: Vec<u32> = events.iter().filter(|e| e.event_type() == StreamEventType::ContentFinish).filter_map(|e| e.content_index()).collect();
        assert_eq!(started, finished);
    }

    #[test]
    fn streamed_tool_calls_get_one_index_each() {
        let mut adapter = OpenAiAdapter::new();
        let chunks = vec![
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [{
                "index": 0,
                "id": "call_1",
                "type": "function",
                "function": {"name": "get_weather", "arguments": ""}
            }]}, "finish_reason": null}]}),
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [{
                "index": 0,
                "function": {"arguments": "{\"location\""}
            }]}, "finish_reason": null}]}),
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [{
                "index": 0,
                "function": {"arguments": ": \"Paris\"}"}
            }]}, "finish_reason": null}]}),
            json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]}),
        ];

        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(adapter.to_unified_stream_event(&chunk).unwrap());
        }

        let mut starts = 0;
        let mut arguments = String::new();
        let mut first_delta_named = false;
        for event in &events {
            match &event.payload {
                ir::StreamPayload::ContentStart { kind, .. } => {
                    assert_eq!(*kind, ir::ContentKind::ToolUse);
                    starts += 1;
                }
                ir::StreamPayload::ToolCallDelta { delta, .. } => {
                    if !first_delta_named {
                        assert_eq!(delta.id.as_deref(), Some("call_1"));
                        assert_eq!(delta.name.as_deref(), Some("get_weather"));
                        first_delta_named = true;
                    }
                    if let Some(fragment) = &delta.arguments_delta {
                        arguments.push_str(fragment);
                    }
                }
                _ => {}
            }
        }

        assert_eq!(starts, 1);
        // P6: fragments concatenate to the final arguments string.
        assert_eq!(arguments, "{\"location\": \"Paris\"}");

        let ir::StreamPayload::StreamEnd { finish_reason, .. } = &events.last().unwrap().payload else {
            unreachable!("finish_reason chunk must end the stream");
        };
        assert_eq!(*finish_reason, Some(ir::FinishReason::ToolUse));
    }

    #[test]
    fn per_chunk_round_trip_preserves_delta_fields() {
        // Content chunk: the emitted chunks must reproduce delta.content.
        let mut adapter = OpenAiAdapter::new();
        let chunk = json!({"choices": [{"index": 0, "delta": {"content": "Hello"}, "finish_reason": null}]});
        let events = adapter.to_unified_stream_event(&chunk).unwrap();

        let mut restored = Vec::new();
        for event in &events {
            restored.extend(adapter.from_unified_stream_event(event).unwrap());
        }
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0]["choices"][0]["delta"]["content"], "Hello");

        // Finish chunk on a fresh adapter.
        let mut adapter = OpenAiAdapter::new();
        let chunk = json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]});
        let events = adapter.to_unified_stream_event(&chunk).unwrap();

        let mut restored = Vec::new();
        for event in &events {
            restored.extend(adapter.from_unified_stream_event(event).unwrap());
        }
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0]["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn usage_only_chunk_becomes_metadata() {
        let mut adapter = OpenAiAdapter::new();
        let chunk = json!({
            "id": "chatcmpl-1",
            "choices": [],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13}
        });

        let events = adapter.to_unified_stream_event(&chunk).unwrap();
        let usage_updates: Vec<_> = events
            .iter()
            .filter(|event| {
                matches!(
                    &event.payload,
                    ir::StreamPayload::MetadataUpdate { metadata } if metadata.contains_key("usage")
                )
            })
            .collect();
        assert_eq!(usage_updates.len(), 1);
    }

    #[test]
    fn image_block_in_assistant_message_is_unsupported() {
        let adapter = OpenAiAdapter::new();
        let request = ir::CoreRequest {
            model: "gpt-4o".to_string(),
            messages: vec![ir::Message::blocks(
                ir::Role::Assistant,
                vec![ir::ContentBlock::ImageUrl {
                    url: "https://example.com/cat.png".to_string(),
                    detail: None,
                }],
            )],
            ..Default::default()
        };

        let err = adapter.from_unified_request(&request).unwrap_err();
        let TransLLMError::UnsupportedFeature { feature, provider } = err else {
            unreachable!("expected UnsupportedFeature, got {err:?}");
        };
        assert_eq!(feature, "image_input");
        assert_eq!(provider, Provider::OpenAi);
    }

    #[test]
    fn reasoning_content_round_trips() {
        let adapter = OpenAiAdapter::new();
        let doc = json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "Hello!", "reasoning_content": "Short greeting suffices."}
            ]
        });

        let unified = adapter.to_unified_request(&doc).unwrap();
        let ir::MessageContent::Blocks(blocks) = &unified.messages[1].content else {
            unreachable!("reasoning forces block content");
        };
        assert!(matches!(&blocks[0], ir::ContentBlock::Reasoning { .. }));

        let back = adapter.from_unified_request(&unified).unwrap();
        assert!(structural_eq(&doc, &back), "diverged:\n{}", diff(&doc, &back).join("\n"));
    }
}
