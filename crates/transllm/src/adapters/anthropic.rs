//! Anthropic messages dialect.
//!
//! The wire protocol is already block-indexed (`content_block_start` /
//! `content_block_delta` / `content_block_stop`), so inbound mapping is
//! near-direct. The work is on the way out: when re-emitting events produced
//! by another dialect, the adapter synthesises `message_start` and
//! `content_block_start` events the source never sent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::adapter::{DialectAdapter, StreamCursor};
use crate::adapters::{metadata_with_extras, origin_is, restore_extras};
use crate::error::{Result, TransLLMError};
use crate::ir::{self, ORIGIN_KEY, Provider, RAW_EVENT_KEY};

/// Wire requirement: `max_tokens` is mandatory, so requests arriving from
/// dialects that leave it unset get this ceiling.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Metadata key preserving an array-form `system` prompt verbatim.
const SYSTEM_RAW_KEY: &str = "anthropic_system_raw";
/// Metadata key preserving `tool_choice.disable_parallel_tool_use`.
const DISABLE_PARALLEL_KEY: &str = "anthropic_disable_parallel_tool_use";
/// Metadata key preserving a stop reason the IR cannot express.
const STOP_REASON_RAW_KEY: &str = "stop_reason_raw";
/// Metadata key preserving the matched stop sequence.
const STOP_SEQUENCE_KEY: &str = "stop_sequence";
const USAGE_KEY: &str = "usage";
const EVENT_KEY: &str = "event";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MessagesRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<WireToolChoice>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `system` accepts a bare string or a list of text blocks.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum SystemBlock {
    Text { text: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireMessage {
    pub role: WireRole,
    pub content: WireContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum WireRole {
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    Thinking {
        thinking: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    RedactedThinking {
        data: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum WireToolChoice {
    Auto {
        #[serde(skip_serializing_if = "Option::is_none")]
        disable_parallel_tool_use: Option<bool>,
    },
    Any {
        #[serde(skip_serializing_if = "Option::is_none")]
        disable_parallel_tool_use: Option<bool>,
    },
    Tool {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        disable_parallel_tool_use: Option<bool>,
    },
    None {},
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MessagesResponse {
    pub id: String,
    pub r#type: String,
    pub role: WireRole,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
    pub usage: WireUsage,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    PauseTurn,
    Refusal,
    #[serde(untagged)]
    Other(String),
}

impl StopReason {
    fn parse(raw: &str) -> Self {
        match raw {
            "end_turn" => StopReason::EndTurn,
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            "tool_use" => StopReason::ToolUse,
            "pause_turn" => StopReason::PauseTurn,
            "refusal" => StopReason::Refusal,
            other => StopReason::Other(other.to_string()),
        }
    }

    fn as_str(&self) -> &str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::MaxTokens => "max_tokens",
            StopReason::StopSequence => "stop_sequence",
            StopReason::ToolUse => "tool_use",
            StopReason::PauseTurn => "pause_turn",
            StopReason::Refusal => "refusal",
            StopReason::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub(crate) struct WireUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u32>,
}

/// SSE event surface of the streaming Messages API.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum WireStreamEvent {
    MessageStart {
        message: MessageStartBody,
    },
    ContentBlockStart {
        index: u32,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<WireUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorBody,
    },
    /// Anything the vocabulary does not cover yet; carried opaquely.
    #[serde(untagged)]
    Unknown(Value),
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MessageStartBody {
    pub id: String,
    #[serde(default = "message_type")]
    pub r#type: String,
    pub role: WireRole,
    #[serde(default)]
    pub content: Vec<Value>,
    pub model: String,
    #[serde(default)]
    pub usage: WireUsage,
}

fn message_type() -> String {
    "message".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct MessageDeltaBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Messages translator.
#[derive(Debug, Default)]
pub struct AnthropicAdapter {
    cursor: StreamCursor,
    inbound: InboundStream,
    outbound: OutboundStream,
}

#[derive(Debug, Default)]
struct InboundStream {
    /// Finish reason announced by `message_delta`, surfaced on `message_stop`.
    pending_finish: Option<ir::FinishReason>,
    open: std::collections::BTreeSet<u32>,
}

#[derive(Debug, Default)]
struct OutboundStream {
    started: bool,
    message_delta_sent: bool,
    id: Option<String>,
    model: Option<String>,
    /// Open blocks by index; the value says whether `content_block_start`
    /// has been emitted (tool blocks wait for the delta naming them).
    blocks: BTreeMap<u32, bool>,
    usage: Option<WireUsage>,
}

fn kind_for_delta(kind: ir::DeltaKind) -> ir::ContentKind {
    match kind {
        ir::DeltaKind::Text => ir::ContentKind::Text,
        ir::DeltaKind::Thinking | ir::DeltaKind::Signature => ir::ContentKind::Thinking,
    }
}

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DialectAdapter for AnthropicAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn to_unified_request(&self, doc: &Value) -> Result<ir::CoreRequest> {
        let request: MessagesRequest = serde_json::from_value(doc.clone())?;
        request_to_ir(request)
    }

    fn from_unified_request(&self, request: &ir::CoreRequest) -> Result<Value> {
        request_from_ir(request)
    }

    fn to_unified_response(&self, doc: &Value) -> Result<ir::CoreResponse> {
        let response: MessagesResponse = serde_json::from_value(doc.clone())?;
        response_to_ir(response)
    }

    fn from_unified_response(&self, response: &ir::CoreResponse) -> Result<Value> {
        response_from_ir(response)
    }

    fn to_unified_stream_event(&mut self, doc: &Value) -> Result<Vec<ir::StreamEvent>> {
        let event: WireStreamEvent = serde_json::from_value(doc.clone())?;
        let payloads = self.inbound.process(event, doc);
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

fn request_to_ir(request: MessagesRequest) -> Result<ir::CoreRequest> {
    let mut metadata = metadata_with_extras(Provider::Anthropic, request.extra);

    let system_instruction = match request.system {
        None => None,
        Some(SystemPrompt::Text(text)) => Some(text),
        Some(SystemPrompt::Blocks(blocks)) => {
            // Joining loses the block boundaries, so keep the original shape
            // for the same-dialect trip back.
            metadata.insert(SYSTEM_RAW_KEY.to_string(), serde_json::to_value(&blocks)?);
            Some(
                blocks
                    .iter()
                    .map(|SystemBlock::Text { text }| text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        }
    };

    let tool_choice = request.tool_choice.map(|choice| {
        let (choice, disable_parallel) = match choice {
            WireToolChoice::Auto { disable_parallel_tool_use } => {
                (ir::ToolChoice::Auto, disable_parallel_tool_use)
            }
            WireToolChoice::Any { disable_parallel_tool_use } => {
                (ir::ToolChoice::Required, disable_parallel_tool_use)
            }
            WireToolChoice::Tool { name, disable_parallel_tool_use } => {
                (ir::ToolChoice::Tool { name }, disable_parallel_tool_use)
            }
            WireToolChoice::None {} => (ir::ToolChoice::None, None),
        };
        if let Some(flag) = disable_parallel {
            metadata.insert(DISABLE_PARALLEL_KEY.to_string(), json!(flag));
        }
        choice
    });

    let messages = request
        .messages
        .into_iter()
        .map(message_to_ir)
        .collect::<Result<Vec<_>>>()?;

    Ok(ir::CoreRequest {
        model: request.model,
        messages,
        system_instruction,
        tools: request.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| ir::ToolDefinition {
                    name: tool.name,
                    description: tool.description,
                    parameters: tool.input_schema,
                })
                .collect()
        }),
        tool_choice,
        max_tokens: Some(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences,
        stream: request.stream.unwrap_or(false),
        metadata,
    })
}

fn message_to_ir(message: WireMessage) -> Result<ir::Message> {
    let role = match message.role {
        WireRole::User => ir::Role::User,
        WireRole::Assistant => ir::Role::Assistant,
    };

    let content = match message.content {
        WireContent::Text(text) => ir::MessageContent::Text(text),
        WireContent::Blocks(blocks) => {
            ir::MessageContent::Blocks(blocks.into_iter().map(block_to_ir).collect())
        }
    };

    Ok(ir::Message {
        role,
        content,
        tool_calls: None,
        tool_call_id: None,
        id: None,
    })
}

fn block_to_ir(block: ContentBlock) -> ir::ContentBlock {
    match block {
        ContentBlock::Text { text } => ir::ContentBlock::Text { text },
        ContentBlock::Image { source } => match source {
            ImageSource::Base64 { media_type, data } => ir::ContentBlock::ImageUrl {
                url: format!("data:{media_type};base64,{data}"),
                detail: None,
            },
            ImageSource::Url { url } => ir::ContentBlock::ImageUrl { url, detail: None },
        },
        ContentBlock::ToolUse { id, name, input } => ir::ContentBlock::ToolUse {
            id,
            name,
            arguments: ir::ToolArguments::Structured(input),
        },
        ContentBlock::ToolResult { tool_use_id, content, is_error } => ir::ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        },
        ContentBlock::Thinking { thinking, signature } => ir::ContentBlock::Thinking { thinking, signature },
        ContentBlock::RedactedThinking { data } => ir::ContentBlock::RedactedThinking { data },
    }
}

fn request_from_ir(request: &ir::CoreRequest) -> Result<Value> {
    let same_dialect = origin_is(&request.metadata, Provider::Anthropic);

    let system = match &request.system_instruction {
        None => None,
        Some(text) => {
            if same_dialect && let Some(raw) = request.metadata.get(SYSTEM_RAW_KEY) {
                Some(SystemPrompt::Blocks(serde_json::from_value(raw.clone())?))
            } else {
                Some(SystemPrompt::Text(text.clone()))
            }
        }
    };

    let disable_parallel = if same_dialect {
        request.metadata.get(DISABLE_PARALLEL_KEY).and_then(Value::as_bool)
    } else {
        None
    };

    let tool_choice = request.tool_choice.as_ref().map(|choice| match choice {
        ir::ToolChoice::Auto => WireToolChoice::Auto {
            disable_parallel_tool_use: disable_parallel,
        },
        ir::ToolChoice::Required => WireToolChoice::Any {
            disable_parallel_tool_use: disable_parallel,
        },
        ir::ToolChoice::Tool { name } => WireToolChoice::Tool {
            name: name.clone(),
            disable_parallel_tool_use: disable_parallel,
        },
        ir::ToolChoice::None => WireToolChoice::None {},
    });

    let mut messages = Vec::new();
    for message in &request.messages {
        messages.push(message_from_ir(message)?);
    }

    let wire = MessagesRequest {
        model: request.model.clone(),
        messages,
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system,
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop.clone(),
        stream: if request.stream { Some(true) } else { None },
        tools: request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|tool| WireTool {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: match &tool.parameters {
                        Value::Null => json!({"type": "object"}),
                        other => other.clone(),
                    },
                })
                .collect()
        }),
        tool_choice,
        extra: restore_extras(Provider::Anthropic, &request.metadata),
    };

    Ok(serde_json::to_value(wire)?)
}

fn message_from_ir(message: &ir::Message) -> Result<WireMessage> {
    // Tool results ride inside user messages on this wire; system prompts
    // never appear in the list.
    let role = match message.role {
        ir::Role::Assistant => WireRole::Assistant,
        ir::Role::User | ir::Role::Tool | ir::Role::System => WireRole::User,
    };

    if message.role == ir::Role::Tool {
        let tool_use_id = message.tool_call_id.clone().ok_or_else(|| {
            TransLLMError::conversion(None, Provider::Anthropic, "tool message without tool_call_id")
        })?;
        let content = match &message.content {
            ir::MessageContent::Text(text) => vec![ContentBlock::ToolResult {
                tool_use_id,
                content: Value::String(text.clone()),
                is_error: None,
            }],
            ir::MessageContent::Blocks(blocks) => blocks
                .iter()
                .map(block_from_ir)
                .collect::<Result<Vec<_>>>()?,
        };
        return Ok(WireMessage {
            role,
            content: WireContent::Blocks(content),
        });
    }

    // Content always goes out in block form, the canonical shape for this
    // wire. Bare strings are accepted on the way in and normalised here.
    let mut blocks = match &message.content {
        ir::MessageContent::Text(text) if text.is_empty() => Vec::new(),
        ir::MessageContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
        ir::MessageContent::Blocks(blocks) => blocks
            .iter()
            .map(block_from_ir)
            .collect::<Result<Vec<_>>>()?,
    };

    // OpenAI-native tool calls become tool_use blocks.
    if let Some(calls) = &message.tool_calls {
        for call in calls {
            let duplicate = blocks.iter().any(|block| {
                matches!(block, ContentBlock::ToolUse { id, .. } if *id == call.id)
            });
            if duplicate {
                continue;
            }
            blocks.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.arguments.to_value(),
            });
        }
    }

    Ok(WireMessage {
        role,
        content: WireContent::Blocks(blocks),
    })
}

fn block_from_ir(block: &ir::ContentBlock) -> Result<ContentBlock> {
    Ok(match block {
        ir::ContentBlock::Text { text } => ContentBlock::Text { text: text.clone() },
        ir::ContentBlock::ImageUrl { url, detail } => {
            if detail.is_some() {
                log::debug!("dropping image detail hint; no Anthropic counterpart");
            }
            ContentBlock::Image {
                source: image_source_from_url(url),
            }
        }
        ir::ContentBlock::ToolUse { id, name, arguments } => ContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: arguments.to_value(),
        },
        ir::ContentBlock::ToolResult { tool_use_id, content, is_error } => ContentBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content.clone(),
            is_error: *is_error,
        },
        ir::ContentBlock::Reasoning { text } => ContentBlock::Thinking {
            thinking: text.clone(),
            signature: None,
        },
        ir::ContentBlock::Thinking { thinking, signature } => ContentBlock::Thinking {
            thinking: thinking.clone(),
            signature: signature.clone(),
        },
        ir::ContentBlock::RedactedThinking { data } => {
            ContentBlock::RedactedThinking { data: data.clone() }
        }
    })
}

/// `data:` URIs unpack into base64 sources; anything else stays a URL.
fn image_source_from_url(url: &str) -> ImageSource {
    if let Some(rest) = url.strip_prefix("data:")
        && let Some((media_type, data)) = rest.split_once(";base64,")
    {
        return ImageSource::Base64 {
            media_type: media_type.to_string(),
            data: data.to_string(),
        };
    }
    ImageSource::Url { url: url.to_string() }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

fn response_to_ir(response: MessagesResponse) -> Result<ir::CoreResponse> {
    let mut metadata = metadata_with_extras(Provider::Anthropic, response.extra);

    if let Some(sequence) = &response.stop_sequence {
        metadata.insert(STOP_SEQUENCE_KEY.to_string(), json!(sequence));
    }

    let finish_reason = response.stop_reason.map(|reason| {
        let unified = stop_reason_to_ir(&reason);
        // end_turn and stop_sequence both collapse to Stop; remember the
        // exact reason so the same dialect can restore it.
        if ir_to_stop_reason(unified) != reason {
            metadata.insert(STOP_REASON_RAW_KEY.to_string(), json!(reason.as_str()));
        }
        unified
    });

    Ok(ir::CoreResponse {
        id: response.id,
        model: response.model,
        created_at: 0,
        content: response.content.into_iter().map(block_to_ir).collect(),
        finish_reason,
        usage: usage_to_ir(response.usage),
        metadata,
    })
}

fn response_from_ir(response: &ir::CoreResponse) -> Result<Value> {
    let same_dialect = origin_is(&response.metadata, Provider::Anthropic);

    let mut content = Vec::new();
    for block in &response.content {
        match block {
            ir::ContentBlock::ToolResult { .. } => {
                log::warn!("dropping tool_result block from response content");
            }
            other => content.push(block_from_ir(other)?),
        }
    }

    let stop_reason = match response.metadata.get(STOP_REASON_RAW_KEY) {
        Some(Value::String(raw)) if same_dialect => Some(StopReason::parse(raw)),
        _ => response.finish_reason.map(ir_to_stop_reason),
    };

    let stop_sequence = if same_dialect {
        response
            .metadata
            .get(STOP_SEQUENCE_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
    } else {
        None
    };

    let wire = MessagesResponse {
        id: response.id.clone(),
        r#type: "message".to_string(),
        role: WireRole::Assistant,
        content,
        model: response.model.clone(),
        stop_reason,
        stop_sequence,
        usage: usage_from_ir(&response.usage),
        extra: restore_extras(Provider::Anthropic, &response.metadata),
    };

    Ok(serde_json::to_value(wire)?)
}

fn stop_reason_to_ir(reason: &StopReason) -> ir::FinishReason {
    match reason {
        StopReason::EndTurn | StopReason::StopSequence | StopReason::PauseTurn => ir::FinishReason::Stop,
        StopReason::MaxTokens => ir::FinishReason::Length,
        StopReason::ToolUse => ir::FinishReason::ToolUse,
        StopReason::Refusal => ir::FinishReason::ContentFilter,
        StopReason::Other(raw) => {
            log::warn!("unknown stop reason from Anthropic: {raw}");
            ir::FinishReason::Stop
        }
    }
}

fn ir_to_stop_reason(reason: ir::FinishReason) -> StopReason {
    match reason {
        ir::FinishReason::Stop | ir::FinishReason::Error => StopReason::EndTurn,
        ir::FinishReason::Length => StopReason::MaxTokens,
        ir::FinishReason::ToolUse => StopReason::ToolUse,
        ir::FinishReason::ContentFilter => StopReason::Refusal,
    }
}

fn usage_to_ir(usage: WireUsage) -> ir::Usage {
    ir::Usage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cache_read_tokens: usage.cache_read_input_tokens,
        cache_write_tokens: usage.cache_creation_input_tokens,
        reasoning_tokens: None,
        total_tokens: None,
    }
}

fn usage_from_ir(usage: &ir::Usage) -> WireUsage {
    WireUsage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cache_creation_input_tokens: usage.cache_write_tokens,
        cache_read_input_tokens: usage.cache_read_tokens,
    }
}

fn usage_snapshot(usage: &WireUsage) -> Value {
    serde_json::to_value(usage_to_ir(*usage)).unwrap_or(Value::Null)
}

fn usage_from_snapshot(value: &Value) -> Option<WireUsage> {
    serde_json::from_value::<ir::Usage>(value.clone())
        .ok()
        .map(|usage| usage_from_ir(&usage))
}

// ---------------------------------------------------------------------------
// Streaming: wire → IR
// ---------------------------------------------------------------------------

impl InboundStream {
    fn process(&mut self, event: WireStreamEvent, raw: &Value) -> Vec<ir::StreamPayload> {
        match event {
            WireStreamEvent::MessageStart { message } => {
                let mut metadata = Map::new();
                metadata.insert(EVENT_KEY.to_string(), json!("message_start"));
                metadata.insert("id".to_string(), json!(message.id));
                metadata.insert("model".to_string(), json!(message.model));
                metadata.insert("role".to_string(), json!(message.role));
                metadata.insert(USAGE_KEY.to_string(), usage_snapshot(&message.usage));
                vec![ir::StreamPayload::MetadataUpdate { metadata }]
            }

            WireStreamEvent::ContentBlockStart { index, content_block } => {
                self.open.insert(index);
                match content_block {
                    ContentBlock::Text { text } => {
                        let mut payloads = vec![ir::StreamPayload::ContentStart {
                            index,
                            kind: ir::ContentKind::Text,
                        }];
                        if !text.is_empty() {
                            payloads.push(ir::StreamPayload::ContentDelta {
                                index,
                                kind: ir::DeltaKind::Text,
                                text,
                            });
                        }
                        payloads
                    }
                    ContentBlock::ToolUse { id, name, input } => {
                        let arguments_delta = match &input {
                            Value::Object(map) if map.is_empty() => None,
                            Value::Null => None,
                            other => Some(serde_json::to_string(other).unwrap_or_default()),
                        };
                        vec![
                            ir::StreamPayload::ContentStart {
                                index,
                                kind: ir::ContentKind::ToolUse,
                            },
                            ir::StreamPayload::ToolCallDelta {
                                index,
                                delta: ir::ToolCallDelta {
                                    id: Some(id),
                                    name: Some(name),
                                    arguments_delta,
                                },
                            },
                        ]
                    }
                    ContentBlock::Thinking { thinking, .. } => {
                        let mut payloads = vec![ir::StreamPayload::ContentStart {
                            index,
                            kind: ir::ContentKind::Thinking,
                        }];
                        if !thinking.is_empty() {
                            payloads.push(ir::StreamPayload::ContentDelta {
                                index,
                                kind: ir::DeltaKind::Thinking,
                                text: thinking,
                            });
                        }
                        payloads
                    }
                    ContentBlock::RedactedThinking { .. } => {
                        log::debug!("redacted thinking block opened; content is opaque");
                        vec![ir::StreamPayload::ContentStart {
                            index,
                            kind: ir::ContentKind::Thinking,
                        }]
                    }
                    other => {
                        log::warn!("unexpected streamed block start: {other:?}");
                        vec![ir::StreamPayload::ContentStart {
                            index,
                            kind: ir::ContentKind::Text,
                        }]
                    }
                }
            }

            WireStreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => vec![ir::StreamPayload::ContentDelta {
                    index,
                    kind: ir::DeltaKind::Text,
                    text,
                }],
                BlockDelta::InputJsonDelta { partial_json } => vec![ir::StreamPayload::ToolCallDelta {
                    index,
                    delta: ir::ToolCallDelta {
                        id: None,
                        name: None,
                        arguments_delta: Some(partial_json),
                    },
                }],
                BlockDelta::ThinkingDelta { thinking } => vec![ir::StreamPayload::ContentDelta {
                    index,
                    kind: ir::DeltaKind::Thinking,
                    text: thinking,
                }],
                BlockDelta::SignatureDelta { signature } => vec![ir::StreamPayload::ContentDelta {
                    index,
                    kind: ir::DeltaKind::Signature,
                    text: signature,
                }],
            },

            WireStreamEvent::ContentBlockStop { index } => {
                self.open.remove(&index);
                vec![ir::StreamPayload::ContentFinish { index }]
            }

            WireStreamEvent::MessageDelta { delta, usage } => {
                let mut metadata = Map::new();
                metadata.insert(EVENT_KEY.to_string(), json!("message_delta"));
                if let Some(reason) = &delta.stop_reason {
                    self.pending_finish = Some(stop_reason_to_ir(reason));
                    metadata.insert("stop_reason".to_string(), json!(reason.as_str()));
                }
                if let Some(sequence) = &delta.stop_sequence {
                    metadata.insert(STOP_SEQUENCE_KEY.to_string(), json!(sequence));
                }
                if let Some(usage) = usage {
                    metadata.insert(USAGE_KEY.to_string(), usage_snapshot(&usage));
                }
                vec![ir::StreamPayload::MetadataUpdate { metadata }]
            }

            WireStreamEvent::MessageStop => vec![ir::StreamPayload::StreamEnd {
                finish_reason: self.pending_finish.take(),
                metadata: Map::new(),
            }],

            WireStreamEvent::Ping => {
                let mut metadata = Map::new();
                metadata.insert(EVENT_KEY.to_string(), json!("ping"));
                vec![ir::StreamPayload::MetadataUpdate { metadata }]
            }

            WireStreamEvent::Error { error } => {
                // Close whatever is open so the consumer never sees a torn
                // tool call, then surface the failure and end the stream.
                let mut payloads: Vec<ir::StreamPayload> = std::mem::take(&mut self.open)
                    .into_iter()
                    .map(|index| ir::StreamPayload::ContentFinish { index })
                    .collect();
                payloads.push(ir::StreamPayload::Error {
                    kind: error.error_type,
                    message: error.message,
                });
                payloads.push(ir::StreamPayload::StreamEnd {
                    finish_reason: Some(ir::FinishReason::Error),
                    metadata: Map::new(),
                });
                payloads
            }

            WireStreamEvent::Unknown(_) => {
                let mut metadata = Map::new();
                metadata.insert(ORIGIN_KEY.to_string(), json!(Provider::Anthropic.as_str()));
                metadata.insert(RAW_EVENT_KEY.to_string(), raw.clone());
                vec![ir::StreamPayload::MetadataUpdate { metadata }]
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Streaming: IR → wire
// ---------------------------------------------------------------------------

impl OutboundStream {
    fn process(&mut self, event: &ir::StreamEvent) -> Result<Vec<Value>> {
        let mut out = Vec::new();

        match &event.payload {
            ir::StreamPayload::MetadataUpdate { metadata } => {
                if let Some(raw) = metadata.get(RAW_EVENT_KEY) {
                    if origin_is(metadata, Provider::Anthropic) {
                        out.push(raw.clone());
                    }
                    return Ok(out);
                }

                self.absorb(metadata);

                match metadata.get(EVENT_KEY).and_then(Value::as_str) {
                    Some("message_start") => {
                        if !self.started {
                            out.push(self.message_start()?);
                        }
                    }
                    Some("message_delta") => {
                        self.ensure_started(&mut out)?;
                        let delta = MessageDeltaBody {
                            stop_reason: metadata
                                .get("stop_reason")
                                .and_then(Value::as_str)
                                .map(StopReason::parse),
                            stop_sequence: metadata
                                .get(STOP_SEQUENCE_KEY)
                                .and_then(Value::as_str)
                                .map(str::to_string),
                        };
                        out.push(serde_json::to_value(WireStreamEvent::MessageDelta {
                            delta,
                            usage: Some(self.usage.unwrap_or_default()),
                        })?);
                        self.message_delta_sent = true;
                    }
                    Some("ping") => out.push(serde_json::to_value(WireStreamEvent::Ping)?),
                    _ => {
                        // Foreign metadata (an OpenAI role chunk, a Gemini
                        // model announcement): worth a message_start, nothing
                        // more.
                        if !self.started {
                            out.push(self.message_start()?);
                        }
                    }
                }
            }

            ir::StreamPayload::ContentStart { index, kind } => {
                self.ensure_started(&mut out)?;
                match kind {
                    // Tool blocks wait for the delta that names them.
                    ir::ContentKind::ToolUse => {
                        self.blocks.insert(*index, false);
                    }
                    ir::ContentKind::Text | ir::ContentKind::Thinking => {
                        self.blocks.insert(*index, true);
                        out.push(block_start_event(*index, *kind)?);
                    }
                }
            }

            ir::StreamPayload::ContentDelta { index, kind, text } => {
                self.ensure_started(&mut out)?;
                self.ensure_block(*index, kind_for_delta(*kind), &mut out)?;
                let delta = match kind {
                    ir::DeltaKind::Text => BlockDelta::TextDelta { text: text.clone() },
                    ir::DeltaKind::Thinking => BlockDelta::ThinkingDelta { thinking: text.clone() },
                    ir::DeltaKind::Signature => BlockDelta::SignatureDelta {
                        signature: text.clone(),
                    },
                };
                out.push(serde_json::to_value(WireStreamEvent::ContentBlockDelta {
                    index: *index,
                    delta,
                })?);
            }

            ir::StreamPayload::ToolCallDelta { index, delta } => {
                self.ensure_started(&mut out)?;
                let block_started = self.blocks.get(index).copied().unwrap_or(false);
                if !block_started {
                    let id = delta
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4()));
                    let name = delta.name.clone().unwrap_or_default();
                    self.blocks.insert(*index, true);
                    out.push(serde_json::to_value(WireStreamEvent::ContentBlockStart {
                        index: *index,
                        content_block: ContentBlock::ToolUse {
                            id,
                            name,
                            input: json!({}),
                        },
                    })?);
                }
                if let Some(arguments) = &delta.arguments_delta
                    && !arguments.is_empty()
                {
                    out.push(serde_json::to_value(WireStreamEvent::ContentBlockDelta {
                        index: *index,
                        delta: BlockDelta::InputJsonDelta {
                            partial_json: arguments.clone(),
                        },
                    })?);
                }
            }

            ir::StreamPayload::ToolCall { index, tool_call } => {
                self.ensure_started(&mut out)?;
                out.push(serde_json::to_value(WireStreamEvent::ContentBlockStart {
                    index: *index,
                    content_block: ContentBlock::ToolUse {
                        id: tool_call.id.clone(),
                        name: tool_call.name.clone(),
                        input: tool_call.arguments.to_value(),
                    },
                })?);
                out.push(serde_json::to_value(WireStreamEvent::ContentBlockStop {
                    index: *index,
                })?);
                self.blocks.remove(index);
            }

            ir::StreamPayload::ContentFinish { index } => {
                self.ensure_started(&mut out)?;
                // Some(false) is a tool block that never got a naming delta;
                // a stop without its start would desynchronise the client.
                if self.blocks.remove(index) != Some(false) {
                    out.push(serde_json::to_value(WireStreamEvent::ContentBlockStop {
                        index: *index,
                    })?);
                }
            }

            ir::StreamPayload::StreamEnd { finish_reason, metadata } => {
                self.ensure_started(&mut out)?;
                if let Some(usage) = metadata.get(USAGE_KEY).and_then(usage_from_snapshot) {
                    self.usage = Some(usage);
                }

                let still_open: Vec<u32> = self.blocks.keys().copied().collect();
                for index in still_open {
                    if self.blocks.remove(&index) == Some(true) {
                        out.push(serde_json::to_value(WireStreamEvent::ContentBlockStop {
                            index,
                        })?);
                    }
                }

                if !self.message_delta_sent
                    && let Some(reason) = finish_reason
                {
                    out.push(serde_json::to_value(WireStreamEvent::MessageDelta {
                        delta: MessageDeltaBody {
                            stop_reason: Some(ir_to_stop_reason(*reason)),
                            stop_sequence: None,
                        },
                        usage: Some(self.usage.unwrap_or_default()),
                    })?);
                    self.message_delta_sent = true;
                }

                out.push(serde_json::to_value(WireStreamEvent::MessageStop)?);
            }

            ir::StreamPayload::Error { kind, message } => {
                out.push(serde_json::to_value(WireStreamEvent::Error {
                    error: ErrorBody {
                        error_type: kind.clone(),
                        message: message.clone(),
                    },
                })?);
            }
        }

        Ok(out)
    }

    fn absorb(&mut self, metadata: &Map<String, Value>) {
        if let Some(Value::String(id)) = metadata.get("id") {
            self.id = Some(id.clone());
        }
        if let Some(Value::String(model)) = metadata.get("model") {
            self.model = Some(model.clone());
        }
        if let Some(usage) = metadata.get(USAGE_KEY).and_then(usage_from_snapshot) {
            self.usage = Some(usage);
        }
    }

    fn ensure_started(&mut self, out: &mut Vec<Value>) -> Result<()> {
        if !self.started {
            out.push(self.message_start()?);
        }
        Ok(())
    }

    fn message_start(&mut self) -> Result<Value> {
        self.started = true;
        let body = MessageStartBody {
            id: self
                .id
                .clone()
                .unwrap_or_else(|| format!("msg_{}", uuid::Uuid::new_v4().simple())),
            r#type: "message".to_string(),
            role: WireRole::Assistant,
            content: Vec::new(),
            model: self.model.clone().unwrap_or_default(),
            usage: self.usage.unwrap_or_default(),
        };
        Ok(serde_json::to_value(WireStreamEvent::MessageStart {
            message: body,
        })?)
    }

    fn ensure_block(&mut self, index: u32, kind: ir::ContentKind, out: &mut Vec<Value>) -> Result<()> {
        if self.blocks.get(&index).copied().unwrap_or(false) {
            return Ok(());
        }
        self.blocks.insert(index, true);
        out.push(block_start_event(index, kind)?);
        Ok(())
    }
}

fn block_start_event(index: u32, kind: ir::ContentKind) -> Result<Value> {
    let content_block = match kind {
        ir::ContentKind::Text => ContentBlock::Text { text: String::new() },
        ir::ContentKind::Thinking => ContentBlock::Thinking {
            thinking: String::new(),
            signature: None,
        },
        ir::ContentKind::ToolUse => ContentBlock::ToolUse {
            id: format!("toolu_{}", uuid::Uuid::new_v4()),
            name: String::new(),
            input: json!({}),
        },
    };
    Ok(serde_json::to_value(WireStreamEvent::ContentBlockStart {
        index,
        content_block,
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::DialectAdapter;
    use crate::compare::structural_eq;
    use crate::ir::StreamEventType;
    use serde_json::json;

    fn text_stream_events() -> Vec<Value> {
        vec![
            json!({
                "type": "message_start",
                "message": {
                    "id": "msg_stream_1",
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": "claude-sonnet-4-20250514",
                    "usage": {"input_tokens": 12, "output_tokens": 0}
                }
            }),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hello"}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": " world"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 2}}),
            json!({"type": "message_stop"}),
        ]
    }

    fn tool_stream_events() -> Vec<Value> {
        vec![
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
            json!({"type": "content_block_stop", "index": 1}),
        ]
    }

    #[test]
    fn request_round_trips_structurally() {
        let adapter = AnthropicAdapter::new();
        let doc = json!({
            "model": "claude-sonnet-4-20250514",
            "max_tokens": 1024,
            "system": "You are terse.",
            "temperature": 0.5,
            "top_k": 40,
            "stop_sequences": ["END"],
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "Hello, Claude!"}]},
                {"role": "assistant", "content": [{"type": "text", "text": "Hi."}]},
                {"role": "user", "content": [
                    {"type": "text", "text": "What is in this image?"},
                    {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "aGk="}}
                ]}
            ]
        });

        let unified = adapter.to_unified_request(&doc).unwrap();
        assert_eq!(unified.system_instruction.as_deref(), Some("You are terse."));
        assert_eq!(unified.max_tokens, Some(1024));
        assert_eq!(unified.messages.len(), 3);

        let back = adapter.from_unified_request(&unified).unwrap();
        assert!(
            structural_eq(&doc, &back),
            "round-trip diverged:\n{}",
            crate::compare::diff(&doc, &back).join("\n")
        );
    }

    #[test]
    fn tool_flow_round_trips() {
        let adapter = AnthropicAdapter::new();
        let doc = json!({
            "model": "claude-sonnet-4-20250514",
            "max_tokens": 2048,
            "tools": [{
                "name": "get_weather",
                "description": "Get the weather for a location",
                "input_schema": {
                    "type": "object",
                    "properties": {"location": {"type": "string"}},
                    "required": ["location"]
                }
            }],
            "tool_choice": {"type": "auto", "disable_parallel_tool_use": true},
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "Weather in Beijing?"}]},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "Checking."},
                    {"type": "tool_use", "id": "toolu_01", "name": "get_weather", "input": {"location": "Beijing"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_01", "content": "Sunny, 25C"}
                ]}
            ]
        });

        let unified = adapter.to_unified_request(&doc).unwrap();
        let back = adapter.from_unified_request(&unified).unwrap();
        assert!(
            structural_eq(&doc, &back),
            "round-trip diverged:\n{}",
            crate::compare::diff(&doc, &back).join("\n")
        );
    }

    #[test]
    fn response_round_trips_including_stop_sequence() {
        let adapter = AnthropicAdapter::new();
        let doc = json!({
            "id": "msg_42",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4-20250514",
            "content": [{"type": "text", "text": "Done."}],
            "stop_reason": "stop_sequence",
            "stop_sequence": "END",
            "usage": {"input_tokens": 9, "output_tokens": 3}
        });

        let unified = adapter.to_unified_response(&doc).unwrap();
        assert_eq!(unified.finish_reason, Some(ir::FinishReason::Stop));

        let back = adapter.from_unified_response(&unified).unwrap();
        assert!(
            structural_eq(&doc, &back),
            "round-trip diverged:\n{}",
            crate::compare::diff(&doc, &back).join("\n")
        );
    }

    #[test]
    fn text_stream_maps_to_unified_event_sequence() {
        let mut adapter = AnthropicAdapter::new();
        let mut events = Vec::new();
        for wire in text_stream_events() {
            events.extend(adapter.to_unified_stream_event(&wire).unwrap());
        }

        let types: Vec<StreamEventType> = events.iter().map(|event| event.event_type()).collect();
        assert_eq!(
            types,
            vec![
                StreamEventType::MetadataUpdate,
                StreamEventType::ContentStart,
                StreamEventType::ContentDelta,
                StreamEventType::ContentDelta,
                StreamEventType::ContentFinish,
                StreamEventType::MetadataUpdate,
                StreamEventType::StreamEnd,
            ]
        );

        let deltas: Vec<&str> = events
            .iter()
            .filter_map(|event| match &event.payload {
                ir::StreamPayload::ContentDelta { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, vec!["Hello", " world"]);

        let ir::StreamPayload::MetadataUpdate { metadata } = &events[0].payload else {
            unreachable!("message_start must map to metadata_update");
        };
        assert_eq!(metadata.get("event"), Some(&json!("message_start")));

        let ir::StreamPayload::StreamEnd { finish_reason, .. } = &events.last().unwrap().payload else {
            unreachable!("message_stop must map to stream_end");
        };
        assert_eq!(*finish_reason, Some(ir::FinishReason::Stop));

        // Sequence ids count up from zero; timestamps never move backwards.
        for (position, event) in events.iter().enumerate() {
            assert_eq!(event.sequence_id, position as u64);
            assert!(event.timestamp >= 0.0);
        }
        for pair in events.windows(2) {
            assert!(pair[1].timestamp >= pair[0].timestamp);
        }
    }

    #[test]
    fn tool_argument_deltas_concatenate_to_full_arguments() {
        let mut adapter = AnthropicAdapter::new();
        let mut arguments = String::new();
        let mut tool_delta_count = 0;

        for wire in tool_stream_events() {
            for event in adapter.to_unified_stream_event(&wire).unwrap() {
                if let ir::StreamPayload::ToolCallDelta { index, delta } = &event.payload {
                    assert_eq!(*index, 1);
                    if let Some(fragment) = &delta.arguments_delta {
                        arguments.push_str(fragment);
                        tool_delta_count += 1;
                    }
                }
            }
        }

        assert_eq!(tool_delta_count, 2);
        assert_eq!(arguments, "{\"location\": \"Beijing\"}");
    }

    #[test]
    fn thinking_stream_round_trips_delta_kinds() {
        let mut adapter = AnthropicAdapter::new();
        let start = json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": {"type": "thinking", "thinking": ""}
        });
        let delta = json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "thinking_delta", "thinking": "Let me check"}
        });
        let signature = json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "signature_delta", "signature": "c2ln"}
        });

        for wire in [&start, &delta, &signature] {
            for event in adapter.to_unified_stream_event(wire).unwrap() {
                let restored = adapter.from_unified_stream_event(&event).unwrap();
                let last = restored.last().unwrap();
                assert_eq!(last["type"], wire["type"]);
                if wire["type"] == "content_block_delta" {
                    assert_eq!(last["delta"], wire["delta"]);
                }
            }
        }
    }

    #[test]
    fn per_event_round_trip_preserves_type_and_payload() {
        for wire in text_stream_events() {
            let mut adapter = AnthropicAdapter::new();
            let events = adapter.to_unified_stream_event(&wire).unwrap();

            let mut restored = Vec::new();
            for event in &events {
                restored.extend(adapter.from_unified_stream_event(event).unwrap());
            }

            // Reverse synthesis may prepend message_start/content_block_start
            // events; the final wire event must match the source.
            let last = restored.last().unwrap();
            assert_eq!(last["type"], wire["type"], "for source event {wire}");
            if let Some(delta) = wire.get("delta")
                && wire["type"] == "content_block_delta"
            {
                assert_eq!(&last["delta"], delta);
                assert_eq!(last["index"], wire["index"]);
            }
        }
    }

    #[test]
    fn unknown_event_falls_back_to_metadata_and_restores_verbatim() {
        let mut adapter = AnthropicAdapter::new();
        let wire = json!({"type": "content_block_heartbeat", "index": 7, "detail": "??"});

        let events = adapter.to_unified_stream_event(&wire).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), StreamEventType::MetadataUpdate);

        let restored = adapter.from_unified_stream_event(&events[0]).unwrap();
        assert_eq!(restored, vec![wire]);
    }

    #[test]
    fn error_event_closes_open_blocks_before_stream_end() {
        let mut adapter = AnthropicAdapter::new();
        adapter
            .to_unified_stream_event(&json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": {"type": "text", "text": ""}
            }))
            .unwrap();

        let events = adapter
            .to_unified_stream_event(&json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "Busy"}
            }))
            .unwrap();

        let types: Vec<StreamEventType> = events.iter().map(|event| event.event_type()).collect();
        assert_eq!(
            types,
            vec![
                StreamEventType::ContentFinish,
                StreamEventType::Error,
                StreamEventType::StreamEnd,
            ]
        );
    }

    #[test]
    fn reset_restarts_sequence_ids() {
        let mut adapter = AnthropicAdapter::new();
        let wire = json!({"type": "ping"});

        let first = adapter.to_unified_stream_event(&wire).unwrap();
        let second = adapter.to_unified_stream_event(&wire).unwrap();
        assert_eq!(first[0].sequence_id, 0);
        assert_eq!(second[0].sequence_id, 1);

        adapter.reset_stream_state();
        let after_reset = adapter.to_unified_stream_event(&wire).unwrap();
        assert_eq!(after_reset[0].sequence_id, 0);
    }

    #[test]
    fn foreign_stream_synthesises_message_lifecycle() {
        // Events shaped like what the OpenAI adapter produces: bare metadata,
        // then content, then the end. The reverse side must invent
        // message_start and the block lifecycle.
        let mut adapter = AnthropicAdapter::new();
        let mut cursor = crate::adapter::StreamCursor::new();

        let events = vec![
            cursor.stamp(ir::StreamPayload::MetadataUpdate {
                metadata: Map::new(),
            }),
            cursor.stamp(ir::StreamPayload::ContentStart {
                index: 0,
                kind: ir::ContentKind::Text,
            }),
            cursor.stamp(ir::StreamPayload::ContentDelta {
                index: 0,
                kind: ir::DeltaKind::Text,
                text: "Hello".to_string(),
            }),
            cursor.stamp(ir::StreamPayload::ContentFinish { index: 0 }),
            cursor.stamp(ir::StreamPayload::StreamEnd {
                finish_reason: Some(ir::FinishReason::Stop),
                metadata: Map::new(),
            }),
        ];

        let mut wire = Vec::new();
        for event in &events {
            wire.extend(adapter.from_unified_stream_event(event).unwrap());
        }

        let types: Vec<&str> = wire.iter().filter_map(|event| event["type"].as_str()).collect();
        assert_eq!(
            types,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert_eq!(wire[4]["delta"]["stop_reason"], "end_turn");
    }
}
