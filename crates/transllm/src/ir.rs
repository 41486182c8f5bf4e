//! Brand-neutral intermediate representation for LLM traffic.
//!
//! Every supported dialect (OpenAI chat completions, Anthropic messages,
//! Gemini generateContent) converts into these types and back out of them.
//! The conversion flow follows this pattern:
//!
//! ```text
//! Source document → CoreRequest/CoreResponse/StreamEvent → target document
//! ```
//!
//! Two properties the types are designed around:
//!
//! - **Tagged variants over open maps**: content blocks and stream payloads
//!   are sum types, so "a delta carries exactly one payload" and "a block is
//!   exactly one kind" hold by construction rather than by runtime checks.
//! - **Opaque metadata channel**: requests, responses and stream events carry
//!   a `metadata` bag for dialect-specific fields with no neutral meaning.
//!   Same-dialect round-trips restore the bag; cross-dialect conversion drops
//!   whatever the target does not recognise through the alias tables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved metadata key holding top-level dialect parameters that have no
/// dedicated field on [`CoreRequest`], stored under their canonical names.
pub const EXTRA_PARAMS_KEY: &str = "extra_params";

/// Reserved metadata key naming the dialect a request or response was parsed
/// from. Used to decide whether opaque extras may be restored verbatim.
pub const ORIGIN_KEY: &str = "origin";

/// Reserved metadata key carrying an unrecognised stream event verbatim so the
/// same dialect can re-emit it unchanged.
pub const RAW_EVENT_KEY: &str = "raw_event";

/// Reserved metadata key carrying `choices[1..]` of a multi-choice OpenAI
/// response.
pub const CHOICES_EXTRA_KEY: &str = "choices_extra";

/// A supported wire dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI chat-completions dialect.
    OpenAi,
    /// Anthropic messages dialect.
    Anthropic,
    /// Google generativelanguage dialect.
    Gemini,
}

impl Provider {
    /// Canonical lowercase name, as used by registries and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
        }
    }

    /// All providers with built-in adapters.
    pub fn all() -> [Provider; 3] {
        [Provider::OpenAi, Provider::Anthropic, Provider::Gemini]
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "gemini" | "google" => Ok(Provider::Gemini),
            other => Err(format!("unknown provider: '{other}'")),
        }
    }
}

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Tool execution result. Messages with this role must carry a
    /// `tool_call_id` linking back to the originating call.
    Tool,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stopping point (includes stop-sequence hits).
    Stop,
    /// The max-token ceiling was reached.
    Length,
    /// The model invoked one or more tools.
    ToolUse,
    /// Output was blocked or redacted by a safety filter.
    ContentFilter,
    /// The stream terminated because of an error.
    Error,
}

/// Discriminator for [`StreamEvent`] payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    MetadataUpdate,
    ContentStart,
    ContentDelta,
    ContentFinish,
    ToolCallDelta,
    ToolCall,
    StreamEnd,
    Error,
}

/// A neutral request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreRequest {
    /// Model identifier, passed through untranslated.
    pub model: String,

    /// Ordered conversation history.
    pub messages: Vec<Message>,

    /// System prompt, held separately from the message list.
    ///
    /// OpenAI re-emits it as a leading `system` message, Anthropic as the
    /// `system` field, Gemini as `systemInstruction`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,

    /// Tools the model may call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    /// How the model should use the tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Output token ceiling. Anthropic requires it on the wire; the adapter
    /// substitutes a default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Kept as `f64`: narrowing to `f32` would not survive a JSON round-trip
    /// bit-for-bit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// Sequences that halt generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    /// Whether the caller asked for an incremental response.
    #[serde(default)]
    pub stream: bool,

    /// Opaque dialect extras. See [`EXTRA_PARAMS_KEY`] and [`ORIGIN_KEY`].
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// A neutral response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreResponse {
    /// Completion identifier, e.g. `chatcmpl-…` or `msg_…`.
    pub id: String,

    pub model: String,

    /// Unix seconds. Zero when the source dialect does not report one.
    pub created_at: u64,

    /// Ordered content blocks. A block's content index is its position in
    /// this vector.
    pub content: Vec<ContentBlock>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,

    pub usage: Usage,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// One conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    pub content: MessageContent,

    /// Tool invocations attached to an assistant turn, OpenAI style. Dialects
    /// that inline tool use as content blocks leave this empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// For [`Role::Tool`] messages: the call this result answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Dialect-assigned message identifier, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Message {
    /// A plain-text message with no tool attachments.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Message {
            role,
            content: MessageContent::Text(text.into()),
            tool_calls: None,
            tool_call_id: None,
            id: None,
        }
    }

    /// A message built from content blocks.
    pub fn blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Message {
            role,
            content: MessageContent::Blocks(blocks),
            tool_calls: None,
            tool_call_id: None,
            id: None,
        }
    }
}

/// Message content: either a bare string or structured blocks.
///
/// The untagged container preserves the source's shape, so a string request
/// round-trips as a string and a one-element part array as an array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Borrow the text when this is a plain string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Blocks(_) => None,
        }
    }

    /// Flatten all user-visible text, joining block texts with nothing.
    pub fn visible_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// A typed unit of message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },

    /// Image input, normalised to a URL. Inline payloads become `data:` URIs.
    ImageUrl {
        url: String,
        /// OpenAI resolution hint (`low`, `high`, `auto`).
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },

    /// A tool invocation emitted by the model.
    ToolUse {
        id: String,
        name: String,
        arguments: ToolArguments,
    },

    /// Output of a tool execution, fed back to the model.
    ToolResult {
        tool_use_id: String,
        content: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },

    /// OpenAI-compatible reasoning text (`reasoning_content`).
    Reasoning {
        text: String,
    },

    /// Anthropic extended thinking / Gemini thought part.
    Thinking {
        thinking: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// Thinking content withheld by the provider; opaque payload.
    RedactedThinking {
        data: String,
    },
}

/// A callable tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the arguments.
    pub parameters: Value,
}

/// How the model should use the available tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model decides.
    Auto,
    /// Tools are disabled for this turn.
    None,
    /// The model must call at least one tool.
    Required,
    /// The model must call this tool.
    Tool { name: String },
}

/// A model-emitted tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: ToolArguments,
}

/// Tool arguments in the shape the source dialect delivered them.
///
/// OpenAI transmits a JSON string, Anthropic and Gemini a parsed value.
/// Keeping both avoids a parse/serialize cycle on same-dialect round-trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolArguments {
    Text(String),
    Structured(Value),
}

impl ToolArguments {
    /// The arguments as a JSON string, serialising structured values.
    pub fn to_json_string(&self) -> String {
        match self {
            ToolArguments::Text(raw) => raw.clone(),
            ToolArguments::Structured(value) => {
                serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
            }
        }
    }

    /// The arguments as a structured value, parsing strings. Unparseable or
    /// empty strings become an empty object, matching what providers accept
    /// as "no arguments".
    pub fn to_value(&self) -> Value {
        match self {
            ToolArguments::Structured(value) => value.clone(),
            ToolArguments::Text(raw) => {
                if raw.trim().is_empty() {
                    return Value::Object(Map::new());
                }
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
            }
        }
    }
}

/// Token accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
}

impl Usage {
    /// Reported total, falling back to input + output.
    pub fn total(&self) -> u32 {
        self.total_tokens
            .unwrap_or(self.input_tokens + self.output_tokens)
    }
}

/// Kind of content block a stream is opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    ToolUse,
    Thinking,
}

/// Kind of textual delta flowing into an open block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    Text,
    Thinking,
    /// Anthropic thinking-signature fragments.
    Signature,
}

/// Incremental tool-call information.
///
/// The first delta for an index carries `id` and `name`; later deltas carry
/// argument fragments only. Concatenating every `arguments_delta` for an
/// index yields the final arguments string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments_delta: Option<String>,
}

/// One incremental update within a stream session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Strictly increasing per session, starting at 0.
    pub sequence_id: u64,

    /// Seconds since the session started; non-decreasing.
    pub timestamp: f64,

    #[serde(flatten)]
    pub payload: StreamPayload,
}

impl StreamEvent {
    /// The §3.1-style event discriminator.
    pub fn event_type(&self) -> StreamEventType {
        match self.payload {
            StreamPayload::MetadataUpdate { .. } => StreamEventType::MetadataUpdate,
            StreamPayload::ContentStart { .. } => StreamEventType::ContentStart,
            StreamPayload::ContentDelta { .. } => StreamEventType::ContentDelta,
            StreamPayload::ContentFinish { .. } => StreamEventType::ContentFinish,
            StreamPayload::ToolCallDelta { .. } => StreamEventType::ToolCallDelta,
            StreamPayload::ToolCall { .. } => StreamEventType::ToolCall,
            StreamPayload::StreamEnd { .. } => StreamEventType::StreamEnd,
            StreamPayload::Error { .. } => StreamEventType::Error,
        }
    }

    /// Index of the content block this event updates, when it targets one.
    pub fn content_index(&self) -> Option<u32> {
        match &self.payload {
            StreamPayload::ContentStart { index, .. }
            | StreamPayload::ContentDelta { index, .. }
            | StreamPayload::ContentFinish { index }
            | StreamPayload::ToolCallDelta { index, .. }
            | StreamPayload::ToolCall { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Payload of a stream event. Exactly one payload per event, enforced by the
/// type rather than by convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamPayload {
    /// Session metadata: message id, model, usage snapshots, or an opaque
    /// foreign event preserved under [`RAW_EVENT_KEY`].
    MetadataUpdate {
        #[serde(default)]
        metadata: Map<String, Value>,
    },

    /// A content block at `index` begins.
    ContentStart { index: u32, kind: ContentKind },

    /// Text-like fragment appended to the block at `index`.
    ContentDelta {
        index: u32,
        kind: DeltaKind,
        text: String,
    },

    /// No more updates for the block at `index`.
    ContentFinish { index: u32 },

    /// Incremental tool-call information for the block at `index`.
    ToolCallDelta { index: u32, delta: ToolCallDelta },

    /// A complete tool call delivered in one piece (Gemini style).
    ToolCall { index: u32, tool_call: ToolCall },

    /// Terminal event of a successful or failed session.
    StreamEnd {
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_reason: Option<FinishReason>,
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        metadata: Map<String, Value>,
    },

    /// Mid-stream failure. A `StreamEnd` follows; earlier events stand.
    Error { kind: String, message: String },
}
