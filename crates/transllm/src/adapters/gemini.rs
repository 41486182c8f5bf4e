//! Google generativelanguage (Gemini) dialect.
//!
//! Two quirks dominate this adapter. Gemini never transmits tool-call ids,
//! so the adapter mints a UUID per `functionCall` and smuggles it through
//! `thoughtSignature` (base64 of `toolcall:<id>`), recovering it on the way
//! back in. And streamed chunks carry the full parts list seen so far, so
//! the inbound side diffs each chunk against the previous prefix and emits
//! only the new suffix as deltas.

pub(crate) mod schema;

use std::collections::{BTreeSet, HashMap};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::adapter::{DialectAdapter, StreamCursor};
use crate::adapters::{metadata_with_extras, origin_is, restore_extras};
use crate::error::{Result, TransLLMError};
use crate::ir::{self, EXTRA_PARAMS_KEY, ORIGIN_KEY, Provider, RAW_EVENT_KEY};

/// Metadata key preserving unmodeled top-level request fields (as opposed to
/// generation-config parameters, which travel through the alias channel).
const REQUEST_EXTRA_KEY: &str = "gemini_request_extra";
/// Metadata key preserving a finish reason string the IR cannot express.
const FINISH_REASON_RAW_KEY: &str = "finish_reason_raw";
const USAGE_KEY: &str = "usage";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateRequest {
    /// Not part of the REST body proper (the model rides in the URL), but
    /// carried when callers include it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "system_instruction")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "generation_config")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "tool_config")]
    pub tool_config: Option<ToolConfig>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<WireRole>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum WireRole {
    User,
    Model,
    Function,
}

/// One part of a content. Exactly one payload field is set in practice; the
/// request validator enforces it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Marks thinking output when true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "thought_signature")]
    pub thought_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "inline_data")]
    pub inline_data: Option<InlineData>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "file_data")]
    pub file_data: Option<FileData>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "function_call")]
    pub function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "function_response")]
    pub function_response: Option<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InlineData {
    #[serde(alias = "mime_type")]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileData {
    #[serde(skip_serializing_if = "Option::is_none", alias = "mime_type")]
    pub mime_type: Option<String>,
    #[serde(alias = "file_uri")]
    pub file_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "top_p")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "top_k")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "max_output_tokens")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "stop_sequences")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "candidate_count")]
    pub candidate_count: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireTool {
    #[serde(skip_serializing_if = "Option::is_none", alias = "function_declarations")]
    pub function_declarations: Option<Vec<FunctionDeclaration>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FunctionDeclaration {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ToolConfig {
    #[serde(skip_serializing_if = "Option::is_none", alias = "function_calling_config")]
    pub function_calling_config: Option<FunctionCallingConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FunctionCallingConfig {
    pub mode: FunctionCallingMode,
    #[serde(skip_serializing_if = "Option::is_none", alias = "allowed_function_names")]
    pub allowed_function_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum FunctionCallingMode {
    None,
    Auto,
    Any,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "usage_metadata")]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "model_version")]
    pub model_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "response_id")]
    pub response_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Candidate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "finish_reason")]
    pub finish_reason: Option<WireFinishReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum WireFinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    #[serde(untagged)]
    Other(String),
}

impl WireFinishReason {
    fn as_str(&self) -> &str {
        match self {
            WireFinishReason::Stop => "STOP",
            WireFinishReason::MaxTokens => "MAX_TOKENS",
            WireFinishReason::Safety => "SAFETY",
            WireFinishReason::Recitation => "RECITATION",
            WireFinishReason::Other(raw) => raw,
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "STOP" => WireFinishReason::Stop,
            "MAX_TOKENS" => WireFinishReason::MaxTokens,
            "SAFETY" => WireFinishReason::Safety,
            "RECITATION" => WireFinishReason::Recitation,
            other => WireFinishReason::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UsageMetadata {
    #[serde(skip_serializing_if = "Option::is_none", alias = "prompt_token_count")]
    pub prompt_token_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "candidates_token_count")]
    pub candidates_token_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "total_token_count")]
    pub total_token_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "thoughts_token_count")]
    pub thoughts_token_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "cached_content_token_count")]
    pub cached_content_token_count: Option<u32>,
}

// ---------------------------------------------------------------------------
// Tool-call id channel
// ---------------------------------------------------------------------------

const SIGNATURE_PREFIX: &str = "toolcall:";

/// Encodes a tool-call id so it survives a trip through Gemini.
fn encode_tool_call_id(id: &str) -> String {
    BASE64.encode(format!("{SIGNATURE_PREFIX}{id}"))
}

/// Recovers an id from a `thoughtSignature`, if it carries one.
fn decode_tool_call_id(signature: &str) -> Option<String> {
    let decoded = BASE64.decode(signature).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    decoded.strip_prefix(SIGNATURE_PREFIX).map(str::to_string)
}

fn mint_tool_call_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// T1: whether `candidatesTokenCount` already subsumes the whole total.
/// Disjoint counts (prompt + candidates == total) and anything ambiguous are
/// treated as disjoint.
fn candidate_tokens_inclusive(prompt: u32, candidates: u32, total: u32) -> bool {
    if prompt + candidates == total {
        false
    } else {
        candidates == total
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// generativelanguage translator.
#[derive(Debug, Default)]
pub struct GeminiAdapter {
    cursor: StreamCursor,
    inbound: InboundStream,
    outbound: OutboundStream,
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DialectAdapter for GeminiAdapter {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn to_unified_request(&self, doc: &Value) -> Result<ir::CoreRequest> {
        schema::validate_request(doc)?;
        let request: GenerateRequest = serde_json::from_value(doc.clone())?;
        request_to_ir(request)
    }

    fn from_unified_request(&self, request: &ir::CoreRequest) -> Result<Value> {
        let doc = request_from_ir(request)?;
        schema::validate_request(&doc)?;
        Ok(doc)
    }

    fn to_unified_response(&self, doc: &Value) -> Result<ir::CoreResponse> {
        let response: GenerateResponse = serde_json::from_value(doc.clone())?;
        response_to_ir(response)
    }

    fn from_unified_response(&self, response: &ir::CoreResponse) -> Result<Value> {
        response_from_ir(response)
    }

    fn to_unified_stream_event(&mut self, doc: &Value) -> Result<Vec<ir::StreamEvent>> {
        if doc.get("candidates").is_none() && doc.get("usageMetadata").is_none() {
            let mut metadata = Map::new();
            metadata.insert(ORIGIN_KEY.to_string(), json!(Provider::Gemini.as_str()));
            metadata.insert(RAW_EVENT_KEY.to_string(), doc.clone());
            return Ok(vec![self.cursor.stamp(ir::StreamPayload::MetadataUpdate { metadata })]);
        }

        let chunk: GenerateResponse = serde_json::from_value(doc.clone())?;
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

fn request_to_ir(request: GenerateRequest) -> Result<ir::CoreRequest> {
    let mut metadata = Map::new();
    metadata.insert(ORIGIN_KEY.to_string(), json!(Provider::Gemini.as_str()));

    if !request.extra.is_empty() {
        metadata.insert(REQUEST_EXTRA_KEY.to_string(), Value::Object(request.extra));
    }

    let mut extra_params = Map::new();
    let (max_tokens, temperature, top_p, stop) = match request.generation_config {
        None => (None, None, None, None),
        Some(config) => {
            if let Some(top_k) = config.top_k {
                extra_params.insert("top_k".to_string(), json!(top_k));
            }
            if let Some(count) = config.candidate_count {
                extra_params.insert("candidate_count".to_string(), json!(count));
            }
            for (name, value) in config.extra {
                let key = crate::aliases::to_canonical(Provider::Gemini, &name);
                extra_params.insert(key.to_string(), value);
            }
            (
                config.max_output_tokens,
                config.temperature,
                config.top_p,
                config.stop_sequences,
            )
        }
    };
    if !extra_params.is_empty() {
        metadata.insert(EXTRA_PARAMS_KEY.to_string(), Value::Object(extra_params));
    }

    let system_instruction = request.system_instruction.map(|content| {
        content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    });

    // Tool-call ids per function name, so later functionResponse parts can
    // point back at the call that produced them.
    let mut call_ids: HashMap<String, String> = HashMap::new();
    let messages = request
        .contents
        .into_iter()
        .map(|content| content_to_ir(content, &mut call_ids))
        .collect::<Result<Vec<_>>>()?;

    let tool_choice = request
        .tool_config
        .and_then(|config| config.function_calling_config)
        .map(|config| match (config.mode, config.allowed_function_names) {
            (FunctionCallingMode::Any, Some(names)) if names.len() == 1 => ir::ToolChoice::Tool {
                name: names.into_iter().next().unwrap_or_default(),
            },
            (FunctionCallingMode::Any, _) => ir::ToolChoice::Required,
            (FunctionCallingMode::Auto, _) => ir::ToolChoice::Auto,
            (FunctionCallingMode::None, _) => ir::ToolChoice::None,
        });

    Ok(ir::CoreRequest {
        model: request.model.unwrap_or_default(),
        messages,
        system_instruction,
        tools: request.tools.map(|tools| {
            tools
                .into_iter()
                .flat_map(|tool| tool.function_declarations.unwrap_or_default())
                .map(|declaration| ir::ToolDefinition {
                    name: declaration.name,
                    description: declaration.description,
                    parameters: declaration.parameters.unwrap_or(Value::Null),
                })
                .collect()
        }),
        tool_choice,
        max_tokens,
        temperature,
        top_p,
        stop,
        stream: false,
        metadata,
    })
}

fn content_to_ir(content: Content, call_ids: &mut HashMap<String, String>) -> Result<ir::Message> {
    let role = match content.role {
        Some(WireRole::Model) => ir::Role::Assistant,
        Some(WireRole::Function) => ir::Role::Tool,
        Some(WireRole::User) | None => ir::Role::User,
    };

    let blocks = content
        .parts
        .into_iter()
        .map(|part| part_to_ir(part, call_ids))
        .collect::<Result<Vec<_>>>()?;

    // Tool messages must point at the call they answer.
    let tool_call_id = if role == ir::Role::Tool {
        blocks.iter().find_map(|block| match block {
            ir::ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
            _ => None,
        })
    } else {
        None
    };

    Ok(ir::Message {
        role,
        content: ir::MessageContent::Blocks(blocks),
        tool_calls: None,
        tool_call_id,
        id: None,
    })
}

fn part_to_ir(part: Part, call_ids: &mut HashMap<String, String>) -> Result<ir::ContentBlock> {
    if let Some(call) = part.function_call {
        let id = part
            .thought_signature
            .as_deref()
            .and_then(decode_tool_call_id)
            .unwrap_or_else(mint_tool_call_id);
        call_ids.insert(call.name.clone(), id.clone());
        return Ok(ir::ContentBlock::ToolUse {
            id,
            name: call.name,
            arguments: ir::ToolArguments::Structured(call.args),
        });
    }

    if let Some(response) = part.function_response {
        let tool_use_id = call_ids.get(&response.name).cloned().unwrap_or_else(|| {
            log::debug!("function response '{}' has no preceding call; minting an id", response.name);
            mint_tool_call_id()
        });
        return Ok(ir::ContentBlock::ToolResult {
            tool_use_id,
            content: response.response,
            is_error: None,
        });
    }

    if let Some(data) = part.inline_data {
        return Ok(ir::ContentBlock::ImageUrl {
            url: format!("data:{};base64,{}", data.mime_type, data.data),
            detail: None,
        });
    }

    if let Some(file) = part.file_data {
        return Ok(ir::ContentBlock::ImageUrl {
            url: file.file_uri,
            detail: None,
        });
    }

    if let Some(text) = part.text {
        if part.thought == Some(true) {
            return Ok(ir::ContentBlock::Thinking {
                thinking: text,
                signature: part.thought_signature,
            });
        }
        return Ok(ir::ContentBlock::Text { text });
    }

    Err(TransLLMError::conversion(
        Provider::Gemini,
        None,
        "part with no recognised payload",
    ))
}

fn request_from_ir(request: &ir::CoreRequest) -> Result<Value> {
    let same_dialect = origin_is(&request.metadata, Provider::Gemini);

    // Names for tool results: collected from the calls in this request.
    let mut call_names: HashMap<String, String> = HashMap::new();

    let mut contents: Vec<Content> = Vec::new();
    for message in &request.messages {
        let content = content_from_ir(message, &mut call_names)?;
        if content.parts.is_empty() {
            log::debug!("skipping message with no representable parts");
            continue;
        }
        // Consecutive same-role contents merge into one; Gemini prefers
        // fewer, fuller turns.
        match contents.last_mut() {
            Some(previous) if previous.role == content.role => {
                previous.parts.extend(content.parts);
            }
            _ => contents.push(content),
        }
    }

    let mut generation_config = GenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        max_output_tokens: request.max_tokens,
        stop_sequences: request.stop.clone(),
        ..Default::default()
    };
    for (name, value) in restore_extras(Provider::Gemini, &request.metadata) {
        match name.as_str() {
            "topK" => generation_config.top_k = value.as_u64().map(|v| v as u32),
            "candidateCount" => generation_config.candidate_count = value.as_u64().map(|v| v as u32),
            _ => {
                generation_config.extra.insert(name, value);
            }
        }
    }
    let has_config = generation_config.temperature.is_some()
        || generation_config.top_p.is_some()
        || generation_config.top_k.is_some()
        || generation_config.max_output_tokens.is_some()
        || generation_config.stop_sequences.is_some()
        || generation_config.candidate_count.is_some()
        || !generation_config.extra.is_empty();

    let tools = request.tools.as_ref().map(|tools| {
        vec![WireTool {
            function_declarations: Some(
                tools
                    .iter()
                    .map(|tool| FunctionDeclaration {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: match &tool.parameters {
                            Value::Null => None,
                            other => Some(schema::normalize_schema(other.clone())),
                        },
                    })
                    .collect(),
            ),
        }]
    });

    let tool_config = request.tool_choice.as_ref().map(|choice| {
        let (mode, allowed_function_names) = match choice {
            ir::ToolChoice::Auto => (FunctionCallingMode::Auto, None),
            ir::ToolChoice::None => (FunctionCallingMode::None, None),
            ir::ToolChoice::Required => (FunctionCallingMode::Any, None),
            ir::ToolChoice::Tool { name } => (FunctionCallingMode::Any, Some(vec![name.clone()])),
        };
        ToolConfig {
            function_calling_config: Some(FunctionCallingConfig {
                mode,
                allowed_function_names,
            }),
        }
    });

    let extra = if same_dialect {
        match request.metadata.get(REQUEST_EXTRA_KEY) {
            Some(Value::Object(saved)) => saved.clone(),
            _ => Map::new(),
        }
    } else {
        Map::new()
    };

    let wire = GenerateRequest {
        model: if request.model.is_empty() {
            None
        } else {
            Some(request.model.clone())
        },
        contents,
        system_instruction: request.system_instruction.as_ref().map(|text| Content {
            role: Some(WireRole::User),
            parts: vec![Part {
                text: Some(text.clone()),
                ..Default::default()
            }],
        }),
        generation_config: has_config.then_some(generation_config),
        tools,
        tool_config,
        extra,
    };

    Ok(serde_json::to_value(wire)?)
}

fn content_from_ir(message: &ir::Message, call_names: &mut HashMap<String, String>) -> Result<Content> {
    let role = match message.role {
        ir::Role::Assistant => WireRole::Model,
        ir::Role::Tool => WireRole::Function,
        ir::Role::User | ir::Role::System => WireRole::User,
    };

    let mut parts = Vec::new();
    match &message.content {
        ir::MessageContent::Text(text) => {
            if message.role == ir::Role::Tool {
                // A plain-text tool result still has to ride in a
                // functionResponse part.
                let id = message.tool_call_id.clone().ok_or_else(|| {
                    TransLLMError::conversion(None, Provider::Gemini, "tool message without tool_call_id")
                })?;
                parts.push(function_response_part(&id, &Value::String(text.clone()), call_names));
            } else {
                parts.push(Part {
                    text: Some(text.clone()),
                    ..Default::default()
                });
            }
        }
        ir::MessageContent::Blocks(blocks) => {
            for block in blocks {
                parts.push(block_to_part(block, call_names)?);
            }
        }
    }

    if let Some(calls) = &message.tool_calls {
        for call in calls {
            let already_present = parts.iter().any(|part| {
                part.thought_signature.as_deref().and_then(decode_tool_call_id).as_deref()
                    == Some(call.id.as_str())
            });
            if already_present {
                continue;
            }
            call_names.insert(call.id.clone(), call.name.clone());
            parts.push(Part {
                function_call: Some(FunctionCall {
                    name: call.name.clone(),
                    args: call.arguments.to_value(),
                }),
                thought_signature: Some(encode_tool_call_id(&call.id)),
                ..Default::default()
            });
        }
    }

    Ok(Content {
        role: Some(role),
        parts,
    })
}

fn block_to_part(block: &ir::ContentBlock, call_names: &mut HashMap<String, String>) -> Result<Part> {
    Ok(match block {
        ir::ContentBlock::Text { text } => Part {
            text: Some(text.clone()),
            ..Default::default()
        },
        ir::ContentBlock::Thinking { thinking, signature } => Part {
            text: Some(thinking.clone()),
            thought: Some(true),
            thought_signature: signature.clone(),
            ..Default::default()
        },
        ir::ContentBlock::Reasoning { text } => Part {
            text: Some(text.clone()),
            thought: Some(true),
            ..Default::default()
        },
        ir::ContentBlock::RedactedThinking { .. } => {
            return Err(TransLLMError::unsupported_feature("redacted_thinking", Provider::Gemini));
        }
        ir::ContentBlock::ImageUrl { url, detail } => {
            if detail.is_some() {
                log::debug!("dropping image detail hint; no Gemini counterpart");
            }
            if let Some(rest) = url.strip_prefix("data:")
                && let Some((mime_type, data)) = rest.split_once(";base64,")
            {
                Part {
                    inline_data: Some(InlineData {
                        mime_type: mime_type.to_string(),
                        data: data.to_string(),
                    }),
                    ..Default::default()
                }
            } else {
                // The engine never fetches; remote URLs travel as file data
                // and inlining is the caller's concern.
                Part {
                    file_data: Some(FileData {
                        mime_type: None,
                        file_uri: url.clone(),
                    }),
                    ..Default::default()
                }
            }
        }
        ir::ContentBlock::ToolUse { id, name, arguments } => {
            call_names.insert(id.clone(), name.clone());
            Part {
                function_call: Some(FunctionCall {
                    name: name.clone(),
                    args: arguments.to_value(),
                }),
                thought_signature: Some(encode_tool_call_id(id)),
                ..Default::default()
            }
        }
        ir::ContentBlock::ToolResult { tool_use_id, content, .. } => {
            function_response_part(tool_use_id, content, call_names)
        }
    })
}

fn function_response_part(
    tool_use_id: &str,
    content: &Value,
    call_names: &mut HashMap<String, String>,
) -> Part {
    let name = call_names.get(tool_use_id).cloned().unwrap_or_else(|| {
        log::warn!("no function name recorded for tool call '{tool_use_id}'");
        "unknown_function".to_string()
    });

    // The API requires the response to be a JSON object.
    let response = match content {
        Value::Object(_) => content.clone(),
        other => json!({"result": other}),
    };

    Part {
        function_response: Some(FunctionResponse { name, response }),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

fn response_to_ir(response: GenerateResponse) -> Result<ir::CoreResponse> {
    let mut metadata = metadata_with_extras(Provider::Gemini, response.extra);

    let mut candidates = response.candidates.into_iter();
    let first = candidates.next().ok_or_else(|| {
        TransLLMError::conversion(Provider::Gemini, None, "response has no candidates")
    })?;

    let mut call_ids = HashMap::new();
    let content = match first.content {
        None => Vec::new(),
        Some(content) => content
            .parts
            .into_iter()
            .map(|part| part_to_ir(part, &mut call_ids))
            .collect::<Result<Vec<_>>>()?,
    };

    let has_tool_call = content
        .iter()
        .any(|block| matches!(block, ir::ContentBlock::ToolUse { .. }));

    let finish_reason = first.finish_reason.map(|reason| {
        metadata.insert(FINISH_REASON_RAW_KEY.to_string(), json!(reason.as_str()));
        match reason {
            // STOP with a function call in the parts means the model
            // stopped *to* call the tool.
            WireFinishReason::Stop if has_tool_call => ir::FinishReason::ToolUse,
            WireFinishReason::Stop => ir::FinishReason::Stop,
            WireFinishReason::MaxTokens => ir::FinishReason::Length,
            WireFinishReason::Safety | WireFinishReason::Recitation => ir::FinishReason::ContentFilter,
            WireFinishReason::Other(raw) => {
                log::warn!("unknown finish reason from Gemini: {raw}");
                ir::FinishReason::Stop
            }
        }
    });

    Ok(ir::CoreResponse {
        id: response.response_id.unwrap_or_default(),
        model: response.model_version.unwrap_or_default(),
        created_at: 0,
        content,
        finish_reason,
        usage: response.usage_metadata.map(usage_to_ir).unwrap_or_default(),
        metadata,
    })
}

fn usage_to_ir(usage: UsageMetadata) -> ir::Usage {
    let prompt = usage.prompt_token_count.unwrap_or(0);
    let candidates = usage.candidates_token_count.unwrap_or(0);
    let total = usage.total_token_count.unwrap_or(prompt + candidates);

    let output_tokens = if candidate_tokens_inclusive(prompt, candidates, total) {
        total.saturating_sub(prompt)
    } else {
        candidates
    };

    ir::Usage {
        input_tokens: prompt,
        output_tokens,
        cache_read_tokens: usage.cached_content_token_count,
        cache_write_tokens: None,
        reasoning_tokens: usage.thoughts_token_count,
        total_tokens: usage.total_token_count,
    }
}

fn usage_from_ir(usage: &ir::Usage) -> UsageMetadata {
    UsageMetadata {
        prompt_token_count: Some(usage.input_tokens),
        candidates_token_count: Some(usage.output_tokens),
        total_token_count: Some(usage.total()),
        thoughts_token_count: usage.reasoning_tokens,
        cached_content_token_count: usage.cache_read_tokens,
    }
}

fn response_from_ir(response: &ir::CoreResponse) -> Result<Value> {
    let same_dialect = origin_is(&response.metadata, Provider::Gemini);

    let mut call_names = HashMap::new();
    let mut parts = Vec::new();
    for block in &response.content {
        match block {
            ir::ContentBlock::ToolResult { .. } => {
                log::warn!("dropping tool_result block from response content");
            }
            other => parts.push(block_to_part(other, &mut call_names)?),
        }
    }

    let finish_reason = match response.metadata.get(FINISH_REASON_RAW_KEY) {
        Some(Value::String(raw)) if same_dialect => Some(WireFinishReason::parse(raw)),
        _ => response.finish_reason.map(|reason| match reason {
            ir::FinishReason::Stop | ir::FinishReason::ToolUse | ir::FinishReason::Error => {
                WireFinishReason::Stop
            }
            ir::FinishReason::Length => WireFinishReason::MaxTokens,
            ir::FinishReason::ContentFilter => WireFinishReason::Safety,
        }),
    };

    let wire = GenerateResponse {
        candidates: vec![Candidate {
            content: Some(Content {
                role: Some(WireRole::Model),
                parts,
            }),
            finish_reason,
            index: Some(0),
            extra: Map::new(),
        }],
        usage_metadata: Some(usage_from_ir(&response.usage)),
        model_version: if response.model.is_empty() {
            None
        } else {
            Some(response.model.clone())
        },
        response_id: if response.id.is_empty() {
            None
        } else {
            Some(response.id.clone())
        },
        extra: restore_extras(Provider::Gemini, &response.metadata),
    };

    Ok(serde_json::to_value(wire)?)
}

// ---------------------------------------------------------------------------
// Streaming: wire → IR
// ---------------------------------------------------------------------------

/// What the diff has already seen at a given part position.
#[derive(Debug)]
enum SeenPart {
    Text { thought: bool, text: String },
    Tool,
    Media,
}

#[derive(Debug, Default)]
struct InboundStream {
    started: bool,
    seen: Vec<SeenPart>,
    open: BTreeSet<u32>,
}

impl InboundStream {
    fn process(&mut self, chunk: GenerateResponse) -> Vec<ir::StreamPayload> {
        let mut payloads = Vec::new();

        if !self.started {
            self.started = true;
            let mut metadata = Map::new();
            if let Some(id) = &chunk.response_id {
                metadata.insert("id".to_string(), json!(id));
            }
            if let Some(model) = &chunk.model_version {
                metadata.insert("model".to_string(), json!(model));
            }
            payloads.push(ir::StreamPayload::MetadataUpdate { metadata });
        }

        let Some(candidate) = chunk.candidates.into_iter().next() else {
            if let Some(usage) = chunk.usage_metadata {
                let mut metadata = Map::new();
                metadata.insert(USAGE_KEY.to_string(), usage_snapshot(usage));
                payloads.push(ir::StreamPayload::MetadataUpdate { metadata });
            }
            return payloads;
        };

        let parts = candidate.content.map(|content| content.parts).unwrap_or_default();
        let mut call_ids = HashMap::new();

        for (position, part) in parts.into_iter().enumerate() {
            let index = position as u32;
            if position < self.seen.len() {
                self.diff_existing(index, part, &mut payloads);
            } else {
                self.start_new(index, part, &mut call_ids, &mut payloads);
            }
        }

        if let Some(reason) = candidate.finish_reason {
            for index in std::mem::take(&mut self.open) {
                payloads.push(ir::StreamPayload::ContentFinish { index });
            }

            let mut metadata = Map::new();
            if let Some(usage) = chunk.usage_metadata {
                metadata.insert(USAGE_KEY.to_string(), usage_snapshot(usage));
            }
            metadata.insert(FINISH_REASON_RAW_KEY.to_string(), json!(reason.as_str()));

            let saw_tool = self.seen.iter().any(|seen| matches!(seen, SeenPart::Tool));
            let finish_reason = match reason {
                WireFinishReason::Stop if saw_tool => ir::FinishReason::ToolUse,
                WireFinishReason::Stop => ir::FinishReason::Stop,
                WireFinishReason::MaxTokens => ir::FinishReason::Length,
                WireFinishReason::Safety | WireFinishReason::Recitation => ir::FinishReason::ContentFilter,
                WireFinishReason::Other(_) => ir::FinishReason::Stop,
            };
            payloads.push(ir::StreamPayload::StreamEnd {
                finish_reason: Some(finish_reason),
                metadata,
            });
        } else if let Some(usage) = chunk.usage_metadata {
            let mut metadata = Map::new();
            metadata.insert(USAGE_KEY.to_string(), usage_snapshot(usage));
            payloads.push(ir::StreamPayload::MetadataUpdate { metadata });
        }

        payloads
    }

    /// Chunks repeat the parts seen so far; emit only what grew.
    fn diff_existing(&mut self, index: u32, part: Part, payloads: &mut Vec<ir::StreamPayload>) {
        let Some(seen) = self.seen.get_mut(index as usize) else {
            return;
        };
        let SeenPart::Text { thought, text: previous } = seen else {
            return;
        };
        let Some(new_text) = part.text else {
            return;
        };

        let kind = if *thought {
            ir::DeltaKind::Thinking
        } else {
            ir::DeltaKind::Text
        };

        let suffix = match new_text.strip_prefix(previous.as_str()) {
            Some(suffix) => suffix.to_string(),
            None => {
                log::warn!("streamed part {index} no longer extends its prefix; re-emitting whole text");
                new_text.clone()
            }
        };
        if suffix.is_empty() {
            return;
        }

        *previous = new_text;
        payloads.push(ir::StreamPayload::ContentDelta {
            index,
            kind,
            text: suffix,
        });
    }

    fn start_new(
        &mut self,
        index: u32,
        part: Part,
        call_ids: &mut HashMap<String, String>,
        payloads: &mut Vec<ir::StreamPayload>,
    ) {
        if let Some(call) = part.function_call {
            let id = part
                .thought_signature
                .as_deref()
                .and_then(decode_tool_call_id)
                .unwrap_or_else(mint_tool_call_id);
            call_ids.insert(call.name.clone(), id.clone());

            // Function calls arrive whole; open, deliver, close.
            payloads.push(ir::StreamPayload::ContentStart {
                index,
                kind: ir::ContentKind::ToolUse,
            });
            payloads.push(ir::StreamPayload::ToolCall {
                index,
                tool_call: ir::ToolCall {
                    id,
                    name: call.name,
                    arguments: ir::ToolArguments::Structured(call.args),
                },
            });
            payloads.push(ir::StreamPayload::ContentFinish { index });
            self.seen.push(SeenPart::Tool);
            return;
        }

        if part.inline_data.is_some() || part.file_data.is_some() {
            log::debug!("ignoring streamed media part at index {index}");
            self.seen.push(SeenPart::Media);
            return;
        }

        let thought = part.thought == Some(true);
        let text = part.text.unwrap_or_default();

        payloads.push(ir::StreamPayload::ContentStart {
            index,
            kind: if thought {
                ir::ContentKind::Thinking
            } else {
                ir::ContentKind::Text
            },
        });
        if !text.is_empty() {
            payloads.push(ir::StreamPayload::ContentDelta {
                index,
                kind: if thought {
                    ir::DeltaKind::Thinking
                } else {
                    ir::DeltaKind::Text
                },
                text: text.clone(),
            });
        }
        self.open.insert(index);
        self.seen.push(SeenPart::Text { thought, text });
    }
}

fn usage_snapshot(usage: UsageMetadata) -> Value {
    serde_json::to_value(usage_to_ir(usage)).unwrap_or(Value::Null)
}

// ---------------------------------------------------------------------------
// Streaming: IR → wire
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum OutPart {
    Text {
        thought: bool,
        text: String,
        signature: Option<String>,
    },
    Tool {
        id: Option<String>,
        name: Option<String>,
        buffer: String,
        complete: Option<(String, String, Value)>,
    },
}

#[derive(Debug, Default)]
struct OutboundStream {
    id: Option<String>,
    model: Option<String>,
    /// Accumulated full parts, re-sent in every chunk the way Gemini streams
    /// them; positions are IR content indices in arrival order.
    parts: Vec<OutPart>,
    index_map: HashMap<u32, usize>,
    usage: Option<Value>,
}

impl OutboundStream {
    fn process(&mut self, event: &ir::StreamEvent) -> Result<Vec<Value>> {
        match &event.payload {
            ir::StreamPayload::MetadataUpdate { metadata } => {
                if let Some(raw) = metadata.get(RAW_EVENT_KEY) {
                    if origin_is(metadata, Provider::Gemini) {
                        return Ok(vec![raw.clone()]);
                    }
                    return Ok(Vec::new());
                }
                if let Some(Value::String(id)) = metadata.get("id") {
                    self.id = Some(id.clone());
                }
                if let Some(Value::String(model)) = metadata.get("model") {
                    self.model = Some(model.clone());
                }
                if let Some(usage) = metadata.get(USAGE_KEY) {
                    self.usage = Some(usage.clone());
                }
                Ok(Vec::new())
            }

            ir::StreamPayload::ContentStart { index, kind } => {
                let slot = match kind {
                    ir::ContentKind::ToolUse => OutPart::Tool {
                        id: None,
                        name: None,
                        buffer: String::new(),
                        complete: None,
                    },
                    ir::ContentKind::Thinking => OutPart::Text {
                        thought: true,
                        text: String::new(),
                        signature: None,
                    },
                    ir::ContentKind::Text => OutPart::Text {
                        thought: false,
                        text: String::new(),
                        signature: None,
                    },
                };
                self.index_map.insert(*index, self.parts.len());
                self.parts.push(slot);
                Ok(Vec::new())
            }

            ir::StreamPayload::ContentDelta { index, kind, text } => {
                let position = self.slot_for(*index, kind_for_delta(*kind));
                if let Some(OutPart::Text { text: buffer, signature, .. }) = self.parts.get_mut(position) {
                    match kind {
                        ir::DeltaKind::Signature => {
                            let target = signature.get_or_insert_with(String::new);
                            target.push_str(text);
                        }
                        _ => buffer.push_str(text),
                    }
                }
                if *kind == ir::DeltaKind::Signature {
                    // Signatures render with the part; no chunk of their own.
                    return Ok(Vec::new());
                }
                Ok(vec![self.chunk(None)?])
            }

            ir::StreamPayload::ToolCallDelta { index, delta } => {
                let position = self.slot_for(*index, ir::ContentKind::ToolUse);
                if let Some(OutPart::Tool { id, name, buffer, .. }) = self.parts.get_mut(position) {
                    if let Some(new_id) = &delta.id {
                        *id = Some(new_id.clone());
                    }
                    if let Some(new_name) = &delta.name {
                        *name = Some(new_name.clone());
                    }
                    if let Some(fragment) = &delta.arguments_delta {
                        buffer.push_str(fragment);
                    }
                }
                // Partial JSON has no Gemini representation; the assembled
                // call goes out when the block finishes.
                Ok(Vec::new())
            }

            ir::StreamPayload::ToolCall { index, tool_call } => {
                let position = self.slot_for(*index, ir::ContentKind::ToolUse);
                if let Some(OutPart::Tool { complete, .. }) = self.parts.get_mut(position) {
                    *complete = Some((
                        tool_call.id.clone(),
                        tool_call.name.clone(),
                        tool_call.arguments.to_value(),
                    ));
                }
                Ok(vec![self.chunk(None)?])
            }

            ir::StreamPayload::ContentFinish { index } => {
                let Some(&position) = self.index_map.get(index) else {
                    return Ok(Vec::new());
                };
                if let Some(OutPart::Tool { id, name, buffer, complete }) = self.parts.get_mut(position)
                    && complete.is_none()
                {
                    let arguments = if buffer.trim().is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(buffer).unwrap_or_else(|_| json!({}))
                    };
                    *complete = Some((
                        id.clone().unwrap_or_else(mint_tool_call_id),
                        name.clone().unwrap_or_default(),
                        arguments,
                    ));
                    return Ok(vec![self.chunk(None)?]);
                }
                Ok(Vec::new())
            }

            ir::StreamPayload::StreamEnd { finish_reason, metadata } => {
                if let Some(usage) = metadata.get(USAGE_KEY) {
                    self.usage = Some(usage.clone());
                }
                let reason = match metadata.get(FINISH_REASON_RAW_KEY) {
                    Some(Value::String(raw)) => WireFinishReason::parse(raw),
                    _ => match finish_reason.unwrap_or(ir::FinishReason::Stop) {
                        ir::FinishReason::Stop | ir::FinishReason::ToolUse | ir::FinishReason::Error => {
                            WireFinishReason::Stop
                        }
                        ir::FinishReason::Length => WireFinishReason::MaxTokens,
                        ir::FinishReason::ContentFilter => WireFinishReason::Safety,
                    },
                };
                Ok(vec![self.chunk(Some(reason))?])
            }

            ir::StreamPayload::Error { kind, message } => Ok(vec![json!({
                "error": {"code": 502, "message": message, "status": kind}
            })]),
        }
    }

    fn slot_for(&mut self, index: u32, kind: ir::ContentKind) -> usize {
        if let Some(&position) = self.index_map.get(&index) {
            return position;
        }
        let slot = match kind {
            ir::ContentKind::ToolUse => OutPart::Tool {
                id: None,
                name: None,
                buffer: String::new(),
                complete: None,
            },
            ir::ContentKind::Thinking => OutPart::Text {
                thought: true,
                text: String::new(),
                signature: None,
            },
            ir::ContentKind::Text => OutPart::Text {
                thought: false,
                text: String::new(),
                signature: None,
            },
        };
        let position = self.parts.len();
        self.index_map.insert(index, position);
        self.parts.push(slot);
        position
    }

    fn chunk(&self, finish_reason: Option<WireFinishReason>) -> Result<Value> {
        let parts: Vec<Part> = self
            .parts
            .iter()
            .filter_map(|part| match part {
                OutPart::Text { thought, text, signature } => Some(Part {
                    text: Some(text.clone()),
                    thought: if *thought { Some(true) } else { None },
                    thought_signature: signature.clone(),
                    ..Default::default()
                }),
                OutPart::Tool { complete, .. } => {
                    let (id, name, args) = complete.as_ref()?;
                    Some(Part {
                        function_call: Some(FunctionCall {
                            name: name.clone(),
                            args: args.clone(),
                        }),
                        thought_signature: Some(encode_tool_call_id(id)),
                        ..Default::default()
                    })
                }
            })
            .collect();

        let final_chunk = finish_reason.is_some();
        let response = GenerateResponse {
            candidates: vec![Candidate {
                content: Some(Content {
                    role: Some(WireRole::Model),
                    parts,
                }),
                finish_reason,
                index: Some(0),
                extra: Map::new(),
            }],
            usage_metadata: if final_chunk {
                self.usage
                    .as_ref()
                    .and_then(|value| serde_json::from_value::<ir::Usage>(value.clone()).ok())
                    .map(|usage| usage_from_ir(&usage))
            } else {
                None
            },
            model_version: self.model.clone(),
            response_id: self.id.clone(),
            extra: Map::new(),
        };

        Ok(serde_json::to_value(response)?)
    }
}

fn kind_for_delta(kind: ir::DeltaKind) -> ir::ContentKind {
    match kind {
        ir::DeltaKind::Text => ir::ContentKind::Text,
        ir::DeltaKind::Thinking | ir::DeltaKind::Signature => ir::ContentKind::Thinking,
    }
}
