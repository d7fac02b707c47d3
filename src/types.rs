use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing_error::SpanTrace;

#[derive(Error, Debug)]
pub enum PrismError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Raw non-success HTTP response, carrying status and the captured body.
    /// Produced by the transport layer; the classifier turns it into one of
    /// the variants below.
    #[error("Upstream error (status {0}): {1}")]
    Upstream(reqwest::StatusCode, String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: PrismError,
    pub span_trace: SpanTrace,
}

impl std::fmt::Display for ObservedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n\nSpan Trace:\n{}", self.inner, self.span_trace)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<PrismError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;

/// --- CONVERSATION MODEL ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurnRecord {
    pub role: Role,
    pub content: Vec<MessagePart>,
    pub tool_call_id: Option<String>,
}

impl TurnRecord {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![MessagePart::Text {
                content: content.into(),
            }],
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![MessagePart::Text {
                content: content.into(),
            }],
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum MessagePart {
    Text {
        content: String,
    },
    Thought {
        content: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        name: Option<String>,
        content: String,
        is_error: bool,
    },
}

/// --- EMITTED UNITS ---

/// A complete tool invocation, ready for the consumer. Arguments are parsed;
/// an unparseable accumulation degrades to an empty mapping upstream of this.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamUnit {
    Text(String),
    ToolCall(ToolInvocation),
}

/// Consumer of incremental output. Units arrive in emission order; text and
/// tool-call units may interleave.
pub trait ProgressSink: Send {
    fn emit(&mut self, unit: StreamUnit);
}

/// --- STREAM WIRE TYPES ---

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ChatChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    pub usage: Option<Usage>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One fragment of a tool invocation, keyed by its positional index.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    pub function: Option<FunctionDelta>,
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct FunctionDelta {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct WireError {
    pub error: WireErrorDetails,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct WireErrorDetails {
    pub message: String,
    #[serde(default)]
    pub code: Option<serde_json::Value>,

    /// Catch-all for provider extras like `type`, `param`, `metadata`.
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug)]
pub enum LineEvent {
    Chunk(ChatChunk),
    Error(WireError),
    Unknown(String),
}

/// Classifies one SSE data payload. Error shape is tried first since it is
/// the more specific one (requires an `error` key); a chunk must carry either
/// choices or usage to count as a chunk.
pub fn parse_data_payload(data: &str) -> LineEvent {
    if let Ok(err) = serde_json::from_str::<WireError>(data) {
        return LineEvent::Error(err);
    }
    if let Ok(chunk) = serde_json::from_str::<ChatChunk>(data) {
        if !chunk.choices.is_empty() || chunk.usage.is_some() {
            return LineEvent::Chunk(chunk);
        }
    }
    tracing::debug!(
        target: "stream",
        "unrecognized stream payload: {}",
        crate::str_utils::first_n_chars_lossy(data, 200)
    );
    LineEvent::Unknown(data.to_string())
}

/// --- NON-STREAMING WIRE TYPES ---

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Completion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    pub usage: Option<Usage>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CompletionChoice {
    #[serde(default)]
    pub index: u32,
    pub message: AssistantReply,
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AssistantReply {
    pub role: Option<Role>,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<CompletedToolCall>>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CompletedToolCall {
    pub id: String,
    #[serde(default)]
    pub r#type: String,
    pub function: CompletedFunction,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CompletedFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl Completion {
    /// Projects the first choice into message parts: text content plus any
    /// complete tool calls, with the same argument fallback the streaming
    /// path uses.
    pub fn message_parts(&self) -> Vec<MessagePart> {
        let mut parts = Vec::new();
        let choice = match self.choices.first() {
            Some(c) => c,
            None => return parts,
        };
        if let Some(content) = &choice.message.content {
            if !content.is_empty() {
                parts.push(MessagePart::Text {
                    content: content.clone(),
                });
            }
        }
        if let Some(tool_calls) = &choice.message.tool_calls {
            for call in tool_calls {
                parts.push(MessagePart::ToolCall {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    arguments: parse_tool_arguments(
                        &call.function.name,
                        &call.id,
                        &call.function.arguments,
                    ),
                });
            }
        }
        parts
    }
}

/// --- TOOL-CALL ACCUMULATION ---

#[derive(Default, Clone)]
pub struct ToolCallBuilder {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

/// Reassembles tool invocations from per-index fragments. Lives exactly as
/// long as one response; the driver flushes it on a `tool_calls` finish
/// signal and once more at stream end.
#[derive(Default)]
pub struct ToolCallAccumulator {
    builders: HashMap<u32, ToolCallBuilder>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one fragment into the builder for its index. Identifier and
    /// name are set only from non-empty values, so a late empty fragment can
    /// never wipe them; argument text is always appended.
    pub fn collect(&mut self, fragment: &ToolCallDelta) {
        let entry = self.builders.entry(fragment.index).or_default();
        if let Some(id) = &fragment.id {
            if !id.is_empty() {
                entry.id = Some(id.clone());
            }
        }
        if let Some(function) = &fragment.function {
            if let Some(name) = &function.name {
                if !name.is_empty() {
                    tracing::debug!(
                        target: "stream",
                        "tool call at index {} named: {}",
                        fragment.index,
                        name
                    );
                    entry.name = Some(name.clone());
                }
            }
            if let Some(arguments) = &function.arguments {
                entry.arguments.push_str(arguments);
            }
        }
    }

    /// Finalizes every builder that has both an identifier and a name, in
    /// index order, and clears the accumulator. Builders missing either are
    /// incomplete invocations and are dropped. Safe to call repeatedly; a
    /// second flush with nothing collected yields nothing.
    pub fn flush(&mut self) -> Vec<ToolInvocation> {
        let mut drained: Vec<(u32, ToolCallBuilder)> =
            std::mem::take(&mut self.builders).into_iter().collect();
        drained.sort_unstable_by_key(|(index, _)| *index);

        let mut finalized = Vec::new();
        for (index, builder) in drained {
            let (id, name) = match (builder.id, builder.name) {
                (Some(id), Some(name)) => (id, name),
                _ => {
                    tracing::warn!(
                        target: "stream",
                        "dropping incomplete tool call at index {} (missing id or name)",
                        index
                    );
                    continue;
                }
            };
            let arguments = parse_tool_arguments(&name, &id, &builder.arguments);
            finalized.push(ToolInvocation {
                id,
                name,
                arguments,
            });
        }
        finalized
    }

    /// Builders still waiting for a flush.
    pub fn pending(&self) -> usize {
        self.builders.len()
    }
}

fn parse_tool_arguments(name: &str, id: &str, raw: &str) -> serde_json::Value {
    // No-argument tools legitimately stream nothing at all.
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(parse_err) => {
            tracing::warn!(
                target: "stream",
                "tool call '{}' (id={}) has unparseable arguments ({}), substituting empty object",
                name,
                id,
                parse_err
            );
            serde_json::json!({})
        }
    }
}
