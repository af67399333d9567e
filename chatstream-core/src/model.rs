use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Normalized stop reason. The wire value is kept verbatim on the result;
/// this is only a coarse classification of it.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    Length,
    ToolUse,
    EndTurn,
    ContentFilter,
    Other,
}

impl StopReason {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "end_turn" => Self::EndTurn,
            "stop" | "stop_sequence" => Self::Stop,
            "length" | "max_tokens" => Self::Length,
            "tool_use" | "tool_calls" => Self::ToolUse,
            "content_filter" | "refusal" => Self::ContentFilter,
            _ => Self::Other,
        }
    }
}

/// Token usage as reported by a `usage` payload. Missing or null counters
/// are zero.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    #[serde(default, deserialize_with = "null_as_zero")]
    pub prompt_usage: u64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub completion_usage: u64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub reasoning_usage: u64,
}

fn null_as_zero<'de, D>(de: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(de)?.unwrap_or(0))
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.prompt_usage + self.completion_usage
    }
}

/// Everything needed to open one response stream. The handler never looks
/// inside `messages` or `params`; they are forwarded as the request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamRequest {
    pub url: String,
    pub messages: Vec<ChatMessage>,
    /// Vendor/model parameters, flattened into the body next to `messages`.
    pub params: Map<String, Value>,
    pub headers: Vec<(String, String)>,
    pub request_id: Option<String>,
    pub turn_id: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct RequestBody<'a> {
    messages: &'a [ChatMessage],
    #[serde(flatten)]
    params: &'a Map<String, Value>,
}

impl StreamRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn message(mut self, msg: ChatMessage) -> Self {
        self.messages.push(msg);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn turn_id(mut self, id: impl Into<String>) -> Self {
        self.turn_id = Some(id.into());
        self
    }

    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub(crate) fn body(&self) -> RequestBody<'_> {
        RequestBody {
            messages: &self.messages,
            params: &self.params,
        }
    }
}
