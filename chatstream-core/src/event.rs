//! Wire events and the line parser.
//!
//! Contract:
//! - Only lines starting with the event marker (default `data:`) are read;
//!   comments (`: ping`), blank separators and anything else yield nothing.
//! - A marker line with an empty remainder is a keep-alive and yields nothing.
//! - A non-empty remainder must be a JSON object of a known shape. Anything
//!   else, including an unknown `type` tag, is a fatal protocol error.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{truncate, CoreResult, StreamError};
use crate::model::Usage;

pub const DEFAULT_MARKER: &str = "data:";
pub const DEFAULT_TERMINATOR: &str = "[DONE]";

/// One decoded wire event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Assistant text to append.
    TextDelta(String),
    ToolCallStart {
        tool: String,
        id: Option<String>,
    },
    /// Tool execution status. `detail` is the tool input, or the
    /// tool-specific fields (`query`, `url`, ...) when no input is sent.
    ToolCallProgress {
        tool: String,
        detail: Value,
    },
    /// The tool finished and reported its result. The call stays active
    /// until its end event.
    ToolCallResult {
        tool: String,
        result: Option<Value>,
    },
    ToolCallEnd {
        tool: String,
        input: Option<Value>,
    },
    ImageStart {
        mime_type: String,
    },
    /// One base64 fragment of the open image.
    ImageChunk(String),
    ImageEnd,
    StopInfo(String),
    UsageInfo(Usage),
    /// Logical end of stream; nothing after it is read.
    Terminator,
    /// Upstream failure, message verbatim.
    Error(String),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextDelta(_) => "text-delta",
            Self::ToolCallStart { .. } => "tool-call-start",
            Self::ToolCallProgress { .. } => "tool-call-progress",
            Self::ToolCallResult { .. } => "tool-call-result",
            Self::ToolCallEnd { .. } => "tool-call-end",
            Self::ImageStart { .. } => "image-start",
            Self::ImageChunk(_) => "image-chunk",
            Self::ImageEnd => "image-end",
            Self::StopInfo(_) => "stop-info",
            Self::UsageInfo(_) => "usage-info",
            Self::Terminator => "terminator",
            Self::Error(_) => "error",
        }
    }
}

// ---- Wire shapes ----

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TaggedPayload {
    ToolCallStart {
        tool: String,
        #[serde(default)]
        id: Option<String>,
    },
    ToolExecution {
        tool: String,
        #[serde(default)]
        input: Option<Value>,
        #[serde(flatten)]
        rest: Map<String, Value>,
    },
    ToolExecutionComplete {
        tool: String,
        #[serde(default)]
        result: Option<Value>,
    },
    ToolCallEnd {
        tool: String,
        #[serde(default)]
        input: Option<Value>,
    },
    ImageStart {
        mime_type: String,
    },
    ImageChunk {
        chunk: String,
    },
    ImageEnd,
    Error {
        message: String,
    },
}

// Required (non-Option) fields keep untagged matching from accepting `{}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum PlainPayload {
    Text { text: String },
    Stop { stop_reason: String },
    Usage { usage: Usage },
    Error { error: Value },
}

/// Parses framed lines into events.
#[derive(Debug, Clone)]
pub struct EventParser {
    marker: String,
    terminator: String,
}

impl Default for EventParser {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER, DEFAULT_TERMINATOR)
    }
}

impl EventParser {
    pub fn new(marker: impl Into<String>, terminator: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            terminator: terminator.into(),
        }
    }

    pub fn parse(&self, line: &str) -> CoreResult<Option<Event>> {
        let Some(rest) = line.strip_prefix(self.marker.as_str()) else {
            return Ok(None);
        };
        let rest = rest.trim();
        if rest.is_empty() {
            return Ok(None);
        }
        // Bare terminator, as sent by OpenAI-style backends.
        if rest == self.terminator {
            return Ok(Some(Event::Terminator));
        }
        let value: Value = serde_json::from_str(rest).map_err(|e| {
            StreamError::Protocol(format!(
                "malformed payload ({e}): {}",
                truncate(rest, 120)
            ))
        })?;
        self.decode(value).map(Some)
    }

    fn decode(&self, value: Value) -> CoreResult<Event> {
        let tagged = value.as_object().is_some_and(|o| o.contains_key("type"));
        if tagged {
            let snippet = truncate(&value.to_string(), 120);
            let payload: TaggedPayload = serde_json::from_value(value).map_err(|e| {
                StreamError::Protocol(format!("unrecognized tagged payload ({e}): {snippet}"))
            })?;
            return Ok(match payload {
                TaggedPayload::ToolCallStart { tool, id } => Event::ToolCallStart { tool, id },
                TaggedPayload::ToolExecution { tool, input, rest } => Event::ToolCallProgress {
                    tool,
                    detail: input.unwrap_or(Value::Object(rest)),
                },
                TaggedPayload::ToolExecutionComplete { tool, result } => {
                    Event::ToolCallResult { tool, result }
                }
                TaggedPayload::ToolCallEnd { tool, input } => Event::ToolCallEnd { tool, input },
                TaggedPayload::ImageStart { mime_type } => Event::ImageStart { mime_type },
                TaggedPayload::ImageChunk { chunk } => Event::ImageChunk(chunk),
                TaggedPayload::ImageEnd => Event::ImageEnd,
                TaggedPayload::Error { message } => Event::Error(message),
            });
        }

        let snippet = truncate(&value.to_string(), 120);
        let payload: PlainPayload = serde_json::from_value(value)
            .map_err(|_| StreamError::Protocol(format!("unrecognized payload: {snippet}")))?;
        Ok(match payload {
            PlainPayload::Text { text } if text == self.terminator => Event::Terminator,
            PlainPayload::Text { text } => Event::TextDelta(text),
            PlainPayload::Stop { stop_reason } => Event::StopInfo(stop_reason),
            PlainPayload::Usage { usage } => Event::UsageInfo(usage),
            PlainPayload::Error { error } => Event::Error(match error {
                Value::String(s) => s,
                other => other.to_string(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(line: &str) -> CoreResult<Option<Event>> {
        EventParser::default().parse(line)
    }

    #[test]
    fn non_marker_and_keepalive_lines_are_ignored() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse(": ping").unwrap(), None);
        assert_eq!(parse("event: message").unwrap(), None);
        assert_eq!(parse("data:").unwrap(), None);
        assert_eq!(parse("data:    ").unwrap(), None);
    }

    #[test]
    fn maps_every_wire_kind() {
        let cases = vec![
            (r#"data: {"text": "Hel"}"#, Event::TextDelta("Hel".into())),
            (r#"data: {"text": "[DONE]"}"#, Event::Terminator),
            (
                r#"data: {"type": "tool_call_start", "tool": "web_search"}"#,
                Event::ToolCallStart { tool: "web_search".into(), id: None },
            ),
            (
                r#"data: {"type": "tool_execution", "tool": "web_search", "input": {"query": "rust"}}"#,
                Event::ToolCallProgress { tool: "web_search".into(), detail: json!({"query": "rust"}) },
            ),
            (
                r#"data: {"type": "tool_call_end", "tool": "web_search"}"#,
                Event::ToolCallEnd { tool: "web_search".into(), input: None },
            ),
            (
                r#"data: {"type": "image_start", "mime_type": "image/png"}"#,
                Event::ImageStart { mime_type: "image/png".into() },
            ),
            (r#"data: {"type": "image_chunk", "chunk": "AAAA"}"#, Event::ImageChunk("AAAA".into())),
            (r#"data: {"type": "image_end"}"#, Event::ImageEnd),
            (r#"data: {"stop_reason": "end_turn"}"#, Event::StopInfo("end_turn".into())),
            (
                r#"data: {"usage": {"prompt_usage": 3, "completion_usage": 5, "reasoning_usage": 1}}"#,
                Event::UsageInfo(Usage { prompt_usage: 3, completion_usage: 5, reasoning_usage: 1 }),
            ),
            (r#"data: {"error": "overloaded"}"#, Event::Error("overloaded".into())),
        ];
        for (line, expected) in cases {
            assert_eq!(parse(line).unwrap(), Some(expected), "line: {line}");
        }
    }

    #[test]
    fn tool_execution_without_input_keeps_tool_fields() {
        let ev = parse(r#"data: {"type":"tool_execution","tool":"web_browsing","url":"https://x.dev"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            ev,
            Event::ToolCallProgress {
                tool: "web_browsing".into(),
                detail: json!({"url": "https://x.dev"}),
            }
        );
    }

    #[test]
    fn tool_execution_complete_carries_the_result() {
        let ev = parse(r#"data: {"type":"tool_execution_complete","tool":"web_search","result":"3 hits"}"#)
            .unwrap();
        assert_eq!(
            ev,
            Some(Event::ToolCallResult { tool: "web_search".into(), result: Some(json!("3 hits")) })
        );
        let bare = parse(r#"data: {"type":"tool_execution_complete","tool":"web_search"}"#).unwrap();
        assert_eq!(bare, Some(Event::ToolCallResult { tool: "web_search".into(), result: None }));
    }

    #[test]
    fn null_usage_counters_read_as_zero() {
        let ev = parse(
            r#"data: {"usage": {"completion_usage": null, "prompt_usage": 5, "reasoning_usage": 0}}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            Some(Event::UsageInfo(Usage { prompt_usage: 5, completion_usage: 0, reasoning_usage: 0 }))
        );
        let partial = parse(r#"data: {"usage": {"prompt_usage": null}}"#).unwrap();
        assert_eq!(partial, Some(Event::UsageInfo(Usage::default())));
    }

    #[test]
    fn tool_ids_and_final_input_are_kept() {
        let start = parse(r#"data: {"type":"tool_call_start","tool":"t","id":"toolu_1"}"#).unwrap();
        assert_eq!(start, Some(Event::ToolCallStart { tool: "t".into(), id: Some("toolu_1".into()) }));
        let end = parse(r#"data: {"type":"tool_call_end","tool":"t","input":{}}"#).unwrap();
        assert_eq!(end, Some(Event::ToolCallEnd { tool: "t".into(), input: Some(json!({})) }));
    }

    #[test]
    fn typed_error_payload_is_an_error_event() {
        let ev = parse(r#"data: {"type":"error","message":"Invalid arguments"}"#).unwrap();
        assert_eq!(ev, Some(Event::Error("Invalid arguments".into())));
        let obj = parse(r#"data: {"error": {"code": 500}}"#).unwrap();
        assert_eq!(obj, Some(Event::Error(r#"{"code":500}"#.into())));
    }

    #[test]
    fn bare_terminator_is_accepted() {
        assert_eq!(parse("data: [DONE]").unwrap(), Some(Event::Terminator));
    }

    #[test]
    fn malformed_payload_is_fatal() {
        let err = parse(r#"data: {"text": "unterminated"#).unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)));
    }

    #[test]
    fn unknown_shapes_fail_loudly() {
        let unknown_tag = parse(r#"data: {"type": "video_start", "text": "x"}"#).unwrap_err();
        assert!(matches!(unknown_tag, StreamError::Protocol(m) if m.contains("tagged")));
        assert!(matches!(parse("data: {}").unwrap_err(), StreamError::Protocol(_)));
        assert!(matches!(parse("data: 42").unwrap_err(), StreamError::Protocol(_)));
    }

    #[test]
    fn custom_marker_and_terminator() {
        let p = EventParser::new("event-data:", "<eos>");
        assert_eq!(p.parse(r#"data: {"text":"a"}"#).unwrap(), None);
        assert_eq!(p.parse(r#"event-data: {"text":"<eos>"}"#).unwrap(), Some(Event::Terminator));
        assert_eq!(
            p.parse(r#"event-data: {"text":"[DONE]"}"#).unwrap(),
            Some(Event::TextDelta("[DONE]".into()))
        );
    }
}
