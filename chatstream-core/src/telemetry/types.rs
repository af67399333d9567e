use serde::{Deserialize, Serialize};

/// One record per finished stream, whatever the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StreamTrace {
    /// Caller-supplied correlation id for the chat turn.
    pub turn_id: Option<String>,

    /// Caller's request id, if any.
    pub request_id: Option<String>,

    /// "terminated", "end_of_stream", "cancelled" or "failed".
    pub outcome: Option<String>,

    /// Events applied to the stream state.
    pub events: u64,

    /// Length in bytes of the accumulated text at the end.
    pub text_len: usize,

    /// Images fully received.
    pub images: usize,

    pub latency_ms: Option<u64>,

    pub tokens_prompt: Option<u64>,
    pub tokens_completion: Option<u64>,
    pub tokens_reasoning: Option<u64>,

    /// Wire stop reason, verbatim.
    pub finish_reason: Option<String>,

    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl StreamTrace {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn turn_id_opt(mut self, tid: Option<&str>) -> Self {
        self.turn_id = tid.map(|s| s.to_string());
        self
    }
    pub fn request_id_opt(mut self, rid: Option<&str>) -> Self {
        self.request_id = rid.map(|s| s.to_string());
        self
    }
    pub fn outcome(mut self, outcome: &str) -> Self {
        self.outcome = Some(outcome.to_string());
        self
    }
    pub fn events(mut self, n: u64) -> Self {
        self.events = n;
        self
    }
    pub fn text_len(mut self, n: usize) -> Self {
        self.text_len = n;
        self
    }
    pub fn images(mut self, n: usize) -> Self {
        self.images = n;
        self
    }
    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }
    pub fn usage_opt(mut self, usage: Option<crate::model::Usage>) -> Self {
        if let Some(u) = usage {
            self.tokens_prompt = Some(u.prompt_usage);
            self.tokens_completion = Some(u.completion_usage);
            self.tokens_reasoning = Some(u.reasoning_usage);
        }
        self
    }
    pub fn finish_reason_opt(mut self, reason: Option<&str>) -> Self {
        self.finish_reason = reason.map(|s| s.to_string());
        self
    }
    pub fn error(mut self, err: &crate::error::StreamError) -> Self {
        self.error_kind = Some(err.kind().to_string());
        self.error_message = Some(err.to_string());
        self
    }
}
