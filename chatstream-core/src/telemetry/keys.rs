/// Span/Log attribute keys for stream runs.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const KEY_TURN_ID: &str = "turn.id";
pub const KEY_REQUEST_ID: &str = "req.id";

pub const KEY_STREAM_OUTCOME: &str = "stream.outcome";
pub const KEY_STREAM_EVENTS: &str = "stream.events";
pub const KEY_LATENCY_MS: &str = "latency.ms";
pub const KEY_FINISH_REASON: &str = "finish.reason";
pub const KEY_TOKENS_PROMPT: &str = "tokens.prompt";
pub const KEY_TOKENS_COMPLETION: &str = "tokens.completion";
pub const KEY_TOKENS_REASONING: &str = "tokens.reasoning";

/// Error-related (if applicable)
pub const KEY_ERROR_KIND: &str = "error.kind";
pub const KEY_ERROR_MESSAGE: &str = "error.message";
