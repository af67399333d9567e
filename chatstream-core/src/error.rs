use thiserror::Error;

/// Core error type for chatstream.
///
/// Only transport failures, protocol corruption and upstream error events
/// surface as errors. Cancellation is a normal outcome and never lands here.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transport failed ({}): {message}", fmt_status(.status))]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<u64> },

    #[error("upstream unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StreamError {
    pub(crate) fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transport {
            status,
            message: message.into(),
        }
    }

    /// Stable short name used for the `error.kind` trace attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Transport { .. } | Self::RateLimited { .. } | Self::Unavailable { .. } => {
                "transport"
            }
            Self::Protocol(_) => "protocol",
            Self::Upstream(_) => "upstream",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }

    /// True for failures of the underlying connection rather than its content.
    pub fn is_transport(&self) -> bool {
        self.kind() == "transport"
    }
}

fn fmt_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "no status".to_string(),
    }
}

/// Clip `s` to at most `max` bytes on a char boundary, marking the cut.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut t = s[..end].to_string();
    t.push_str("...");
    t
}

pub type CoreResult<T> = std::result::Result<T, StreamError>;
