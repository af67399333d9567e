use std::collections::BTreeMap;
use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::event::{DEFAULT_MARKER, DEFAULT_TERMINATOR};
use crate::finish::FinishPolicy;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct EndpointCfg {
    /// Chat endpoint that answers with an event stream.
    #[serde(default)]
    pub url: String,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds. None (the default) lets a
    /// stream run as long as the upstream keeps it open.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: None,
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProtocolCfg {
    #[serde(default = "default_marker")]
    pub marker: String,
    #[serde(default = "default_terminator")]
    pub terminator: String,
}

impl Default for ProtocolCfg {
    fn default() -> Self {
        Self {
            marker: default_marker(),
            terminator: default_terminator(),
        }
    }
}

fn default_marker() -> String {
    DEFAULT_MARKER.to_string()
}
fn default_terminator() -> String {
    DEFAULT_TERMINATOR.to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct OutputCfg {
    #[serde(default)]
    pub finish: FinishPolicy,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LogCfg {
    /// `tracing_subscriber::EnvFilter` directive used when RUST_LOG is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogCfg {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub endpoint: EndpointCfg,
    /// HTTP client configuration (timeouts, pooling). Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub protocol: ProtocolCfg,
    #[serde(default)]
    pub output: OutputCfg,
    #[serde(default)]
    pub log: LogCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::StreamError::from)?;
        let s =
            std::str::from_utf8(&bytes).map_err(|e| crate::error::StreamError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::StreamError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::StreamError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::StreamError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::StreamError::Other(e.into()))
                })?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> crate::error::CoreResult<()> {
        if self.protocol.marker.is_empty() {
            return Err(crate::error::StreamError::Validation(
                "protocol.marker must not be empty".into(),
            ));
        }
        if self.protocol.terminator.trim().is_empty() {
            return Err(crate::error::StreamError::Validation(
                "protocol.terminator must not be blank".into(),
            ));
        }
        Ok(())
    }
}
