use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::config::HttpCfg;
use crate::error::{truncate, CoreResult, StreamError};
use crate::model::StreamRequest;

/// Raw body chunks, in arrival order, with no alignment guarantees.
pub type ByteStream = Pin<Box<dyn futures_util::stream::Stream<Item = CoreResult<Bytes>> + Send>>;

/// Opens the byte stream for one request. Implementations only deliver
/// bytes; framing and parsing happen in the client.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, req: &StreamRequest) -> CoreResult<ByteStream>;
}

/// reqwest-backed transport: POSTs the request body as JSON and streams the
/// response body.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    inner: Client,
    user_agent: String,
}

impl HttpTransport {
    pub fn new(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_millis(cfg.connect_timeout_ms));
        if let Some(ms) = cfg.request_timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| StreamError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("chatstream/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    pub fn new_default() -> CoreResult<Self> {
        Self::new(&HttpCfg::default())
    }
}

#[async_trait]
impl StreamTransport for HttpTransport {
    async fn open(&self, req: &StreamRequest) -> CoreResult<ByteStream> {
        if req.url.trim().is_empty() {
            return Err(StreamError::Validation("request url is empty".into()));
        }

        let mut builder = self
            .inner
            .post(&req.url)
            .json(&req.body())
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/event-stream");

        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if let Some(rid) = &req.request_id {
            builder = builder.header("X-Request-Id", rid.as_str());
        }
        if let Some(tid) = &req.turn_id {
            builder = builder.header("X-Turn-Id", tid.as_str());
        }
        if let Some(ik) = &req.idempotency_key {
            builder = builder.header("Idempotency-Key", ik.as_str());
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_builder() {
                StreamError::Validation(format!("invalid request: {e}"))
            } else {
                StreamError::transport(e.status().map(|s| s.as_u16()), format!("request failed: {e}"))
            }
        })?;

        let status = resp.status();
        let headers = resp.headers().clone();
        if let Some(upstream_id) = extract_request_id(&headers) {
            debug!(upstream_request_id = %upstream_id, status = status.as_u16(), "stream opened");
        }
        if !status.is_success() {
            let ra = parse_retry_after(&headers);
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, ra, &body));
        }

        let body = resp.bytes_stream().map(move |chunk| {
            chunk.map_err(|e| StreamError::transport(Some(status.as_u16()), format!("body read failed: {e}")))
        });
        Ok(Box::pin(body))
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 5] = [
        "x-request-id",
        "request-id",
        "x-amzn-requestid",
        "x-amz-request-id",
        "x-cdn-request-id",
    ];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // HTTP-date forms are ignored.
    None
}

fn map_http_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> StreamError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => StreamError::RateLimited { retry_after },
        s if s.is_server_error() => StreamError::Unavailable {
            status: s.as_u16(),
            message: truncate(body, 300),
        },
        s => StreamError::transport(Some(s.as_u16()), truncate(body, 300)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Close,
    Hang,
    Fail,
}

/// Plays back pre-recorded body chunks. Used for offline replay of captured
/// wire dumps and for driving the client in tests.
#[derive(Debug, Clone)]
pub struct ReplayTransport {
    chunks: Vec<Bytes>,
    tail: Tail,
    fail_message: String,
    pace: Option<Duration>,
}

impl ReplayTransport {
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            tail: Tail::Close,
            fail_message: String::new(),
            pace: None,
        }
    }

    /// Split one wire dump into `chunk_size`-byte reads (0 means one read).
    pub fn from_wire(wire: impl Into<Bytes>, chunk_size: usize) -> Self {
        let wire: Bytes = wire.into();
        if chunk_size == 0 || wire.is_empty() {
            return Self::from_chunks([wire]);
        }
        let chunks = (0..wire.len())
            .step_by(chunk_size)
            .map(|start| wire.slice(start..(start + chunk_size).min(wire.len())));
        Self::from_chunks(chunks)
    }

    pub async fn from_file(path: impl AsRef<Path>, chunk_size: usize) -> CoreResult<Self> {
        let wire = tokio::fs::read(path).await?;
        Ok(Self::from_wire(wire, chunk_size))
    }

    /// After the last chunk, never finish (a stalled upstream).
    pub fn then_hang(mut self) -> Self {
        self.tail = Tail::Hang;
        self
    }

    /// After the last chunk, fail the read (a dropped connection).
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.tail = Tail::Fail;
        self.fail_message = message.into();
        self
    }

    /// Wait this long before each chunk, like a live upstream.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

#[async_trait]
impl StreamTransport for ReplayTransport {
    async fn open(&self, _req: &StreamRequest) -> CoreResult<ByteStream> {
        let pace = self.pace;
        let body = stream::iter(self.chunks.clone()).then(move |chunk| async move {
            if let Some(d) = pace {
                tokio::time::sleep(d).await;
            }
            Ok::<_, StreamError>(chunk)
        });
        Ok(match self.tail {
            Tail::Close => body.boxed(),
            Tail::Hang => body.chain(stream::pending()).boxed(),
            Tail::Fail => {
                let err = StreamError::transport(None, self.fail_message.clone());
                body.chain(stream::once(async move { Err(err) })).boxed()
            }
        })
    }
}
