//! The stream client: one request in, one `StreamResult` out.
//!
//! Contract:
//! - `on_update` is called synchronously, in wire order, once per event that
//!   changes what the caller should show. It is never batched.
//! - A terminator ends the stream immediately; lines after it, including
//!   ones already buffered from the same read, are discarded.
//! - Cancellation resolves with the text accumulated so far. Transport
//!   failures, corrupt payloads and upstream error events are errors.
//! - The transport body is dropped on every exit path.

use std::time::Instant;

use tracing::field::Empty;
use tracing::{debug, info, warn};
use tracing_futures::Instrument;

use crate::cancel::{CancellableReader, CancellationToken, Read};
use crate::config::Config;
use crate::error::CoreResult;
use crate::event::EventParser;
use crate::finish::FinishPolicy;
use crate::framer::LineFramer;
use crate::image::ImageArtifact;
use crate::model::{StopReason, StreamRequest, Usage};
use crate::state::{Step, StreamState, StreamUpdate};
use crate::telemetry::{self, keys::*, StreamTrace};
use crate::transport::{HttpTransport, StreamTransport};

/// How a successful stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The upstream sent its terminator.
    Terminated,
    /// The body closed without a terminator.
    EndOfStream,
    /// The caller's token fired first.
    Cancelled,
}

impl StreamOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Terminated => "terminated",
            Self::EndOfStream => "end_of_stream",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Final value of one stream. Created once and never touched again.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamResult {
    /// Accumulated text after the finish policy.
    pub text: String,
    pub outcome: StreamOutcome,
    pub stop_reason: Option<String>,
    pub usage: Option<Usage>,
    pub images: Vec<ImageArtifact>,
    pub events: u64,
}

impl StreamResult {
    pub fn is_cancelled(&self) -> bool {
        self.outcome == StreamOutcome::Cancelled
    }

    pub fn stop_kind(&self) -> Option<StopReason> {
        self.stop_reason.as_deref().map(StopReason::from_wire)
    }

}

/// Drives streams over a transport. Holds no per-stream state, so one client
/// can run any number of streams concurrently.
#[derive(Debug, Clone)]
pub struct StreamClient<T> {
    transport: T,
    parser: EventParser,
    finish: FinishPolicy,
}

impl StreamClient<HttpTransport> {
    /// HTTP client wired from config.
    pub fn http(cfg: &Config) -> CoreResult<Self> {
        Ok(Self::from_config(HttpTransport::new(&cfg.http)?, cfg))
    }
}

impl<T: StreamTransport> StreamClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            parser: EventParser::default(),
            finish: FinishPolicy::default(),
        }
    }

    pub fn from_config(transport: T, cfg: &Config) -> Self {
        Self {
            transport,
            parser: EventParser::new(cfg.protocol.marker.clone(), cfg.protocol.terminator.clone()),
            finish: cfg.output.finish,
        }
    }

    pub fn with_parser(mut self, parser: EventParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_finish(mut self, finish: FinishPolicy) -> Self {
        self.finish = finish;
        self
    }

    /// Run one request to completion, reporting progress through `on_update`.
    pub async fn start_stream<F>(
        &self,
        req: &StreamRequest,
        mut on_update: F,
        cancel: Option<CancellationToken>,
    ) -> CoreResult<StreamResult>
    where
        F: FnMut(&StreamUpdate<'_>),
    {
        let started = Instant::now();
        let span = tracing::info_span!(
            "chat.stream",
            turn.id = req.turn_id.as_deref().unwrap_or(""),
            req.id = req.request_id.as_deref().unwrap_or(""),
            stream.outcome = Empty,
            stream.events = Empty,
            finish.reason = Empty,
            tokens.prompt = Empty,
            tokens.completion = Empty,
            tokens.reasoning = Empty,
            latency.ms = Empty,
            error.kind = Empty,
            error.message = Empty,
        );

        let mut state = StreamState::new();
        let run = self
            .drive(req, &mut state, &mut on_update, cancel)
            .instrument(span.clone())
            .await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        span.record(KEY_STREAM_EVENTS, state.events());
        span.record(KEY_LATENCY_MS, latency_ms);
        if let Some(reason) = state.stop_reason() {
            span.record(KEY_FINISH_REASON, reason);
        }
        if let Some(u) = state.usage() {
            span.record(KEY_TOKENS_PROMPT, u.prompt_usage);
            span.record(KEY_TOKENS_COMPLETION, u.completion_usage);
            span.record(KEY_TOKENS_REASONING, u.reasoning_usage);
        }

        let trace = StreamTrace::new()
            .turn_id_opt(req.turn_id.as_deref())
            .request_id_opt(req.request_id.as_deref())
            .events(state.events())
            .text_len(state.accumulated_text().len())
            .images(state.images().len())
            .latency_ms(latency_ms)
            .usage_opt(state.usage())
            .finish_reason_opt(state.stop_reason());

        match run {
            Ok(outcome) => {
                span.record(KEY_STREAM_OUTCOME, outcome.as_str());
                telemetry::emit(trace.outcome(outcome.as_str()));
                let _enter = span.enter();
                info!(
                    outcome = outcome.as_str(),
                    events = state.events(),
                    chars = state.accumulated_text().len(),
                    "stream finished"
                );
                Ok(StreamResult {
                    text: self.finish.apply(state.accumulated_text()),
                    outcome,
                    stop_reason: state.stop_reason().map(str::to_string),
                    usage: state.usage(),
                    images: state.images().to_vec(),
                    events: state.events(),
                })
            }
            Err(err) => {
                span.record(KEY_STREAM_OUTCOME, "failed");
                span.record(KEY_ERROR_KIND, err.kind());
                span.record(KEY_ERROR_MESSAGE, err.to_string().as_str());
                telemetry::emit(trace.outcome("failed").error(&err));
                let _enter = span.enter();
                warn!(error = %err, kind = err.kind(), "stream failed");
                Err(err)
            }
        }
    }

    async fn drive<F>(
        &self,
        req: &StreamRequest,
        state: &mut StreamState,
        on_update: &mut F,
        cancel: Option<CancellationToken>,
    ) -> CoreResult<StreamOutcome>
    where
        F: FnMut(&StreamUpdate<'_>),
    {
        let body = match &cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => None,
                opened = self.transport.open(req) => Some(opened?),
            },
            None => Some(self.transport.open(req).await?),
        };
        let Some(body) = body else {
            info!("stream cancelled before it opened");
            return Ok(StreamOutcome::Cancelled);
        };

        let mut reader = CancellableReader::new(body, cancel);
        let mut framer = LineFramer::new();

        loop {
            match reader.next().await {
                Read::Item(Ok(chunk)) => {
                    let lines = framer.feed(&chunk);
                    if self.process_lines(lines, state, on_update)? {
                        reader.release();
                        return Ok(StreamOutcome::Terminated);
                    }
                }
                Read::Item(Err(err)) => return Err(err),
                Read::End => {
                    if let Some(tail) = framer.flush()
                        && self.process_lines(vec![tail], state, on_update)?
                    {
                        return Ok(StreamOutcome::Terminated);
                    }
                    state.finish_at_end();
                    return Ok(StreamOutcome::EndOfStream);
                }
                Read::Cancelled => {
                    info!(
                        chars = state.accumulated_text().len(),
                        pending = framer.pending_len(),
                        "stream cancelled"
                    );
                    state.finish_at_end();
                    return Ok(StreamOutcome::Cancelled);
                }
            }
        }
    }

    /// Parse and apply each line. Returns true once the terminator is seen;
    /// any lines left in `lines` at that point are dropped.
    fn process_lines<F>(
        &self,
        lines: Vec<String>,
        state: &mut StreamState,
        on_update: &mut F,
    ) -> CoreResult<bool>
    where
        F: FnMut(&StreamUpdate<'_>),
    {
        let total = lines.len();
        for (i, line) in lines.into_iter().enumerate() {
            let Some(event) = self.parser.parse(&line)? else {
                if !line.is_empty() {
                    debug!(line = %crate::error::truncate(&line, 80), "non-event line ignored");
                }
                continue;
            };
            match state.apply(event)? {
                Step::Quiet => {}
                Step::Update(update) => on_update(&update),
                Step::Finished(update) => {
                    on_update(&update);
                    let dropped = total - i - 1;
                    if dropped > 0 {
                        debug!(dropped, "lines after terminator discarded");
                    }
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
