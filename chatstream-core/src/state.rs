//! Stream state and the event-driven transitions over it.
//!
//! The state demultiplexes text, tool-call status and image data carried on
//! one line channel. `accumulated_text` is append-only for the life of a
//! stream, at most one image is open at a time, and nothing is accepted once
//! a terminal event has been applied.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{CoreResult, StreamError};
use crate::event::Event;
use crate::image::{ImageArtifact, ImageBuffer};
use crate::model::Usage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolPhase {
    Start,
    Progress,
    End,
}

/// Lifecycle of the most recent tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub tool: String,
    pub id: Option<String>,
    pub phase: ToolPhase,
    pub detail: Option<Value>,
}

/// What the caller is told after a user-visible change.
///
/// `indicator_only` marks tool activity: the UI should show a status
/// indicator, not treat anything here as new assistant text.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamUpdate<'a> {
    pub text: &'a str,
    pub tool_call: Option<ToolCall>,
    pub indicator_only: bool,
    pub image: Option<&'a ImageArtifact>,
}

impl StreamUpdate<'_> {
    pub fn snapshot(&self) -> UpdateSnapshot {
        UpdateSnapshot {
            text: self.text.to_string(),
            tool_call: self.tool_call.clone(),
            indicator_only: self.indicator_only,
            image: self.image.cloned(),
        }
    }
}

/// Owned copy of a `StreamUpdate`, for callers that keep updates around.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSnapshot {
    pub text: String,
    pub tool_call: Option<ToolCall>,
    pub indicator_only: bool,
    pub image: Option<ImageArtifact>,
}

/// Result of applying one event.
#[derive(Debug, PartialEq)]
pub enum Step<'a> {
    /// Recorded, nothing for the caller to see.
    Quiet,
    Update(StreamUpdate<'a>),
    /// Terminator applied; this is the last update of the stream.
    Finished(StreamUpdate<'a>),
}

#[derive(Debug, Default)]
pub struct StreamState {
    accumulated_text: String,
    active_tool_call: Option<ToolCall>,
    active_image: Option<ImageBuffer>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
    images: Vec<ImageArtifact>,
    events: u64,
    finished: bool,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    pub fn active_tool_call(&self) -> Option<&ToolCall> {
        self.active_tool_call.as_ref()
    }

    pub fn active_image(&self) -> Option<&ImageBuffer> {
        self.active_image.as_ref()
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    /// Completed images, in the order they closed.
    pub fn images(&self) -> &[ImageArtifact] {
        &self.images
    }

    /// Number of events applied (events after the end are not counted).
    pub fn events(&self) -> u64 {
        self.events
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn apply(&mut self, event: Event) -> CoreResult<Step<'_>> {
        if self.finished {
            debug!(kind = event.kind(), "event after end of stream ignored");
            return Ok(Step::Quiet);
        }
        self.events += 1;

        match event {
            Event::TextDelta(delta) => {
                self.accumulated_text.push_str(&delta);
                Ok(Step::Update(self.text_update()))
            }
            Event::ToolCallStart { tool, id } => {
                if let Some(prev) = &self.active_tool_call {
                    debug!(previous = %prev.tool, next = %tool, "tool call replaced before its end");
                }
                let call = ToolCall {
                    tool,
                    id,
                    phase: ToolPhase::Start,
                    detail: None,
                };
                self.active_tool_call = Some(call.clone());
                Ok(Step::Update(self.indicator(call)))
            }
            Event::ToolCallProgress { tool, detail } => match self.active_tool_call.as_mut() {
                Some(call) => {
                    call.phase = ToolPhase::Progress;
                    call.detail = Some(detail);
                    let call = call.clone();
                    Ok(Step::Update(self.indicator(call)))
                }
                None => {
                    debug!(%tool, "tool progress without an active call ignored");
                    Ok(Step::Quiet)
                }
            },
            Event::ToolCallResult { tool, result } => match self.active_tool_call.as_mut() {
                Some(call) => {
                    if result.is_some() {
                        call.detail = result;
                    }
                    let call = call.clone();
                    Ok(Step::Update(self.indicator(call)))
                }
                None => {
                    debug!(%tool, "tool result without an active call ignored");
                    Ok(Step::Quiet)
                }
            },
            Event::ToolCallEnd { tool, input } => match self.active_tool_call.take() {
                Some(mut call) => {
                    call.phase = ToolPhase::End;
                    if input.is_some() {
                        call.detail = input;
                    }
                    Ok(Step::Update(self.indicator(call)))
                }
                None => {
                    debug!(%tool, "tool end without a start ignored");
                    Ok(Step::Quiet)
                }
            },
            Event::ImageStart { mime_type } => {
                if let Some(open) = &self.active_image {
                    let msg = format!(
                        "image_start ({mime_type}) while a {} image is still open",
                        open.mime_type()
                    );
                    self.finished = true;
                    return Err(StreamError::Protocol(msg));
                }
                self.active_image = Some(ImageBuffer::new(mime_type));
                Ok(Step::Quiet)
            }
            Event::ImageChunk(chunk) => {
                match self.active_image.as_mut() {
                    Some(buf) => buf.push(chunk),
                    None => debug!(len = chunk.len(), "image chunk without an open image ignored"),
                }
                Ok(Step::Quiet)
            }
            Event::ImageEnd => {
                let Some(buf) = self.active_image.take() else {
                    debug!("image end without an open image ignored");
                    return Ok(Step::Quiet);
                };
                let artifact = match buf.finish() {
                    Ok(a) => a,
                    Err(e) => {
                        self.finished = true;
                        return Err(e);
                    }
                };
                debug!(mime_type = %artifact.mime_type, bytes = artifact.data.len(), "image assembled");
                self.images.push(artifact);
                Ok(Step::Update(StreamUpdate {
                    text: &self.accumulated_text,
                    tool_call: None,
                    indicator_only: false,
                    image: self.images.last(),
                }))
            }
            Event::StopInfo(reason) => {
                self.stop_reason = Some(reason);
                Ok(Step::Quiet)
            }
            Event::UsageInfo(usage) => {
                info!(
                    prompt = usage.prompt_usage,
                    completion = usage.completion_usage,
                    reasoning = usage.reasoning_usage,
                    "usage reported"
                );
                self.usage = Some(usage);
                Ok(Step::Quiet)
            }
            Event::Terminator => {
                self.finished = true;
                Ok(Step::Finished(self.text_update()))
            }
            Event::Error(message) => {
                self.finished = true;
                Err(StreamError::Upstream(message))
            }
        }
    }

    /// Close out a stream that ended without a terminator (or was cancelled).
    /// An unclosed image and an unfinished tool call are dropped.
    pub fn finish_at_end(&mut self) {
        if let Some(buf) = self.active_image.take() {
            warn!(
                mime_type = %buf.mime_type(),
                chunks = buf.chunk_count(),
                "stream ended with an unclosed image; discarded"
            );
        }
        if let Some(call) = self.active_tool_call.take() {
            warn!(tool = %call.tool, "stream ended during a tool call; reset");
        }
        self.finished = true;
    }

    fn text_update(&self) -> StreamUpdate<'_> {
        StreamUpdate {
            text: &self.accumulated_text,
            tool_call: None,
            indicator_only: false,
            image: None,
        }
    }

    fn indicator(&self, call: ToolCall) -> StreamUpdate<'_> {
        StreamUpdate {
            text: &self.accumulated_text,
            tool_call: Some(call),
            indicator_only: true,
            image: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use proptest::prelude::*;
    use serde_json::json;

    fn snap(step: Step<'_>) -> Option<UpdateSnapshot> {
        match step {
            Step::Quiet => None,
            Step::Update(u) | Step::Finished(u) => Some(u.snapshot()),
        }
    }

    #[test]
    fn text_deltas_append_and_update() {
        let mut st = StreamState::new();
        let u = snap(st.apply(Event::TextDelta("Hel".into())).unwrap()).unwrap();
        assert_eq!(u.text, "Hel");
        assert!(!u.indicator_only);
        let u = snap(st.apply(Event::TextDelta("lo".into())).unwrap()).unwrap();
        assert_eq!(u.text, "Hello");
        assert_eq!(st.accumulated_text(), "Hello");
        assert_eq!(st.events(), 2);
    }

    #[test]
    fn tool_lifecycle_is_indicator_only() {
        let mut st = StreamState::new();
        st.apply(Event::TextDelta("Looking".into())).unwrap();

        let start = snap(st.apply(Event::ToolCallStart { tool: "web_search".into(), id: None }).unwrap())
            .unwrap();
        assert!(start.indicator_only);
        assert_eq!(start.text, "Looking");
        assert_eq!(start.tool_call.as_ref().unwrap().phase, ToolPhase::Start);

        let prog = snap(
            st.apply(Event::ToolCallProgress { tool: "web_search".into(), detail: json!({"query": "rust"}) })
                .unwrap(),
        )
        .unwrap();
        let call = prog.tool_call.unwrap();
        assert_eq!(call.phase, ToolPhase::Progress);
        assert_eq!(call.detail, Some(json!({"query": "rust"})));
        assert_eq!(st.active_tool_call().unwrap().phase, ToolPhase::Progress);

        let end = snap(st.apply(Event::ToolCallEnd { tool: "web_search".into(), input: None }).unwrap())
            .unwrap();
        assert!(end.indicator_only);
        let call = end.tool_call.unwrap();
        assert_eq!(call.phase, ToolPhase::End);
        assert_eq!(call.detail, Some(json!({"query": "rust"})));
        assert!(st.active_tool_call().is_none());
        assert_eq!(st.accumulated_text(), "Looking");
    }

    #[test]
    fn orphan_tool_events_are_no_ops() {
        let mut st = StreamState::new();
        assert_eq!(st.apply(Event::ToolCallEnd { tool: "t".into(), input: None }).unwrap(), Step::Quiet);
        assert_eq!(
            st.apply(Event::ToolCallProgress { tool: "t".into(), detail: json!({}) }).unwrap(),
            Step::Quiet
        );
        assert!(st.active_tool_call().is_none());
    }

    #[test]
    fn tool_result_updates_detail_and_keeps_the_phase() {
        let mut st = StreamState::new();
        st.apply(Event::ToolCallStart { tool: "web_search".into(), id: Some("toolu_1".into()) }).unwrap();
        st.apply(Event::ToolCallProgress { tool: "web_search".into(), detail: json!({"query": "rust"}) })
            .unwrap();
        let u = snap(
            st.apply(Event::ToolCallResult { tool: "web_search".into(), result: Some(json!("3 hits")) })
                .unwrap(),
        )
        .unwrap();
        assert!(u.indicator_only);
        let call = u.tool_call.unwrap();
        assert_eq!(call.phase, ToolPhase::Progress);
        assert_eq!(call.detail, Some(json!("3 hits")));
        assert_eq!(st.active_tool_call().map(|c| c.tool.as_str()), Some("web_search"));

        st.apply(Event::ToolCallEnd { tool: "web_search".into(), input: None }).unwrap();
        assert!(st.active_tool_call().is_none());
        assert_eq!(
            st.apply(Event::ToolCallResult { tool: "web_search".into(), result: None }).unwrap(),
            Step::Quiet
        );
    }

    #[test]
    fn second_tool_start_replaces_the_first() {
        let mut st = StreamState::new();
        st.apply(Event::ToolCallStart { tool: "a".into(), id: None }).unwrap();
        st.apply(Event::ToolCallStart { tool: "b".into(), id: Some("2".into()) }).unwrap();
        let call = st.active_tool_call().unwrap();
        assert_eq!(call.tool, "b");
        assert_eq!(call.id.as_deref(), Some("2"));
    }

    #[test]
    fn image_is_emitted_only_at_end() {
        let mut st = StreamState::new();
        st.apply(Event::TextDelta("Here:".into())).unwrap();
        assert_eq!(st.apply(Event::ImageStart { mime_type: "image/png".into() }).unwrap(), Step::Quiet);
        assert_eq!(st.apply(Event::ImageChunk("AAAA".into())).unwrap(), Step::Quiet);
        assert_eq!(st.apply(Event::ImageChunk("BBBB".into())).unwrap(), Step::Quiet);
        assert_eq!(st.active_image().unwrap().chunk_count(), 2);

        let u = snap(st.apply(Event::ImageEnd).unwrap()).unwrap();
        let img = u.image.unwrap();
        assert_eq!(img.mime_type, "image/png");
        assert_eq!(img.data, STANDARD.decode("AAAABBBB").unwrap());
        assert_eq!(u.text, "Here:");
        assert!(!u.indicator_only);
        assert!(st.active_image().is_none());
        assert_eq!(st.images().len(), 1);
    }

    #[test]
    fn second_image_start_is_a_protocol_error() {
        let mut st = StreamState::new();
        st.apply(Event::ImageStart { mime_type: "image/png".into() }).unwrap();
        let err = st.apply(Event::ImageStart { mime_type: "image/jpeg".into() }).unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)));
        assert!(st.is_finished());
    }

    #[test]
    fn image_events_without_open_image_are_ignored() {
        let mut st = StreamState::new();
        assert_eq!(st.apply(Event::ImageChunk("AAAA".into())).unwrap(), Step::Quiet);
        assert_eq!(st.apply(Event::ImageEnd).unwrap(), Step::Quiet);
        assert!(st.images().is_empty());
    }

    #[test]
    fn metadata_is_recorded_silently() {
        let mut st = StreamState::new();
        assert_eq!(st.apply(Event::StopInfo("end_turn".into())).unwrap(), Step::Quiet);
        let usage = Usage { prompt_usage: 1, completion_usage: 2, reasoning_usage: 0 };
        assert_eq!(st.apply(Event::UsageInfo(usage)).unwrap(), Step::Quiet);
        assert_eq!(st.stop_reason(), Some("end_turn"));
        assert_eq!(st.usage(), Some(usage));
    }

    #[test]
    fn terminator_finishes_and_blocks_later_events() {
        let mut st = StreamState::new();
        st.apply(Event::TextDelta("done".into())).unwrap();
        match st.apply(Event::Terminator).unwrap() {
            Step::Finished(u) => assert_eq!(u.text, "done"),
            other => panic!("expected Finished, got {other:?}"),
        }
        assert_eq!(st.apply(Event::TextDelta("ignored".into())).unwrap(), Step::Quiet);
        assert_eq!(st.accumulated_text(), "done");
        assert_eq!(st.events(), 2);
    }

    #[test]
    fn error_event_is_fatal_and_verbatim() {
        let mut st = StreamState::new();
        st.apply(Event::TextDelta("partial".into())).unwrap();
        let err = st.apply(Event::Error("rate limit exceeded".into())).unwrap_err();
        assert!(matches!(err, StreamError::Upstream(ref m) if m == "rate limit exceeded"));
        assert!(st.is_finished());
        assert_eq!(st.accumulated_text(), "partial");
    }

    #[test]
    fn finish_at_end_discards_open_work() {
        let mut st = StreamState::new();
        st.apply(Event::ToolCallStart { tool: "t".into(), id: None }).unwrap();
        st.apply(Event::ImageStart { mime_type: "image/png".into() }).unwrap();
        st.apply(Event::ImageChunk("AAAA".into())).unwrap();
        st.finish_at_end();
        assert!(st.active_image().is_none());
        assert!(st.active_tool_call().is_none());
        assert!(st.images().is_empty());
        assert!(st.is_finished());
    }

    fn arb_event() -> impl Strategy<Value = Event> {
        prop_oneof![
            4 => ".{0,8}".prop_map(Event::TextDelta),
            1 => "[a-z]{1,6}".prop_map(|t| Event::ToolCallStart { tool: t, id: None }),
            1 => "[a-z]{1,6}".prop_map(|t| Event::ToolCallProgress { tool: t, detail: json!({}) }),
            1 => "[a-z]{1,6}".prop_map(|t| Event::ToolCallEnd { tool: t, input: None }),
            1 => "[a-z]{1,6}".prop_map(|t| Event::ToolCallResult { tool: t, result: None }),
            1 => "[a-z_]{1,10}".prop_map(Event::StopInfo),
            1 => Just(Event::UsageInfo(Usage::default())),
            1 => Just(Event::ImageChunk("AAAA".into())),
            1 => Just(Event::ImageEnd),
        ]
    }

    proptest! {
        #[test]
        fn accumulated_text_never_shrinks(events in prop::collection::vec(arb_event(), 0..64)) {
            let mut st = StreamState::new();
            let mut last = 0;
            for ev in events {
                st.apply(ev).unwrap();
                let len = st.accumulated_text().len();
                prop_assert!(len >= last);
                last = len;
            }
        }
    }
}
