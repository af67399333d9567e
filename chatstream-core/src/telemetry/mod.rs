//! Per-stream telemetry records and the optional process-wide sink.
//! Nothing is emitted until `set_telemetry_sink` is called.

pub mod keys;
pub mod types;
#[cfg(test)]
pub mod test_span;

pub use keys::*;
pub use types::*;

use std::sync::Arc;

use once_cell::sync::OnceCell;

/// Receives one `StreamTrace` when a stream resolves or fails.
///
/// Called on whatever task finished the stream, after the final update
/// has been delivered. Must not panic.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record(&self, trace: StreamTrace);
}

static TELEMETRY_SINK: OnceCell<Arc<dyn TelemetrySink>> = OnceCell::new();

// Tests share one process-wide sink; only threads that opt in emit.
#[cfg(test)]
thread_local! {
    static TEST_CAPTURE: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Install the sink. Only the first call wins; later calls return `false`.
pub fn set_telemetry_sink(sink: Arc<dyn TelemetrySink>) -> bool {
    TELEMETRY_SINK.set(sink).is_ok()
}

pub(crate) fn emit(trace: StreamTrace) {
    #[cfg(test)]
    {
        if !TEST_CAPTURE.with(|c| c.get()) {
            return;
        }
    }
    match TELEMETRY_SINK.get() {
        Some(sink) => sink.record(trace),
        None => tracing::trace!(outcome = ?trace.outcome, "no telemetry sink; trace dropped"),
    }
}

/// Opt the current test thread in or out of emission.
#[cfg(test)]
pub fn test_set_capture_enabled(enabled: bool) {
    TEST_CAPTURE.with(|c| c.set(enabled));
}
