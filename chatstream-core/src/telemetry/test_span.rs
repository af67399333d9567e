//! Records span fields in memory so tests can assert what a stream logged.
#![cfg(test)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::span::{Attributes, Id, Record};
use tracing::subscriber::DefaultGuard;
use tracing::Subscriber;
use tracing_core::field::{Field, Visit};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::{LookupSpan, Registry};
use tracing_subscriber::Layer;

type Fields = HashMap<String, String>;

/// Spans in creation order. Ids can be reused once a span closes, so
/// lookups by id take the newest entry.
#[derive(Default, Debug)]
pub struct SpanStore {
    spans: Mutex<Vec<(Id, &'static str, Fields)>>,
}

impl SpanStore {
    /// Fields of the newest span called `name`. Strings are quoted.
    pub fn fields_of(&self, name: &str) -> Option<Fields> {
        let spans = self.spans.lock().unwrap();
        spans.iter().rev().find(|(_, n, _)| *n == name).map(|(_, _, f)| f.clone())
    }
}

struct FieldWriter<'a>(&'a mut Fields);

impl Visit for FieldWriter<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

struct CaptureLayer(Arc<SpanStore>);

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, _ctx: Context<'_, S>) {
        let mut fields = Fields::new();
        attrs.record(&mut FieldWriter(&mut fields));
        let name = attrs.metadata().name();
        self.0.spans.lock().unwrap().push((id.clone(), name, fields));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
        let mut spans = self.0.spans.lock().unwrap();
        if let Some((_, _, fields)) = spans.iter_mut().rev().find(|(sid, _, _)| sid == id) {
            values.record(&mut FieldWriter(fields));
        }
    }
}

/// Make a capturing subscriber the default for this thread until the guard
/// drops. Run the code under test on the same thread (`#[tokio::test]`'s
/// default runtime does).
pub fn install_capture() -> (Arc<SpanStore>, DefaultGuard) {
    let store = Arc::new(SpanStore::default());
    let subscriber = Registry::default().with(CaptureLayer(store.clone()));
    let guard = tracing::subscriber::set_default(subscriber);
    (store, guard)
}
