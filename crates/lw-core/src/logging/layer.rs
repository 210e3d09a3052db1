//! Custom tracing layer for JSONL output.
//!
//! Each event becomes one JSON object per line. Run context recorded on
//! enclosing spans (`run_id`, `operation`, `channel`) is copied onto every
//! event so a single run can be filtered out of a shared log.

use std::io::{self, Write};
use std::sync::Mutex;

use chrono::Utc;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use super::events::Level;

/// Run context recorded on a span.
#[derive(Debug, Clone, Default)]
struct SpanContext {
    run_id: Option<String>,
    operation: Option<String>,
    channel: Option<String>,
}

impl SpanContext {
    fn set(&mut self, name: &str, value: String) {
        let slot = match name {
            "run_id" => &mut self.run_id,
            "operation" => &mut self.operation,
            "channel" => &mut self.channel,
            _ => return,
        };
        *slot = Some(value);
    }

    /// Fill fields still unset from an enclosing span.
    fn inherit(&mut self, outer: &SpanContext) {
        if self.run_id.is_none() {
            self.run_id.clone_from(&outer.run_id);
        }
        if self.operation.is_none() {
            self.operation.clone_from(&outer.operation);
        }
        if self.channel.is_none() {
            self.channel.clone_from(&outer.channel);
        }
    }
}

/// Collects event fields, pulling `message` out of the field map.
#[derive(Default)]
struct FieldCollector {
    fields: serde_json::Map<String, serde_json::Value>,
    message: Option<String>,
}

impl FieldCollector {
    fn put(&mut self, field: &Field, value: serde_json::Value) {
        match (field.name(), value) {
            ("message", serde_json::Value::String(text)) => self.message = Some(text),
            (name, value) => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.into());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, format!("{value:?}").into());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        // NaN and infinities have no JSON form.
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.put(field, serde_json::Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.into());
    }
}

impl Visit for SpanContext {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.set(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.set(field.name(), format!("{value:?}"));
    }
}

/// JSONL tracing layer.
pub struct JsonlLayer<W = io::Stderr> {
    writer: Mutex<W>,
}

impl JsonlLayer<io::Stderr> {
    /// Create a new JSONL layer writing to stderr.
    pub fn stderr() -> Self {
        JsonlLayer {
            writer: Mutex::new(io::stderr()),
        }
    }
}

impl<W: Write> JsonlLayer<W> {
    /// Create a new JSONL layer with a custom writer.
    pub fn new(writer: W) -> Self {
        JsonlLayer {
            writer: Mutex::new(writer),
        }
    }
}

impl<S, W> Layer<S> for JsonlLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: Write + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut context = SpanContext::default();
        attrs.record(&mut context);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(context);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut context = SpanContext::default();
        for span in ctx.event_scope(event).into_iter().flatten() {
            if let Some(outer) = span.extensions().get::<SpanContext>() {
                context.inherit(outer);
            }
        }

        let mut collected = FieldCollector::default();
        event.record(&mut collected);
        let line = render(event, context, collected);

        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{line}");
        }
    }
}

/// One JSONL record: fixed keys first, remaining fields nested.
fn render(event: &Event<'_>, context: SpanContext, mut collected: FieldCollector) -> String {
    use serde_json::Value;

    let level: Level = (*event.metadata().level()).into();
    let mut record = serde_json::Map::new();
    record.insert("ts".into(), Value::String(Utc::now().to_rfc3339()));
    record.insert("level".into(), serde_json::json!(level));
    record.insert("event".into(), event.metadata().target().into());

    let context_fields = [
        ("run_id", context.run_id),
        ("operation", context.operation),
        ("channel", context.channel),
    ];
    for (key, value) in context_fields {
        if let Some(value) = value {
            record.insert(key.into(), Value::String(value));
        }
    }
    if let Some(stage) = collected.fields.remove("stage") {
        record.insert("stage".into(), stage);
    }
    if let Some(message) = collected.message {
        record.insert("message".into(), Value::String(message));
    }
    if !collected.fields.is_empty() {
        record.insert("fields".into(), Value::Object(collected.fields));
    }

    serde_json::to_string(&record).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    struct BufWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for BufWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(f: impl FnOnce()) -> Vec<serde_json::Value> {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let layer = JsonlLayer::new(BufWriter(buffer.clone()));
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);

        let output = buffer.lock().unwrap();
        String::from_utf8_lossy(&output)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_event_fields() {
        let lines = capture(|| {
            tracing::info!(target: "window.done", anchor = 4_u64, value = 1.5, message = "done");
        });
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["level"], "info");
        assert_eq!(lines[0]["event"], "window.done");
        assert_eq!(lines[0]["message"], "done");
        assert_eq!(lines[0]["fields"]["anchor"], 4);
        assert_eq!(lines[0]["fields"]["value"], 1.5);
        assert!(lines[0]["ts"].is_string());
    }

    #[test]
    fn test_span_context_is_inherited() {
        let lines = capture(|| {
            let span = tracing::info_span!("run", run_id = "run-abc", operation = "iob");
            let _guard = span.enter();
            tracing::warn!(target: "window.failed", stage = "query", "failed");
        });
        assert_eq!(lines[0]["run_id"], "run-abc");
        assert_eq!(lines[0]["operation"], "iob");
        assert_eq!(lines[0]["stage"], "query");
        assert_eq!(lines[0]["level"], "warn");
        assert!(lines[0].get("fields").is_none());
    }

    #[test]
    fn test_display_fields_in_span() {
        let lines = capture(|| {
            let run_id = String::from("run-xyz");
            let span = tracing::info_span!("run", run_id = %run_id, channel = %"ice");
            let _guard = span.enter();
            tracing::error!(target: "run.failed", "boom");
        });
        assert_eq!(lines[0]["run_id"], "run-xyz");
        assert_eq!(lines[0]["channel"], "ice");
    }
}
