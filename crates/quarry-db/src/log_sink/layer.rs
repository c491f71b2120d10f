//! `tracing` integration: forward events from any component into a sink.

use std::fmt;

use quarry_core::models::log::LogLevel;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use super::LogSink;

/// Events from these targets are never forwarded: the sink's own
/// diagnostics and mirror output, and the store driver it writes through.
const IGNORED_TARGETS: [&str; 3] = ["quarry::log", "quarry_db::log_sink", "surrealdb"];

const QUEUE_CAPACITY: usize = 1024;

struct Pending {
    level: LogLevel,
    message: String,
    meta: Map<String, Value>,
}

/// Layer produced by [`LogSink::layer`]. Events are queued to a writer
/// task; when the queue is full the event is dropped.
#[derive(Clone)]
pub struct LogSinkLayer {
    tx: mpsc::Sender<Pending>,
}

impl LogSinkLayer {
    pub(super) fn spawn(sink: LogSink) -> Self {
        let (tx, mut rx) = mpsc::channel::<Pending>(QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                sink.write(entry.level, &entry.message, Value::Object(entry.meta))
                    .await;
            }
        });
        Self { tx }
    }
}

impl<S: Subscriber> Layer<S> for LogSinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let target = metadata.target();
        if IGNORED_TARGETS.iter().any(|prefix| target.starts_with(prefix)) {
            return;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);
        fields
            .meta
            .insert("target".into(), Value::String(target.to_string()));

        let _ = self.tx.try_send(Pending {
            level: level_of(metadata.level()),
            message: fields.message.unwrap_or_default(),
            meta: fields.meta,
        });
    }
}

fn level_of(level: &Level) -> LogLevel {
    match *level {
        Level::ERROR => LogLevel::Error,
        Level::WARN => LogLevel::Warn,
        Level::INFO => LogLevel::Info,
        Level::DEBUG => LogLevel::Debug,
        Level::TRACE => LogLevel::Trace,
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    meta: Map<String, Value>,
}

impl FieldCollector {
    fn put(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.meta.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Value::String(format!("{value:?}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_map_one_to_one() {
        assert_eq!(level_of(&Level::ERROR), LogLevel::Error);
        assert_eq!(level_of(&Level::TRACE), LogLevel::Trace);
    }
}
