// Logging setup
//
// JSON lines on stderr by default: timestamp, level, logger, message, plus
// run_id / stage when the event carries them. Any other event field is
// nested under "fields".

use std::fmt;

use macro_ingest_config::{AppConfig, LogFormat};
use macro_ingest_core::utc_now_iso;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Fields promoted to the top level of a JSON line.
const TOP_LEVEL_FIELDS: &[&str] = &["run_id", "stage"];

/// Initialize tracing/logging from AppConfig
pub fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::{fmt, prelude::*};

    let registry = tracing_subscriber::registry().with(env_filter(&config.log.level));

    // Try to set the global subscriber; ignore error if already set (idempotent)
    let _ = match config.log.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(
                fmt::layer()
                    .event_format(JsonLineFormat)
                    .with_writer(std::io::stderr),
            ),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_writer(std::io::stderr)),
        ),
    };
}

/// `LOG_LEVEL` uses python-style names; `WARNING` has no tracing equivalent.
pub fn env_filter(level: &str) -> tracing_subscriber::EnvFilter {
    let level = match level.trim().to_lowercase().as_str() {
        "warning" => "warn".to_string(),
        other => other.to_string(),
    };
    tracing_subscriber::EnvFilter::try_new(&level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// One JSON object per event, keys sorted.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLineFormat;

impl<S, N> FormatEvent<S, N> for JsonLineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, _ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        let mut line = Map::new();
        line.insert("timestamp".into(), Value::String(utc_now_iso()));
        line.insert("level".into(), Value::String(metadata.level().as_str().to_string()));
        line.insert("logger".into(), Value::String(metadata.target().to_string()));
        line.insert(
            "message".into(),
            visitor.message.map(Value::String).unwrap_or(Value::String(String::new())),
        );
        line.extend(visitor.top_level);
        if !visitor.fields.is_empty() {
            line.insert("fields".into(), Value::Object(visitor.fields));
        }

        let rendered = serde_json::to_string(&Value::Object(line)).map_err(|_| fmt::Error)?;
        writeln!(writer, "{rendered}")
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    top_level: Map<String, Value>,
    fields: Map<String, Value>,
}

impl JsonVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        let name = field.name();
        if name == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else if TOP_LEVEL_FIELDS.contains(&name) {
            self.top_level.insert(name.to_string(), value);
        } else {
            self.fields.insert(name.to_string(), value);
        }
    }
}

impl Visit for JsonVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{value:?}")));
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::fmt::MakeWriter;
    use tracing_subscriber::prelude::*;

    use super::*;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Buffer {
        type Writer = Buffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture(level: &str, emit: impl FnOnce()) -> Vec<Value> {
        let buffer = Buffer::default();
        let subscriber = tracing_subscriber::registry().with(env_filter(level)).with(
            tracing_subscriber::fmt::layer()
                .event_format(JsonLineFormat)
                .with_writer(buffer.clone()),
        );
        tracing::subscriber::with_default(subscriber, emit);

        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn json_line_shape() {
        let lines = capture("INFO", || {
            tracing::info!(target: "pipeline", run_id = "run-1", stage = "extract", rows = 3u64, "BEA data received");
        });

        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line["level"], "INFO");
        assert_eq!(line["logger"], "pipeline");
        assert_eq!(line["message"], "BEA data received");
        assert_eq!(line["run_id"], "run-1");
        assert_eq!(line["stage"], "extract");
        assert_eq!(line["fields"]["rows"], 3);
        assert!(line["timestamp"].as_str().unwrap().ends_with("+00:00"));
    }

    #[test]
    fn fields_key_is_omitted_when_empty() {
        let lines = capture("INFO", || tracing::warn!("plain"));
        assert!(lines[0].get("fields").is_none());
        assert!(lines[0].get("run_id").is_none());
        assert_eq!(lines[0]["level"], "WARN");
    }

    #[test]
    fn warning_maps_to_warn() {
        let lines = capture("WARNING", || {
            tracing::info!("dropped");
            tracing::warn!("kept");
        });
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["message"], "kept");
    }

    #[test]
    fn level_names_are_case_insensitive() {
        let lines = capture("debug", || tracing::debug!("kept"));
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["level"], "DEBUG");
    }
}
