use crate::config::{LogFormat, Settings};
use axum::http::HeaderMap;
use serde_json::{Map, Value};
use std::fmt;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{JsonFields, Writer};
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormattedFields, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

pub use tracing_subscriber::util::TryInitError;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const CLOUD_TRACE_HEADER: &str = "x-cloud-trace-context";

/// Field names understood by Cloud Logging.
pub const TRACE_FIELD: &str = "logging.googleapis.com/trace";
pub const SPAN_ID_FIELD: &str = "logging.googleapis.com/spanId";

/// Span field carrying the correlation id, and the key it is written under.
pub const REQUEST_ID_FIELD: &str = "request_id";
pub const REQUEST_ID_KEY: &str = "requestId";

/// Installs the process-wide subscriber. Fails if one is already set.
pub fn init(settings: &Settings) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match settings.log_format {
        LogFormat::Json => registry.with(json_layer(std::io::stdout)).try_init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    }
}

/// One JSON object per line in the shape Cloud Logging ingests.
pub fn json_layer<S, W>(writer: W) -> impl Layer<S> + Send + Sync + 'static
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .fmt_fields(JsonFields::new())
        .event_format(CloudLogFormat)
        .with_writer(writer)
}

/// Writes `severity`, `time`, `requestId` and the trace fields at the top
/// level next to the event's own fields. `requestId` and the trace fields
/// come from the enclosing spans, innermost wins; outside a request
/// `requestId` is empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudLogFormat;

impl<S> FormatEvent<S, JsonFields> for CloudLogFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, JsonFields>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let mut entry = Map::new();

        let mut time = String::new();
        if SystemTime.format_time(&mut Writer::new(&mut time)).is_ok() {
            entry.insert("time".into(), Value::String(time));
        }
        entry.insert("severity".into(), severity(metadata.level()).into());
        entry.insert("target".into(), metadata.target().into());
        entry.insert(REQUEST_ID_KEY.into(), Value::String(String::new()));

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let extensions = span.extensions();
                let Some(fields) = extensions.get::<FormattedFields<JsonFields>>() else {
                    continue;
                };
                let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(&fields.fields) else {
                    continue;
                };
                for (key, value) in fields {
                    if key == REQUEST_ID_FIELD {
                        entry.insert(REQUEST_ID_KEY.into(), value);
                    } else if key == TRACE_FIELD || key == SPAN_ID_FIELD {
                        entry.insert(key, value);
                    }
                }
            }
        }

        // Event fields last so an explicit `severity` (see `notice!`) wins.
        event.record(&mut JsonVisitor(&mut entry));

        let line = serde_json::to_string(&entry).map_err(|_| fmt::Error)?;
        writeln!(writer, "{line}")
    }
}

fn severity(level: &Level) -> &'static str {
    if *level == Level::ERROR {
        "ERROR"
    } else if *level == Level::WARN {
        "WARNING"
    } else if *level == Level::INFO {
        "INFO"
    } else {
        "DEBUG"
    }
}

struct JsonVisitor<'a>(&'a mut Map<String, Value>);

impl Visit for JsonVisitor<'_> {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.0.insert(field.name().into(), Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().into(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().into(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().into(), Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().into(), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().into(), Value::String(format!("{value:?}")));
    }
}

/// Logs at INFO tagged with Cloud Logging's NOTICE severity.
#[macro_export]
macro_rules! notice {
    ($($arg:tt)+) => {
        ::tracing::info!(severity = "NOTICE", $($arg)+)
    };
}

/// Distributed-trace identifiers propagated by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub sampled: bool,
}

impl TraceContext {
    /// Reads W3C `traceparent`, falling back to `X-Cloud-Trace-Context`.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        header(TRACEPARENT_HEADER)
            .and_then(Self::parse_traceparent)
            .or_else(|| header(CLOUD_TRACE_HEADER).and_then(Self::parse_cloud_trace))
    }

    /// `00-<32 hex trace id>-<16 hex span id>-<2 hex flags>`
    pub fn parse_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;

        if !is_hex(version, 2) || version.eq_ignore_ascii_case("ff") {
            return None;
        }
        if !is_non_zero_hex(trace_id, 32) || !is_non_zero_hex(span_id, 16) || !is_hex(flags, 2) {
            return None;
        }
        let flags = u8::from_str_radix(flags, 16).ok()?;

        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: span_id.to_ascii_lowercase(),
            sampled: flags & 0x01 == 0x01,
        })
    }

    /// `<32 hex trace id>/<decimal span id>;o=<0|1>`
    pub fn parse_cloud_trace(value: &str) -> Option<Self> {
        let (ids, options) = match value.trim().split_once(';') {
            Some((ids, options)) => (ids, Some(options)),
            None => (value.trim(), None),
        };
        let (trace_id, span_id) = ids.split_once('/')?;
        if !is_non_zero_hex(trace_id, 32) {
            return None;
        }
        let span_id: u64 = span_id.parse().ok()?;

        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: format!("{span_id:016x}"),
            sampled: options == Some("o=1"),
        })
    }

    pub fn cloud_trace(&self, project_id: &str) -> String {
        format!("projects/{project_id}/traces/{}", self.trace_id)
    }
}

fn is_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_non_zero_hex(value: &str, len: usize) -> bool {
    is_hex(value, len) && value.bytes().any(|b| b != b'0')
}
