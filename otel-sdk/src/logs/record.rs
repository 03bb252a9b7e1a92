#[cfg(feature = "trace")]
use otel_core::trace::{SpanContext, SpanId, TraceFlags, TraceId};
use otel_core::{Key, KeyValue, Value};
use std::borrow::Cow;
use std::time::SystemTime;

/// Normalized log severity, numbered as in the OpenTelemetry log data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// TRACE
    Trace = 1,
    /// DEBUG
    Debug = 5,
    /// INFO
    Info = 9,
    /// WARN
    Warn = 13,
    /// ERROR
    Error = 17,
    /// FATAL
    Fatal = 21,
}

impl Severity {
    /// The short, upper-case name of the severity.
    pub const fn name(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

/// Everything carried by one log record. Exporters receive it inside a
/// [`LogBatch`](super::LogBatch).
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct SdkLogRecord {
    /// Time the event occurred.
    pub timestamp: Option<SystemTime>,

    /// Time the SDK saw the record. Filled in on emit when unset.
    pub observed_timestamp: Option<SystemTime>,

    /// Span the record was emitted in.
    #[cfg(feature = "trace")]
    pub trace_context: Option<TraceContext>,

    /// The original severity string from the source
    pub severity_text: Option<Cow<'static, str>>,
    /// The corresponding severity value, normalized
    pub severity_number: Option<Severity>,

    /// Record body
    pub body: Option<Value>,

    /// Additional attributes associated with this record
    pub attributes: Vec<KeyValue>,
}

impl SdkLogRecord {
    pub(crate) fn new() -> Self {
        SdkLogRecord::default()
    }

    /// Sets the event time.
    pub fn set_timestamp(&mut self, timestamp: SystemTime) {
        self.timestamp = Some(timestamp);
    }

    /// Sets the severity, keeping its name as the severity text.
    pub fn set_severity(&mut self, severity: Severity) {
        self.severity_number = Some(severity);
        self.severity_text = Some(Cow::Borrowed(severity.name()));
    }

    /// Sets the body.
    pub fn set_body(&mut self, body: impl Into<Value>) {
        self.body = Some(body.into());
    }

    /// Appends one attribute.
    pub fn add_attribute<K, V>(&mut self, key: K, value: V)
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        self.attributes.push(KeyValue::new(key, value));
    }

    /// Associates the record with a span.
    #[cfg(feature = "trace")]
    pub fn set_span_context(&mut self, span_context: &SpanContext) {
        self.trace_context = Some(TraceContext::from(span_context));
    }

    /// Returns the value of the first attribute with the given key.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| &kv.value)
    }
}

/// TraceContext stores the trace data for logs that have an associated
/// span.
#[cfg(feature = "trace")]
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct TraceContext {
    /// Trace id
    pub trace_id: TraceId,
    /// Span Id
    pub span_id: SpanId,
    /// Trace flags
    pub trace_flags: TraceFlags,
}

#[cfg(feature = "trace")]
impl From<&SpanContext> for TraceContext {
    fn from(span_context: &SpanContext) -> Self {
        TraceContext {
            trace_id: span_context.trace_id(),
            span_id: span_context.span_id(),
            trace_flags: span_context.trace_flags(),
        }
    }
}
