use otel_core::{
    trace::{Link, SpanKind, TraceState},
    Context, KeyValue,
};

use super::{
    trace_state::serialize_th, ComposableSampler, SamplingIntent, INVALID_THRESHOLD,
    MAX_THRESHOLD, MIN_THRESHOLD,
};

/// Samples every span. The threshold is reliable.
#[derive(Clone, Copy, Debug, Default)]
pub struct ComposableAlwaysOn;

impl ComposableSampler for ComposableAlwaysOn {
    fn sampling_intent(
        &self,
        _parent_context: Option<&Context>,
        _name: &str,
        _span_kind: &SpanKind,
        _attributes: &[KeyValue],
        _links: &[Link],
        _trace_state: &TraceState,
    ) -> SamplingIntent {
        SamplingIntent::new(MIN_THRESHOLD, true)
    }

    fn description(&self) -> String {
        "ComposableAlwaysOn".to_string()
    }
}

/// Drops every span.
#[derive(Clone, Copy, Debug, Default)]
pub struct ComposableAlwaysOff;

impl ComposableSampler for ComposableAlwaysOff {
    fn sampling_intent(
        &self,
        _parent_context: Option<&Context>,
        _name: &str,
        _span_kind: &SpanKind,
        _attributes: &[KeyValue],
        _links: &[Link],
        _trace_state: &TraceState,
    ) -> SamplingIntent {
        SamplingIntent::new(INVALID_THRESHOLD, false)
    }

    fn description(&self) -> String {
        "ComposableAlwaysOff".to_string()
    }
}

/// Samples a fixed fraction of traces.
///
/// The threshold is `2^56 - round(ratio * 2^56)`. A ratio of `0` gives the
/// maximum threshold, which never samples and is reported as
/// [`INVALID_THRESHOLD`].
#[derive(Clone, Debug)]
pub struct ComposableTraceIdRatioBased {
    ratio: f64,
    threshold: i64,
}

impl ComposableTraceIdRatioBased {
    /// Creates a sampler for `ratio`, clamped to `[0, 1]`. NaN samples
    /// nothing.
    pub fn new(ratio: f64) -> Self {
        let ratio = if ratio.is_nan() {
            0.0
        } else {
            ratio.clamp(0.0, 1.0)
        };
        ComposableTraceIdRatioBased {
            ratio,
            threshold: calculate_threshold(ratio),
        }
    }

    /// The threshold compared against the trace's random value.
    pub fn threshold(&self) -> i64 {
        self.threshold
    }
}

fn calculate_threshold(ratio: f64) -> i64 {
    let threshold = MAX_THRESHOLD - (ratio * MAX_THRESHOLD as f64).round() as i64;
    if threshold == MAX_THRESHOLD {
        INVALID_THRESHOLD
    } else {
        threshold
    }
}

impl ComposableSampler for ComposableTraceIdRatioBased {
    fn sampling_intent(
        &self,
        _parent_context: Option<&Context>,
        _name: &str,
        _span_kind: &SpanKind,
        _attributes: &[KeyValue],
        _links: &[Link],
        _trace_state: &TraceState,
    ) -> SamplingIntent {
        SamplingIntent::new(self.threshold, self.threshold != INVALID_THRESHOLD)
    }

    fn description(&self) -> String {
        let threshold = if self.threshold == INVALID_THRESHOLD {
            "max".to_string()
        } else {
            serialize_th(self.threshold)
        };
        format!(
            "ComposableTraceIdRatioBased{{threshold={threshold}, ratio={}}}",
            self.ratio
        )
    }
}
