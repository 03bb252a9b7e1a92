use otel_core::{
    trace::{Link, SpanKind, TraceState},
    Context, KeyValue,
};

use super::{
    is_valid_threshold, ComposableSampler, OtelTraceState, SamplingIntent, INVALID_THRESHOLD,
    MIN_THRESHOLD,
};

/// Follows the parent span, and `root` for spans without one.
///
/// A threshold recorded by the parent in the `ot` trace state member is
/// reused and stays reliable. A parent without a threshold only contributes
/// its `sampled` flag, which gives an unreliable intent.
#[derive(Clone, Debug)]
pub struct ComposableParentThreshold<S> {
    root: S,
}

impl<S: ComposableSampler> ComposableParentThreshold<S> {
    /// Uses `root` for spans without a valid parent.
    pub fn new(root: S) -> Self {
        ComposableParentThreshold { root }
    }
}

impl<S: ComposableSampler> ComposableSampler for ComposableParentThreshold<S> {
    fn sampling_intent(
        &self,
        parent_context: Option<&Context>,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
        trace_state: &TraceState,
    ) -> SamplingIntent {
        let Some(parent) = parent_context.filter(|cx| cx.span_context().is_valid()) else {
            return self.root.sampling_intent(
                parent_context,
                name,
                span_kind,
                attributes,
                links,
                trace_state,
            );
        };

        let threshold = OtelTraceState::parse(trace_state).threshold;
        if is_valid_threshold(threshold) {
            return SamplingIntent::new(threshold, true);
        }

        if parent.span_context().is_sampled() {
            SamplingIntent::new(MIN_THRESHOLD, false)
        } else {
            SamplingIntent::new(INVALID_THRESHOLD, false)
        }
    }

    fn description(&self) -> String {
        format!(
            "ComposableParentThreshold{{root={}}}",
            self.root.description()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::ComposableAlwaysOff;
    use otel_core::trace::{SpanContext, TraceFlags};
    use otel_core::{SpanId, TraceId};

    fn intent(parent: Option<&Context>) -> SamplingIntent {
        let trace_state = parent
            .map(|cx| cx.span_context().trace_state().clone())
            .unwrap_or_default();
        ComposableParentThreshold::new(ComposableAlwaysOff).sampling_intent(
            parent,
            "span",
            &SpanKind::Server,
            &[],
            &[],
            &trace_state,
        )
    }

    fn parent(span_id: u64, sampled: bool, trace_state: &str) -> Context {
        Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from(1),
            SpanId::from(span_id),
            TraceFlags::NOT_SAMPLED.with_sampled(sampled),
            true,
            trace_state.parse().unwrap(),
        ))
    }

    #[test]
    fn recorded_threshold_is_reliable() {
        let cx = parent(1, false, "ot=th:c");
        assert_eq!(
            intent(Some(&cx)),
            SamplingIntent::new(0xc0_0000_0000_0000, true)
        );
    }

    #[test]
    fn sampled_flag_gives_unreliable_intent() {
        assert_eq!(
            intent(Some(&parent(1, true, ""))),
            SamplingIntent::new(MIN_THRESHOLD, false)
        );
        assert_eq!(
            intent(Some(&parent(1, false, "ot=th:zz"))),
            SamplingIntent::new(INVALID_THRESHOLD, false)
        );
    }

    #[test]
    fn invalid_parent_uses_root() {
        // span id 0 makes the context invalid
        let cx = parent(0, true, "ot=th:0");
        assert_eq!(
            intent(Some(&cx)),
            SamplingIntent::new(INVALID_THRESHOLD, false)
        );
        assert_eq!(intent(None), SamplingIntent::new(INVALID_THRESHOLD, false));
    }
}
