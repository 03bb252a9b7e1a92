use otel_core::{
    trace::{Link, SamplingResult, SpanKind, TraceState},
    Context, KeyValue, TraceId,
};

mod consistent;

pub use consistent::{
    consistent_always_off, consistent_always_on, consistent_parent_based,
    consistent_probability_based, ComposableAlwaysOff, ComposableAlwaysOn,
    ComposableParentThreshold, ComposableRuleBased, ComposableSampler,
    ComposableTraceIdRatioBased, ConsistentSampler, OtelTraceState, Predicate, SamplingIntent,
    SpanKindPredicate, SpanNamePredicate, TraceStateUpdate, INVALID_RANDOM_VALUE,
    INVALID_THRESHOLD, MAX_THRESHOLD, MIN_THRESHOLD,
};

/// Decides, just before a span is created, whether it is recorded.
///
/// A sampler decides between three outcomes: drop the span, record it
/// without setting the `sampled` flag, or record it and set the flag so it
/// is exported and propagated to children. The returned trace state replaces
/// the parent's on the new span.
pub trait ShouldSample: CloneShouldSample + Send + Sync + std::fmt::Debug {
    /// Returns the [`SamplingResult`] for a span to be created.
    ///
    /// `parent_context` carries the parent span, if any. The trace id is the
    /// one the new span will get.
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult;
}

/// Boxed cloning for [`ShouldSample`] trait objects. Implemented for every
/// `Clone` sampler.
pub trait CloneShouldSample {
    /// Clones `self` into a new box.
    fn box_clone(&self) -> Box<dyn ShouldSample>;
}

impl<T> CloneShouldSample for T
where
    T: ShouldSample + Clone + 'static,
{
    fn box_clone(&self) -> Box<dyn ShouldSample> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn ShouldSample> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

pub(crate) fn parent_trace_state(parent_context: Option<&Context>) -> TraceState {
    parent_context
        .map(|cx| cx.span_context().trace_state().clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use otel_core::trace::{SamplingDecision, SpanContext, TraceFlags};
    use otel_core::SpanId;

    fn parent(flags: TraceFlags) -> Context {
        Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from(1),
            SpanId::from(1),
            flags,
            true,
            TraceState::from_key_value([("vendor", "x")]).unwrap(),
        ))
    }

    #[test]
    fn parent_trace_state_defaults_to_empty() {
        assert_eq!(parent_trace_state(None), TraceState::default());
        let cx = parent(TraceFlags::SAMPLED);
        assert_eq!(parent_trace_state(Some(&cx)).get("vendor"), Some("x"));
    }

    #[test]
    fn boxed_sampler_clone_decides_the_same() {
        let sampler: Box<dyn ShouldSample> =
            Box::new(consistent_parent_based(ComposableAlwaysOn));
        #[allow(clippy::redundant_clone)]
        let cloned = sampler.clone();
        let cx = parent(TraceFlags::NOT_SAMPLED);

        let sample = |s: &dyn ShouldSample| {
            s.should_sample(
                Some(&cx),
                TraceId::from(1),
                "clone",
                &SpanKind::Internal,
                &[],
                &[],
            )
        };
        assert_eq!(sample(sampler.as_ref()), sample(cloned.as_ref()));
        assert_eq!(sample(sampler.as_ref()).decision, SamplingDecision::Drop);
    }
}
