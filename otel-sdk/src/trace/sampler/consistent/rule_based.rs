use std::{fmt, sync::Arc};

use otel_core::{
    trace::{Link, SpanKind, TraceState},
    Context, KeyValue,
};

use super::{ComposableSampler, SamplingIntent, INVALID_THRESHOLD};

/// A condition selecting a rule of [`ComposableRuleBased`].
pub trait Predicate: Send + Sync + fmt::Debug {
    /// Returns `true` if the span about to be created matches.
    fn matches(
        &self,
        parent_context: Option<&Context>,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
        trace_state: &TraceState,
    ) -> bool;

    /// A human readable description of the condition.
    fn description(&self) -> String;
}

/// Matches spans of the given kind.
#[derive(Clone, Debug)]
pub struct SpanKindPredicate(pub SpanKind);

impl Predicate for SpanKindPredicate {
    fn matches(
        &self,
        _parent_context: Option<&Context>,
        _name: &str,
        span_kind: &SpanKind,
        _attributes: &[KeyValue],
        _links: &[Link],
        _trace_state: &TraceState,
    ) -> bool {
        *span_kind == self.0
    }

    fn description(&self) -> String {
        format!("SpanKind={:?}", self.0)
    }
}

/// Matches spans with exactly the given name.
#[derive(Clone, Debug)]
pub struct SpanNamePredicate(pub String);

impl Predicate for SpanNamePredicate {
    fn matches(
        &self,
        _parent_context: Option<&Context>,
        name: &str,
        _span_kind: &SpanKind,
        _attributes: &[KeyValue],
        _links: &[Link],
        _trace_state: &TraceState,
    ) -> bool {
        name == self.0
    }

    fn description(&self) -> String {
        format!("SpanName={}", self.0)
    }
}

/// Delegates to the sampler of the first rule whose predicate matches.
///
/// Spans matching no rule are never sampled.
///
/// ```
/// use otel_core::trace::{SamplingDecision, SpanKind};
/// use otel_core::TraceId;
/// use otel_sdk::trace::{
///     ComposableAlwaysOff, ComposableAlwaysOn, ComposableRuleBased, ConsistentSampler,
///     ShouldSample, SpanKindPredicate, SpanNamePredicate,
/// };
///
/// let sampler = ConsistentSampler::new(
///     ComposableRuleBased::default()
///         .with_rule(SpanNamePredicate("/health".into()), ComposableAlwaysOff)
///         .with_rule(SpanKindPredicate(SpanKind::Server), ComposableAlwaysOn),
/// );
///
/// let decide = |name: &str| {
///     sampler
///         .should_sample(None, TraceId::from(1), name, &SpanKind::Server, &[], &[])
///         .decision
/// };
/// assert_eq!(decide("/health"), SamplingDecision::Drop);
/// assert_eq!(decide("/orders"), SamplingDecision::RecordAndSample);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ComposableRuleBased {
    rules: Vec<(Arc<dyn Predicate>, Arc<dyn ComposableSampler>)>,
}

impl ComposableRuleBased {
    /// Creates a sampler evaluating `rules` in order.
    pub fn new(rules: Vec<(Arc<dyn Predicate>, Arc<dyn ComposableSampler>)>) -> Self {
        ComposableRuleBased { rules }
    }

    /// Appends a rule, evaluated after the existing ones.
    pub fn with_rule<P, S>(mut self, predicate: P, sampler: S) -> Self
    where
        P: Predicate + 'static,
        S: ComposableSampler + 'static,
    {
        self.rules.push((Arc::new(predicate), Arc::new(sampler)));
        self
    }
}

impl ComposableSampler for ComposableRuleBased {
    fn sampling_intent(
        &self,
        parent_context: Option<&Context>,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
        trace_state: &TraceState,
    ) -> SamplingIntent {
        self.rules
            .iter()
            .find(|(predicate, _)| {
                predicate.matches(
                    parent_context,
                    name,
                    span_kind,
                    attributes,
                    links,
                    trace_state,
                )
            })
            .map(|(_, sampler)| {
                sampler.sampling_intent(
                    parent_context,
                    name,
                    span_kind,
                    attributes,
                    links,
                    trace_state,
                )
            })
            .unwrap_or_else(|| SamplingIntent::new(INVALID_THRESHOLD, false))
    }

    fn description(&self) -> String {
        let rules = self
            .rules
            .iter()
            .map(|(predicate, sampler)| {
                format!("({}:{})", predicate.description(), sampler.description())
            })
            .collect::<Vec<_>>()
            .join(",");
        format!("ComposableRuleBased{{[{rules}]}}")
    }
}
