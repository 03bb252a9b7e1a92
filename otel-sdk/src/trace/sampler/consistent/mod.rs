//! Consistent probability sampling.
//!
//! A [`ComposableSampler`] does not decide by itself. It states a rejection
//! threshold in `[0, 2^56]` and [`ConsistentSampler`] samples the span when the
//! threshold is at most the trace's 56-bit random value. Because every
//! participant of a trace compares against the same random value, a lower
//! probability further down the trace only ever removes spans, never adds
//! them.
//!
//! The random value is read from the `rv` sub-key of the `ot` trace state
//! member. Without one, the low 56 bits of the trace id are used. Trace id
//! generators are not required to make those bits uniformly random, so this
//! fallback is weaker than an explicit random value.
use std::{fmt, sync::Arc};

use otel_core::{
    otel_debug,
    trace::{Link, SamplingDecision, SamplingResult, SpanKind, TraceState},
    Context, KeyValue, TraceId,
};

use super::{parent_trace_state, ShouldSample};

mod fixed_threshold;
mod parent_threshold;
mod rule_based;
mod trace_state;

pub use fixed_threshold::{ComposableAlwaysOff, ComposableAlwaysOn, ComposableTraceIdRatioBased};
pub use parent_threshold::ComposableParentThreshold;
pub use rule_based::{ComposableRuleBased, Predicate, SpanKindPredicate, SpanNamePredicate};
pub use trace_state::OtelTraceState;

/// The threshold rejecting every span.
pub const MAX_THRESHOLD: i64 = 1 << 56;
/// The threshold accepting every span.
pub const MIN_THRESHOLD: i64 = 0;
/// Marks a threshold that is absent or cannot be trusted.
pub const INVALID_THRESHOLD: i64 = -1;
/// Marks an absent random value.
pub const INVALID_RANDOM_VALUE: i64 = -1;

const TRACE_ID_RANDOMNESS_MASK: u128 = (1 << 56) - 1;

pub(crate) fn is_valid_threshold(threshold: i64) -> bool {
    (MIN_THRESHOLD..=MAX_THRESHOLD).contains(&threshold)
}

pub(crate) fn is_valid_random_value(random_value: i64) -> bool {
    (0..MAX_THRESHOLD).contains(&random_value)
}

/// Rewrites the parent's trace state before the `ot` member is recorded.
pub type TraceStateUpdate = Arc<dyn Fn(TraceState) -> TraceState + Send + Sync>;

/// What a [`ComposableSampler`] wants for a span.
#[derive(Clone)]
pub struct SamplingIntent {
    /// Spans whose random value is below the threshold are dropped.
    /// [`INVALID_THRESHOLD`] drops the span regardless.
    pub threshold: i64,
    /// Whether `threshold` is the probability the span was really sampled
    /// with, so that its adjusted count can be derived downstream.
    pub adjusted_count_reliable: bool,
    /// Attributes added to the span when it is sampled.
    pub attributes: Vec<KeyValue>,
    /// Applied to the parent's trace state whatever the decision.
    pub update_trace_state: Option<TraceStateUpdate>,
}

impl SamplingIntent {
    /// An intent without attributes that leaves the trace state alone.
    pub fn new(threshold: i64, adjusted_count_reliable: bool) -> Self {
        SamplingIntent {
            threshold,
            adjusted_count_reliable,
            attributes: Vec::new(),
            update_trace_state: None,
        }
    }

    /// Sets the trace state rewrite.
    pub fn with_trace_state_update<F>(mut self, update: F) -> Self
    where
        F: Fn(TraceState) -> TraceState + Send + Sync + 'static,
    {
        self.update_trace_state = Some(Arc::new(update));
        self
    }
}

impl fmt::Debug for SamplingIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamplingIntent")
            .field("threshold", &self.threshold)
            .field("adjusted_count_reliable", &self.adjusted_count_reliable)
            .field("attributes", &self.attributes)
            .field("update_trace_state", &self.update_trace_state.is_some())
            .finish()
    }
}

impl PartialEq for SamplingIntent {
    fn eq(&self, other: &Self) -> bool {
        let same_update = match (&self.update_trace_state, &other.update_trace_state) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        self.threshold == other.threshold
            && self.adjusted_count_reliable == other.adjusted_count_reliable
            && self.attributes == other.attributes
            && same_update
    }
}

/// A building block of [`ConsistentSampler`]: computes a [`SamplingIntent`]
/// instead of a decision.
pub trait ComposableSampler: Send + Sync + fmt::Debug {
    /// Returns the intent for a span about to be created.
    ///
    /// `trace_state` is the trace state of the parent, or empty for a root
    /// span.
    fn sampling_intent(
        &self,
        parent_context: Option<&Context>,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
        trace_state: &TraceState,
    ) -> SamplingIntent;

    /// A human readable description of the sampler and its configuration.
    fn description(&self) -> String;
}

macro_rules! forward_composable_sampler {
    ($ptr:ident) => {
        impl<S: ComposableSampler + ?Sized> ComposableSampler for $ptr<S> {
            fn sampling_intent(
                &self,
                parent_context: Option<&Context>,
                name: &str,
                span_kind: &SpanKind,
                attributes: &[KeyValue],
                links: &[Link],
                trace_state: &TraceState,
            ) -> SamplingIntent {
                (**self).sampling_intent(parent_context, name, span_kind, attributes, links, trace_state)
            }

            fn description(&self) -> String {
                (**self).description()
            }
        }
    };
}

forward_composable_sampler!(Box);
forward_composable_sampler!(Arc);

/// A [`ShouldSample`] implementation turning the intent of a
/// [`ComposableSampler`] into a decision, and recording the threshold in the
/// `ot` trace state member.
///
/// The threshold is recorded only when the span is sampled and the delegate
/// marked its intent as reliable. Otherwise the `th` sub-key is removed.
#[derive(Clone, Debug)]
pub struct ConsistentSampler<S> {
    delegate: S,
}

impl<S: ComposableSampler> ConsistentSampler<S> {
    /// Wraps a composable sampler.
    pub fn new(delegate: S) -> Self {
        ConsistentSampler { delegate }
    }

    /// The description of the delegate.
    pub fn description(&self) -> String {
        self.delegate.description()
    }
}

impl<S> ShouldSample for ConsistentSampler<S>
where
    S: ComposableSampler + Clone + 'static,
{
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        let trace_state = parent_trace_state(parent_context);
        let mut ot_trace_state = OtelTraceState::parse(&trace_state);

        let intent = self.delegate.sampling_intent(
            parent_context,
            name,
            span_kind,
            attributes,
            links,
            &trace_state,
        );

        let (sampled, adjusted_count_reliable) = if is_valid_threshold(intent.threshold) {
            let randomness = if is_valid_random_value(ot_trace_state.random_value) {
                ot_trace_state.random_value
            } else {
                (u128::from(trace_id) & TRACE_ID_RANDOMNESS_MASK) as i64
            };
            (intent.threshold <= randomness, intent.adjusted_count_reliable)
        } else {
            (false, false)
        };

        ot_trace_state.threshold = if sampled && adjusted_count_reliable {
            intent.threshold
        } else {
            INVALID_THRESHOLD
        };

        let decision = if sampled {
            SamplingDecision::RecordAndSample
        } else {
            SamplingDecision::Drop
        };

        let trace_state = match &intent.update_trace_state {
            Some(update) => update(trace_state),
            None => trace_state,
        };

        SamplingResult {
            decision,
            attributes: intent.attributes,
            trace_state: update_trace_state(trace_state, &ot_trace_state),
        }
    }
}

fn update_trace_state(trace_state: TraceState, ot_trace_state: &OtelTraceState) -> TraceState {
    let serialized = ot_trace_state.serialize();
    let updated = if serialized.is_empty() {
        trace_state.delete(trace_state::TRACE_STATE_KEY)
    } else {
        trace_state.insert(trace_state::TRACE_STATE_KEY, serialized)
    };
    match updated {
        Ok(updated) => updated,
        Err(err) => {
            otel_debug!(
                name: "ConsistentSampler.TraceStateNotUpdated",
                error = format!("{err}")
            );
            trace_state
        }
    }
}

/// Samples every span and records the threshold `0`.
pub fn consistent_always_on() -> ConsistentSampler<ComposableAlwaysOn> {
    ConsistentSampler::new(ComposableAlwaysOn)
}

/// Drops every span.
pub fn consistent_always_off() -> ConsistentSampler<ComposableAlwaysOff> {
    ConsistentSampler::new(ComposableAlwaysOff)
}

/// Follows the parent's threshold or `sampled` flag, and `root` for spans
/// without a parent.
pub fn consistent_parent_based<S>(root: S) -> ConsistentSampler<ComposableParentThreshold<S>>
where
    S: ComposableSampler,
{
    ConsistentSampler::new(ComposableParentThreshold::new(root))
}

/// Samples the given fraction of traces, clamped to `[0, 1]`.
pub fn consistent_probability_based(
    probability: f64,
) -> ConsistentSampler<ComposableTraceIdRatioBased> {
    ConsistentSampler::new(ComposableTraceIdRatioBased::new(probability))
}
