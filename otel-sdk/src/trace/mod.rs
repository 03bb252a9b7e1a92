//! # Trace sampling
//!
//! Span creation and export are outside this crate. What lives here is the
//! decision made just before a span is created: whether it is recorded, and
//! what the sampler leaves in the span's `TraceState` for downstream
//! participants.
//!
//! [`ConsistentSampler`] implements [`ShouldSample`] on top of a chain of
//! [`ComposableSampler`]s that compute a rejection threshold. The threshold
//! and the trace's random value are recorded in the `ot` member of the trace
//! state, so every participant of a trace reaches the same decision and the
//! adjusted count of a sampled span can be reconstructed.
//!
//! ```
//! use otel_core::trace::{SamplingDecision, SpanKind};
//! use otel_core::TraceId;
//! use otel_sdk::trace::{consistent_probability_based, ShouldSample};
//!
//! let sampler = consistent_probability_based(0.25);
//! let result = sampler.should_sample(
//!     None,
//!     TraceId::from(0x00ff_ffff_ffff_ffff_u128),
//!     "GET /",
//!     &SpanKind::Server,
//!     &[],
//!     &[],
//! );
//! assert_eq!(result.decision, SamplingDecision::RecordAndSample);
//! assert_eq!(result.trace_state.get("ot"), Some("th:c"));
//! ```

mod sampler;

pub use sampler::{
    consistent_always_off, consistent_always_on, consistent_parent_based,
    consistent_probability_based, CloneShouldSample, ComposableAlwaysOff, ComposableAlwaysOn,
    ComposableParentThreshold, ComposableRuleBased, ComposableSampler,
    ComposableTraceIdRatioBased, ConsistentSampler, OtelTraceState, Predicate, SamplingIntent,
    ShouldSample, SpanKindPredicate, SpanNamePredicate, TraceStateUpdate,
    INVALID_RANDOM_VALUE, INVALID_THRESHOLD, MAX_THRESHOLD, MIN_THRESHOLD,
};
