//! Trace primitives consumed by samplers.
//!
//! Span creation and propagation formats live outside this workspace; what
//! remains is the identity of a span ([`SpanContext`]), its vendor state
//! ([`TraceState`]) and the vocabulary of a sampling decision.

use crate::KeyValue;
use thiserror::Error;

mod ids;
mod span_context;

pub use ids::{SpanId, TraceFlags, TraceId};
pub use span_context::{SpanContext, TraceState, TraceStateError};

/// Describe the result of operations in tracing API.
pub type TraceResult<T> = Result<T, TraceError>;

/// Errors returned by the trace API.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TraceError {
    /// A `TraceState` member was rejected.
    #[error(transparent)]
    TraceState(#[from] TraceStateError),

    /// Other errors propagated from the trace SDK.
    #[error("{0}")]
    Other(String),
}

/// The role of a span within a trace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum SpanKind {
    /// Synchronous request handled by a server.
    Server,
    /// Synchronous request issued by a client.
    Client,
    /// Asynchronous message produced.
    Producer,
    /// Asynchronous message consumed.
    Consumer,
    /// Internal operation.
    #[default]
    Internal,
}

/// A pointer from the current span to another span.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct Link {
    /// The span context of the linked span.
    pub span_context: SpanContext,
    /// Attributes describing this link.
    pub attributes: Vec<KeyValue>,
}

impl Link {
    /// Create a new link.
    pub fn new(span_context: SpanContext, attributes: Vec<KeyValue>) -> Self {
        Link {
            span_context,
            attributes,
        }
    }

    /// Create a new link with no attributes.
    pub fn with_context(span_context: SpanContext) -> Self {
        Link::new(span_context, Vec::new())
    }
}

/// Decision produced by a sampler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SamplingDecision {
    /// The span is neither recorded nor sampled.
    Drop,
    /// The span is recorded but the `sampled` flag is not set, so it is not exported.
    RecordOnly,
    /// The span is recorded and the `sampled` flag is set.
    RecordAndSample,
}

/// The result of sampling logic for a given span.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplingResult {
    /// The decision about whether or not to sample.
    pub decision: SamplingDecision,

    /// Extra attributes to be added to the span by the sampler
    pub attributes: Vec<KeyValue>,

    /// Trace state from the parent context, possibly updated by the sampler.
    pub trace_state: TraceState,
}
