use crate::trace::SpanContext;

/// Execution-scoped values passed to samplers.
///
/// Only the parent span is carried: this crate does not implement in-process
/// context propagation, callers build a `Context` explicitly.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Context {
    span: Option<SpanContext>,
}

impl Context {
    /// An empty context, with no parent span.
    pub fn new() -> Self {
        Context::default()
    }

    /// Returns a copy of this context with the given remote span context as parent.
    pub fn with_remote_span_context(&self, span_context: SpanContext) -> Self {
        Context {
            span: Some(span_context),
        }
    }

    /// Returns `true` if a parent span has been set.
    pub fn has_active_span(&self) -> bool {
        self.span.is_some()
    }

    /// The parent span context, or [`SpanContext::NONE`].
    pub fn span_context(&self) -> &SpanContext {
        self.span.as_ref().unwrap_or(&SpanContext::NONE)
    }
}
