use crate::trace::{TraceError, TraceResult};
use crate::{SpanId, TraceFlags, TraceId};
use std::collections::VecDeque;
use std::str::FromStr;
use thiserror::Error;

/// Vendor-specific trace data, carried as an ordered list of `key=value`
/// members.
///
/// `TraceState` is immutable: `insert` and `delete` return a new value. The
/// most recently inserted member comes first, matching the [W3C rules] for
/// mutating the header.
///
/// [W3C rules]: https://www.w3.org/TR/trace-context/#mutating-the-tracestate-field
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct TraceState(Option<VecDeque<(String, String)>>);

impl TraceState {
    /// The empty `TraceState`, as a constant
    pub const NONE: TraceState = TraceState(None);

    // https://www.w3.org/TR/trace-context/#key
    fn valid_key(key: &str) -> bool {
        if key.is_empty() || key.len() > 256 {
            return false;
        }
        let allowed =
            |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'_' | b'-' | b'*' | b'/');
        let starts_well = |s: &str| {
            s.as_bytes()
                .first()
                .is_some_and(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        };

        match key.split_once('@') {
            None => starts_well(key) && key.bytes().all(allowed),
            Some((tenant, system)) => {
                starts_well(tenant)
                    && tenant.bytes().all(allowed)
                    && starts_well(system)
                    && system.len() <= 14
                    && system.bytes().all(allowed)
            }
        }
    }

    // https://www.w3.org/TR/trace-context/#value
    fn valid_value(value: &str) -> bool {
        value.len() <= 256 && !value.contains(',') && !value.contains('=')
    }

    /// Creates a new `TraceState` from the given key-value collection.
    ///
    /// # Examples
    ///
    /// ```
    /// use otel_core::trace::TraceState;
    ///
    /// let trace_state = TraceState::from_key_value(vec![("foo", "bar"), ("apple", "banana")]).unwrap();
    /// assert_eq!(trace_state.header(), "foo=bar,apple=banana");
    /// ```
    pub fn from_key_value<T, K, V>(trace_state: T) -> TraceResult<Self>
    where
        T: IntoIterator<Item = (K, V)>,
        K: ToString,
        V: ToString,
    {
        let members = trace_state
            .into_iter()
            .map(|(key, value)| {
                let (key, value) = (key.to_string(), value.to_string());
                if !TraceState::valid_key(&key) {
                    return Err(TraceStateError::Key(key));
                }
                if !TraceState::valid_value(&value) {
                    return Err(TraceStateError::Value(value));
                }
                Ok((key, value))
            })
            .collect::<Result<VecDeque<_>, TraceStateError>>()?;

        if members.is_empty() {
            Ok(TraceState(None))
        } else {
            Ok(TraceState(Some(members)))
        }
    }

    /// Retrieves the value of a member if it exists.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.as_ref().and_then(|members| {
            members
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        })
    }

    /// Returns a new `TraceState` with `key` set to `value`, moved to the front.
    ///
    /// Returns an error if the key or value is not valid.
    pub fn insert<K, V>(&self, key: K, value: V) -> TraceResult<TraceState>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let (key, value) = (key.into(), value.into());
        if !TraceState::valid_key(&key) {
            return Err(TraceStateError::Key(key).into());
        }
        if !TraceState::valid_value(&value) {
            return Err(TraceStateError::Value(value).into());
        }

        let mut trace_state = self.without(&key);
        trace_state
            .0
            .get_or_insert_with(|| VecDeque::with_capacity(1))
            .push_front((key, value));
        Ok(trace_state)
    }

    /// Returns a new `TraceState` without the member `key`.
    ///
    /// If the key is not present the returned value equals `self`.
    pub fn delete<K: Into<String>>(&self, key: K) -> TraceResult<TraceState> {
        let key = key.into();
        if !TraceState::valid_key(&key) {
            return Err(TraceStateError::Key(key).into());
        }
        Ok(self.without(&key))
    }

    fn without(&self, key: &str) -> TraceState {
        let mut owned = self.clone();
        if let Some(members) = owned.0.as_mut() {
            members.retain(|(k, _)| k != key);
            if members.is_empty() {
                owned.0 = None;
            }
        }
        owned
    }

    /// Formats the members as a `tracestate` header value.
    pub fn header(&self) -> String {
        self.header_delimited("=", ",")
    }

    /// Formats the members with custom delimiters.
    pub fn header_delimited(&self, entry_delimiter: &str, list_delimiter: &str) -> String {
        self.0
            .as_ref()
            .map(|members| {
                members
                    .iter()
                    .map(|(key, value)| format!("{}{}{}", key, entry_delimiter, value))
                    .collect::<Vec<String>>()
                    .join(list_delimiter)
            })
            .unwrap_or_default()
    }
}

impl FromStr for TraceState {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let members = s
            .split_terminator(',')
            .map(|member| {
                member
                    .split_once('=')
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .ok_or_else(|| TraceStateError::List(member.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        TraceState::from_key_value(members)
    }
}

/// Error returned by `TraceState` operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TraceStateError {
    /// The key is invalid.
    #[error("{0} is not a valid key in TraceState, see https://www.w3.org/TR/trace-context/#key for more details")]
    Key(String),

    /// The value is invalid.
    #[error("{0} is not a valid value in TraceState, see https://www.w3.org/TR/trace-context/#value for more details")]
    Value(String),

    /// The list member has no `=` separator.
    #[error("{0} is not a valid list member in TraceState, see https://www.w3.org/TR/trace-context/#list for more details")]
    List(String),
}

/// Immutable portion of a span which can be serialized and propagated.
#[derive(Clone, Debug, PartialEq, Hash, Eq)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: SpanId,
    trace_flags: TraceFlags,
    is_remote: bool,
    trace_state: TraceState,
}

impl SpanContext {
    /// An invalid span context
    pub const NONE: SpanContext = SpanContext {
        trace_id: TraceId::INVALID,
        span_id: SpanId::INVALID,
        trace_flags: TraceFlags::NOT_SAMPLED,
        is_remote: false,
        trace_state: TraceState::NONE,
    };

    /// Construct a new `SpanContext`
    pub fn new(
        trace_id: TraceId,
        span_id: SpanId,
        trace_flags: TraceFlags,
        is_remote: bool,
        trace_state: TraceState,
    ) -> Self {
        SpanContext {
            trace_id,
            span_id,
            trace_flags,
            is_remote,
            trace_state,
        }
    }

    /// The [`TraceId`] for this span context.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// The [`SpanId`] for this span context.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// Returns details about the trace.
    pub fn trace_flags(&self) -> TraceFlags {
        self.trace_flags
    }

    /// Returns `true` if both the trace id and the span id are non-zero.
    pub fn is_valid(&self) -> bool {
        self.trace_id != TraceId::INVALID && self.span_id != SpanId::INVALID
    }

    /// Returns `true` if the span context was propagated from a remote parent.
    pub fn is_remote(&self) -> bool {
        self.is_remote
    }

    /// Returns `true` if the `sampled` trace flag is set.
    pub fn is_sampled(&self) -> bool {
        self.trace_flags.is_sampled()
    }

    /// A reference to the span context's [`TraceState`].
    pub fn trace_state(&self) -> &TraceState {
        &self.trace_state
    }
}
