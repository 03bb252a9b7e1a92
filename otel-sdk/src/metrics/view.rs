use otel_core::otel_warn;
use regex::Regex;

use super::instrument::{Instrument, Stream};
use crate::metrics::{MetricError, MetricResult};

/// Used to customize the metrics that are output by the SDK.
///
/// Here are some examples when a [View] might be needed:
///
/// * Customize which Instruments are to be processed/ignored. For example, an
///   instrumented library can provide both temperature and humidity, but the
///   application developer might only want temperature.
/// * Customize the aggregation - if the default aggregation associated with the
///   [Instrument] does not meet the needs of the user. For example, an HTTP client
///   library might expose HTTP client request duration as Histogram by default,
///   but the application developer might only want the total count of outgoing
///   requests.
/// * Customize which attribute(s) are to be reported on metrics. For example,
///   an HTTP server library might expose HTTP verb and status code while the
///   application developer only cares about the status code.
///
/// # Example Custom View
///
/// View is implemented for all `Fn(&Instrument) -> Option<Stream>`.
///
/// ```
/// use otel_sdk::metrics::{Instrument, SdkMeterProvider, Stream};
///
/// // return streams for the given instrument
/// let my_view = |i: &Instrument| {
///   // return Some(Stream) or
///   None
/// };
///
/// let provider = SdkMeterProvider::builder().with_view(my_view).build();
/// # drop(provider)
/// ```
pub trait View: Send + Sync + 'static {
    /// Defines how data should be collected for certain instruments.
    ///
    /// Return [Stream] to use for matching [Instrument]s,
    /// otherwise if there is no match, return `None`.
    fn match_inst(&self, inst: &Instrument) -> Option<Stream>;
}

impl<T> View for T
where
    T: Fn(&Instrument) -> Option<Stream> + Send + Sync + 'static,
{
    fn match_inst(&self, inst: &Instrument) -> Option<Stream> {
        self(inst)
    }
}

impl View for Box<dyn View> {
    fn match_inst(&self, inst: &Instrument) -> Option<Stream> {
        (**self).match_inst(inst)
    }
}

fn empty_view(_inst: &Instrument) -> Option<Stream> {
    None
}

/// Translates a `*`/`?` pattern into an anchored regular expression.
fn wildcard_regex(pattern: &str) -> MetricResult<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 2);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            c => expr.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|err| MetricError::Config(format!("invalid view name: {err}")))
}

/// Creates a [View] that applies the [Stream] mask for all instruments that
/// match criteria.
///
/// The returned [View] will only apply the mask if all non-empty fields of
/// criteria match the corresponding [Instrument] passed to the view. If all
/// fields of the criteria are their default values, a view that matches no
/// instruments is returned. If you need to match an empty-value field, create a
/// [View] directly.
///
/// The [Instrument::name] field of criteria supports wildcard pattern matching.
/// The wildcard `*` is recognized as matching zero or more characters, and `?`
/// is recognized as matching exactly one character. For example, a pattern of
/// `*` will match all instrument names.
///
/// The [Stream] mask only applies updates for non-empty fields. By default, the
/// [Instrument] the [View] matches against will be use for the name,
/// description, and unit of the returned [Stream] and no `aggregation` or
/// `allowed_attribute_keys` are set. All non-empty fields of mask are used
/// instead of the default. If you need to set a an empty value in the returned
/// stream, create a custom [View] directly.
///
/// # Errors
///
/// A wildcard name combined with a mask that renames the stream would make
/// every matched instrument produce the same stream, and is rejected. An
/// invalid mask aggregation is rejected as well.
///
/// # Example
///
/// ```
/// use otel_sdk::metrics::{new_view, Aggregation, Instrument, Stream};
///
/// let criteria = Instrument::new().name("counter_*");
/// let mask = Stream::new().aggregation(Aggregation::Sum);
///
/// let view = new_view(criteria, mask);
/// # drop(view);
/// ```
pub fn new_view(criteria: Instrument, mask: Stream) -> MetricResult<Box<dyn View>> {
    if criteria.is_empty() {
        otel_warn!(
            name: "View.NoCriteria",
            message = "no criteria provided, the view matches no instrument"
        );
        return Ok(Box::new(empty_view));
    }

    let contains_wildcard = criteria.name.contains(['*', '?']);
    if contains_wildcard && !mask.name.is_empty() {
        return Err(MetricError::Config(format!(
            "name replacement for multiple instruments, dropping view, criteria: {:?}, mask: {:?}",
            criteria.name, mask.name
        )));
    }

    let name_matcher: Box<dyn Fn(&str) -> bool + Send + Sync> = if contains_wildcard {
        let pattern = wildcard_regex(&criteria.name)?;
        Box::new(move |name| pattern.is_match(name))
    } else if criteria.name.is_empty() {
        Box::new(|_| true)
    } else {
        let expected = criteria.name.clone();
        Box::new(move |name| name == expected)
    };

    if let Some(agg) = &mask.aggregation {
        agg.validate()?;
    }

    Ok(Box::new(move |i: &Instrument| -> Option<Stream> {
        let matched = name_matcher(&i.name)
            && criteria.matches_description(i)
            && criteria.matches_kind(i)
            && criteria.matches_unit(i)
            && criteria.matches_scope(i);
        if !matched {
            return None;
        }

        Some(Stream {
            name: if mask.name.is_empty() {
                i.name.clone()
            } else {
                mask.name.clone()
            },
            description: if mask.description.is_empty() {
                i.description.clone()
            } else {
                mask.description.clone()
            },
            unit: if mask.unit.is_empty() {
                i.unit.clone()
            } else {
                mask.unit.clone()
            },
            aggregation: mask.aggregation.clone(),
            allowed_attribute_keys: mask.allowed_attribute_keys.clone(),
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Aggregation, InstrumentKind};
    use otel_core::InstrumentationScope;
    use rstest::rstest;

    fn instrument(name: &'static str) -> Instrument {
        Instrument::new()
            .name(name)
            .kind(InstrumentKind::Counter)
            .unit("ms")
            .scope(InstrumentationScope::builder("meter").with_version("1.0").build())
    }

    #[rstest]
    #[case("requests", "requests", true)]
    #[case("requests", "Requests", false)]
    #[case("req*", "requests", true)]
    #[case("req*", "req", true)]
    #[case("*", "anything.at/all", true)]
    #[case("re?uests", "requests", true)]
    #[case("re?uests", "reuests", false)]
    #[case("http.*.duration", "http.server.duration", true)]
    #[case("http.*", "httpXserver", false)]
    fn matches_names(#[case] pattern: &'static str, #[case] name: &'static str, #[case] hit: bool) {
        let view = new_view(Instrument::new().name(pattern), Stream::new()).unwrap();
        assert_eq!(view.match_inst(&instrument(name)).is_some(), hit);
    }

    #[test]
    fn mask_overrides_non_empty_fields() {
        let view = new_view(
            Instrument::new().name("requests"),
            Stream::new()
                .name("renamed")
                .aggregation(Aggregation::Drop),
        )
        .unwrap();

        let stream = view.match_inst(&instrument("requests")).unwrap();
        assert_eq!(stream.name, "renamed");
        assert_eq!(stream.unit, "ms");
        assert_eq!(stream.aggregation, Some(Aggregation::Drop));
    }

    #[test]
    fn wildcard_with_rename_is_rejected() {
        let result = new_view(Instrument::new().name("req*"), Stream::new().name("renamed"));
        assert!(matches!(result, Err(MetricError::Config(_))));
    }

    #[test]
    fn invalid_mask_aggregation_is_rejected() {
        let result = new_view(
            Instrument::new().name("requests"),
            Stream::new().aggregation(Aggregation::ExplicitBucketHistogram {
                boundaries: vec![10.0, 1.0],
                record_min_max: true,
            }),
        );
        assert!(result.is_err());
    }

    #[test]
    fn empty_criteria_match_nothing() {
        let view = new_view(Instrument::new(), Stream::new()).unwrap();
        assert!(view.match_inst(&instrument("requests")).is_none());
    }

    #[test]
    fn filters_by_kind_unit_and_meter() {
        let inst = instrument("requests");
        let hit = |criteria: Instrument| {
            new_view(criteria, Stream::new())
                .unwrap()
                .match_inst(&inst)
                .is_some()
        };

        assert!(hit(Instrument::new().kind(InstrumentKind::Counter)));
        assert!(!hit(Instrument::new().kind(InstrumentKind::Histogram)));
        assert!(!hit(Instrument::new().name("requests").unit("s")));
        assert!(hit(Instrument::new().scope(InstrumentationScope::builder("meter").build())));
        assert!(!hit(Instrument::new().scope(InstrumentationScope::builder("other").build())));
        assert!(!hit(Instrument::new().scope(
            InstrumentationScope::builder("meter")
                .with_schema_url("https://example.com/1.0")
                .build()
        )));
    }
}
