use otel_core::trace::TraceState;

use super::{is_valid_random_value, is_valid_threshold, INVALID_RANDOM_VALUE, INVALID_THRESHOLD, MAX_THRESHOLD};

pub(super) const TRACE_STATE_KEY: &str = "ot";

const THRESHOLD_KEY: &str = "th";
const RANDOM_VALUE_KEY: &str = "rv";
const MAX_VALUE_LENGTH: usize = 256;
// 56 bits
const MAX_HEX_DIGITS: usize = 14;

/// The content of the `ot` trace state member.
///
/// Sub-keys are separated by `;`. `th` holds the rejection threshold with
/// trailing zeros removed and `rv` the random value, written as 14 hex digits
/// and read back from at most 14.
/// Unknown sub-keys are kept in order in `rest`.
///
/// ```
/// use otel_core::trace::TraceState;
/// use otel_sdk::trace::OtelTraceState;
///
/// let trace_state: TraceState = "ot=th:c;rv:d6e0a4f02cbd12;x:1".parse().unwrap();
/// let ot = OtelTraceState::parse(&trace_state);
/// assert_eq!(ot.threshold, 0xc0_0000_0000_0000);
/// assert_eq!(ot.random_value, 0xd6_e0a4_f02c_bd12);
/// assert_eq!(ot.rest, vec!["x:1".to_string()]);
/// assert_eq!(ot.serialize(), "th:c;rv:d6e0a4f02cbd12;x:1");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtelTraceState {
    /// The threshold, or [`INVALID_THRESHOLD`].
    pub threshold: i64,
    /// The random value, or [`INVALID_RANDOM_VALUE`].
    pub random_value: i64,
    /// Other sub-keys, as `key:value`.
    pub rest: Vec<String>,
}

impl Default for OtelTraceState {
    fn default() -> Self {
        OtelTraceState {
            threshold: INVALID_THRESHOLD,
            random_value: INVALID_RANDOM_VALUE,
            rest: Vec::new(),
        }
    }
}

impl OtelTraceState {
    /// Reads the `ot` member of `trace_state`.
    ///
    /// A malformed `th` or `rv` value is treated as absent.
    pub fn parse(trace_state: &TraceState) -> Self {
        let mut state = OtelTraceState::default();
        let Some(ot) = trace_state.get(TRACE_STATE_KEY) else {
            return state;
        };

        for member in ot.split(';').filter(|m| !m.is_empty()) {
            match member.split_once(':') {
                Some((THRESHOLD_KEY, value)) => state.threshold = parse_th(value),
                Some((RANDOM_VALUE_KEY, value)) => state.random_value = parse_rv(value),
                _ => state.rest.push(member.to_string()),
            }
        }
        state
    }

    /// Formats the `ot` member value. Returns an empty string when there is
    /// nothing to record.
    ///
    /// The threshold is left out when invalid or equal to [`MAX_THRESHOLD`],
    /// and the random value when invalid. Trailing sub-keys are removed until
    /// the value fits in 256 characters.
    pub fn serialize(&self) -> String {
        let mut members = Vec::with_capacity(2 + self.rest.len());
        if is_valid_threshold(self.threshold) && self.threshold != MAX_THRESHOLD {
            members.push(format!("{THRESHOLD_KEY}:{}", serialize_th(self.threshold)));
        }
        if is_valid_random_value(self.random_value) {
            members.push(format!(
                "{RANDOM_VALUE_KEY}:{:0width$x}",
                self.random_value,
                width = MAX_HEX_DIGITS
            ));
        }
        members.extend(self.rest.iter().cloned());

        let mut value = members.join(";");
        while value.len() > MAX_VALUE_LENGTH {
            match value.rfind(';') {
                Some(idx) => value.truncate(idx),
                None => break,
            }
        }
        value
    }
}

/// `0` for the minimum threshold, otherwise 14 hex digits without trailing
/// zeros.
pub(super) fn serialize_th(threshold: i64) -> String {
    if threshold == 0 {
        return "0".to_string();
    }
    let digits = format!("{threshold:0width$x}", width = MAX_HEX_DIGITS);
    digits.trim_end_matches('0').to_string()
}

fn parse_th(value: &str) -> i64 {
    if value.is_empty() || value.len() > MAX_HEX_DIGITS {
        return INVALID_THRESHOLD;
    }
    match i64::from_str_radix(value, 16) {
        // restore the trimmed zeros
        Ok(parsed) if parsed >= 0 => parsed << ((MAX_HEX_DIGITS - value.len()) * 4),
        _ => INVALID_THRESHOLD,
    }
}

fn parse_rv(value: &str) -> i64 {
    if value.is_empty()
        || value.len() > MAX_HEX_DIGITS
        || !value.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return INVALID_RANDOM_VALUE;
    }
    match i64::from_str_radix(value, 16) {
        Ok(parsed) if parsed >= 0 => parsed,
        _ => INVALID_RANDOM_VALUE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ot(value: &str) -> OtelTraceState {
        let trace_state = TraceState::from_key_value([(TRACE_STATE_KEY, value)]).unwrap();
        OtelTraceState::parse(&trace_state)
    }

    #[rstest]
    #[case(0, "0")]
    #[case(0x80_0000_0000_0000, "8")]
    #[case(0xc0_0000_0000_0000, "c")]
    #[case(0xff_ffff_ffff_ffff, "ffffffffffffff")]
    #[case(0x0a_0000_0000_0000, "0a")]
    #[case(1, "00000000000001")]
    fn threshold_formatting(#[case] threshold: i64, #[case] expected: &str) {
        assert_eq!(serialize_th(threshold), expected);
        assert_eq!(parse_th(expected), threshold);
    }

    #[rstest]
    #[case("", INVALID_THRESHOLD)]
    #[case("123456789abcdef", INVALID_THRESHOLD)]
    #[case("xyz", INVALID_THRESHOLD)]
    #[case("-1", INVALID_THRESHOLD)]
    #[case("1", 0x10_0000_0000_0000)]
    fn threshold_parsing(#[case] value: &str, #[case] expected: i64) {
        assert_eq!(parse_th(value), expected);
    }

    #[rstest]
    #[case("00000000000000", 0)]
    #[case("ffffffffffffff", 0xff_ffff_ffff_ffff)]
    #[case("fffffffffffff", 0xf_ffff_ffff_ffff)]
    #[case("1", 1)]
    #[case("0123456789abcd", 0x01_2345_6789_abcd)]
    #[case("fffffffffffffff", INVALID_RANDOM_VALUE)]
    #[case("zzzzzzzzzzzzzz", INVALID_RANDOM_VALUE)]
    #[case("", INVALID_RANDOM_VALUE)]
    #[case("-1", INVALID_RANDOM_VALUE)]
    #[case("+1", INVALID_RANDOM_VALUE)]
    fn random_value_parsing(#[case] value: &str, #[case] expected: i64) {
        assert_eq!(parse_rv(value), expected);
    }

    #[test]
    fn missing_member_is_invalid() {
        let state = OtelTraceState::parse(&TraceState::NONE);
        assert_eq!(state, OtelTraceState::default());
        assert_eq!(state.serialize(), "");
    }

    #[test]
    fn unknown_and_malformed_members() {
        let state = ot("a:1;th:zz;rv:xyz;b:2");
        assert_eq!(state.threshold, INVALID_THRESHOLD);
        assert_eq!(state.random_value, INVALID_RANDOM_VALUE);
        assert_eq!(state.rest, vec!["a:1", "b:2"]);
        assert_eq!(state.serialize(), "a:1;b:2");
    }

    #[test]
    fn short_random_value_is_read_from_trace_state() {
        let state = ot("rv:ff;x:1");
        assert_eq!(state.random_value, 0xff);
        assert_eq!(state.serialize(), "rv:000000000000ff;x:1");
    }

    #[test]
    fn max_threshold_is_not_recorded() {
        let state = OtelTraceState {
            threshold: MAX_THRESHOLD,
            random_value: 5,
            rest: Vec::new(),
        };
        assert_eq!(state.serialize(), "rv:00000000000005");
    }

    #[test]
    fn parse_serialize_round_trip() {
        let state = OtelTraceState {
            threshold: 0x12_3400_0000_0000,
            random_value: 0x00_0000_0000_00ff,
            rest: vec!["k:v".to_string()],
        };
        let trace_state = TraceState::from_key_value([(TRACE_STATE_KEY, state.serialize())]).unwrap();
        assert_eq!(OtelTraceState::parse(&trace_state), state);
    }

    #[test]
    fn long_values_are_truncated_at_separators() {
        let rest: Vec<String> = (0..40).map(|i| format!("k{i}:abcdef")).collect();
        let state = OtelTraceState {
            threshold: 0,
            random_value: INVALID_RANDOM_VALUE,
            rest,
        };
        let serialized = state.serialize();
        assert!(serialized.len() <= 256);
        assert!(serialized.starts_with("th:0;k0:abcdef"));
        assert!(!serialized.ends_with(';'));
    }
}
