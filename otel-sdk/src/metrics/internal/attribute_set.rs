use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use otel_core::KeyValue;

/// A unique set of attributes that can be used as instrument identifiers.
///
/// Keys are sorted and unique; when the input repeats a key the last value
/// wins. The hash is computed once on construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct AttributeSet(Vec<KeyValue>, u64);

impl From<&[KeyValue]> for AttributeSet {
    fn from(values: &[KeyValue]) -> Self {
        let mut sorted = values.to_vec();
        // stable, so equal keys keep their input order
        sorted.sort_by(|a, b| a.key.cmp(&b.key));

        let mut deduped: Vec<KeyValue> = Vec::with_capacity(sorted.len());
        for kv in sorted {
            match deduped.last_mut() {
                Some(last) if last.key == kv.key => *last = kv,
                _ => deduped.push(kv),
            }
        }

        let hash = calculate_hash(&deduped);
        AttributeSet(deduped, hash)
    }
}

fn calculate_hash(values: &[KeyValue]) -> u64 {
    let mut hasher = DefaultHasher::new();
    values.iter().fold(&mut hasher, |hasher, item| {
        item.hash(hasher);
        hasher
    });
    hasher.finish()
}

impl AttributeSet {
    pub(crate) fn to_vec(&self) -> Vec<KeyValue> {
        self.0.clone()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Hash for AttributeSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_does_not_matter() {
        let a = AttributeSet::from(&[KeyValue::new("a", 1_i64), KeyValue::new("b", 2_i64)][..]);
        let b = AttributeSet::from(&[KeyValue::new("b", 2_i64), KeyValue::new("a", 1_i64)][..]);
        assert_eq!(a, b);
        assert_eq!(a.1, b.1);
    }

    #[test]
    fn later_duplicates_win() {
        let set = AttributeSet::from(
            &[
                KeyValue::new("k", "first"),
                KeyValue::new("other", true),
                KeyValue::new("k", "second"),
            ][..],
        );
        assert_eq!(
            set.to_vec(),
            vec![KeyValue::new("k", "second"), KeyValue::new("other", true)]
        );
    }

    #[test]
    fn empty_set() {
        let empty: &[KeyValue] = &[];
        let set = AttributeSet::from(empty);
        assert!(set.is_empty());
        assert_eq!(set, AttributeSet::from(empty));
    }
}
