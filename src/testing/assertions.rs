//! Assertion functions for comparing pipeline outputs with expected values.

use crate::types::compare_values;
use crate::value::Value;
use std::collections::BTreeMap;

fn sorted(values: &[Value]) -> Vec<Value> {
    let mut v = values.to_vec();
    v.sort_by(compare_values);
    v
}

/// Assert that two element lists are equal in order and content.
///
/// # Panics
///
/// Panics if the lists differ in length or at any index.
///
/// # Example
///
/// ```
/// use ironcrunch::Value;
/// use ironcrunch::testing::assert_collections_equal;
///
/// assert_collections_equal(&[Value::Long(1), Value::Long(2)], &[Value::Long(1), Value::Long(2)]);
/// ```
pub fn assert_collections_equal(actual: &[Value], expected: &[Value]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "Collection length mismatch:\n  Expected length: {}\n  Actual length: {}\n  Expected: {expected:?}\n  Actual: {actual:?}",
        expected.len(),
        actual.len()
    );

    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert_eq!(
            a, e,
            "Collection mismatch at index {i}:\n  Expected: {e:?}\n  Actual: {a:?}\n  Full expected: {expected:?}\n  Full actual: {actual:?}"
        );
    }
}

/// Assert that two element lists hold the same multiset of values.
///
/// Both sides are sorted with [`compare_values`] first, so duplicates count.
///
/// # Panics
///
/// Panics if the lists differ once sorted.
pub fn assert_collections_unordered_equal(actual: &[Value], expected: &[Value]) {
    let a = sorted(actual);
    let e = sorted(expected);
    if a != e {
        let missing: Vec<_> = e.iter().filter(|v| !a.contains(v)).collect();
        let extra: Vec<_> = a.iter().filter(|v| !e.contains(v)).collect();
        panic!(
            "Collection content mismatch:\n  Missing elements: {missing:?}\n  Extra elements: {extra:?}\n  Expected: {expected:?}\n  Actual: {actual:?}"
        );
    }
}

/// Assert that two tables are equal after sorting rows by key, then value.
///
/// # Panics
///
/// Panics if any element is not a pair or the sorted rows differ.
pub fn assert_kv_collections_equal(actual: &[Value], expected: &[Value]) {
    for v in actual.iter().chain(expected) {
        assert!(v.as_pair().is_some(), "Expected a key-value pair, got {v:?}");
    }
    assert_collections_equal(&sorted(actual), &sorted(expected));
}

/// Collect a `table<string, long>` into a map, for terse assertions.
///
/// # Panics
///
/// Panics on a row that is not a `(string, long)` pair, or on a repeated key.
#[must_use]
pub fn long_table(rows: &[Value]) -> BTreeMap<String, i64> {
    let mut out = BTreeMap::new();
    for row in rows {
        let Some((k, v)) = row.as_pair() else {
            panic!("Expected a key-value pair, got {row:?}");
        };
        let (Some(k), Some(v)) = (k.as_str(), v.as_long()) else {
            panic!("Expected a (string, long) row, got {row:?}");
        };
        let prev = out.insert(k.to_string(), v);
        assert!(prev.is_none(), "Duplicate key {k:?} in {rows:?}");
    }
    out
}

/// Assert that all elements satisfy `predicate`.
///
/// # Panics
///
/// Panics naming the first element that fails.
pub fn assert_all(collection: &[Value], predicate: impl Fn(&Value) -> bool) {
    for (i, item) in collection.iter().enumerate() {
        assert!(
            predicate(item),
            "Predicate failed for element at index {i}: {item:?}\n  Full collection: {collection:?}"
        );
    }
}

/// Assert that `collection` contains `element`.
///
/// # Panics
///
/// Panics if it does not.
pub fn assert_contains(collection: &[Value], element: &Value) {
    assert!(
        collection.contains(element),
        "Collection does not contain expected element:\n  Looking for: {element:?}\n  Collection: {collection:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unordered_counts_duplicates() {
        let a = [Value::Long(2), Value::Long(1), Value::Long(1)];
        assert_collections_unordered_equal(&a, &[Value::Long(1), Value::Long(1), Value::Long(2)]);
    }

    #[test]
    #[should_panic(expected = "content mismatch")]
    fn unordered_detects_multiplicity() {
        let a = [Value::Long(1), Value::Long(2), Value::Long(2)];
        assert_collections_unordered_equal(&a, &[Value::Long(1), Value::Long(1), Value::Long(2)]);
    }

    #[test]
    fn long_table_collects_rows() {
        let rows = [Value::pair("b", 2i64), Value::pair("a", 1i64)];
        let t = long_table(&rows);
        assert_eq!(t.get("a"), Some(&1));
        assert_eq!(t.len(), 2);
    }
}
