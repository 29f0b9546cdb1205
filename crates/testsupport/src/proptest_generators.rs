//! Property-based test generators using proptest.

use proptest::prelude::*;

/// Strategy for generating key/value entry sets with distinct keys.
///
/// # Example
///
/// ```
/// use proptest::prelude::*;
/// use testsupport::proptest_generators::arb_entries;
///
/// proptest! {
///     #[test]
///     fn keys_are_distinct(entries in arb_entries(64)) {
///         let mut keys: Vec<i64> = entries.iter().map(|(k, _)| *k).collect();
///         keys.sort_unstable();
///         keys.dedup();
///         assert_eq!(keys.len(), entries.len());
///     }
/// }
/// ```
pub fn arb_entries(max: usize) -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::btree_map(any::<i64>(), any::<i64>(), 0..max)
        .prop_map(|m| m.into_iter().collect())
}

/// Strategy for short lowercase identifiers, handy as string keys.
pub fn arb_word() -> impl Strategy<Value = String> {
    "[a-z]{1,12}"
}
