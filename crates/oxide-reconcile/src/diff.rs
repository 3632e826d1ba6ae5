//! Keyed set differences between two snapshots.
//!
//! The same two operations serve tables, indices and columns: anything kept
//! in a `BTreeMap<String, _>` can be diffed. Results are `BTreeMap`s too, so
//! iteration (and therefore generated SQL) is ordered by name.

use std::collections::BTreeMap;

/// Entries to add and remove to turn `current` into `desired`.
#[derive(Debug, PartialEq, Eq)]
pub struct Delta<'a, V> {
    /// Present in `desired`, absent from `current`.
    pub to_add: BTreeMap<&'a str, &'a V>,
    /// Present in `current`, absent from `desired`.
    pub to_remove: BTreeMap<&'a str, &'a V>,
}

impl<V> Delta<'_, V> {
    /// Returns true when both sides match by key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Computes the keyed difference between `desired` and `current`.
#[must_use]
pub fn diff<'a, V>(
    desired: &'a BTreeMap<String, V>,
    current: &'a BTreeMap<String, V>,
) -> Delta<'a, V> {
    let to_add = desired
        .iter()
        .filter(|(k, _)| !current.contains_key(*k))
        .map(|(k, v)| (k.as_str(), v))
        .collect();

    let to_remove = current
        .iter()
        .filter(|(k, _)| !desired.contains_key(*k))
        .map(|(k, v)| (k.as_str(), v))
        .collect();

    Delta { to_add, to_remove }
}

/// Keys present in both maps, in ascending order.
///
/// Only names are compared; no check is made that the values are
/// compatible.
#[must_use]
pub fn intersect_keys<A, B>(a: &BTreeMap<String, A>, b: &BTreeMap<String, B>) -> Vec<String> {
    a.keys().filter(|k| b.contains_key(*k)).cloned().collect()
}

/// Keys of `a` that `b` also holds when compared ignoring ASCII case, in
/// ascending order and spelled as in `a`.
///
/// SQLite resolves identifiers case-insensitively, so `Name` and `name` are
/// the same column to a `SELECT`.
#[must_use]
pub fn intersect_keys_ignore_case<A, B>(
    a: &BTreeMap<String, A>,
    b: &BTreeMap<String, B>,
) -> Vec<String> {
    a.keys()
        .filter(|k| b.keys().any(|other| other.eq_ignore_ascii_case(k)))
        .cloned()
        .collect()
}
