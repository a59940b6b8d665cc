//! Constructors and aliases for the maps used throughout flowloom.
//!
//! The crate standardizes on [`FxHashMap`] for internal keyed data (the
//! keys are short strings and the maps are small, so the faster
//! non-cryptographic hash is the right default).

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

/// A keyed map of opaque JSON values, the currency of node configs,
/// result metadata, and context seeds.
pub type ValueMap = FxHashMap<String, Value>;

/// Create an empty [`ValueMap`].
#[must_use]
pub fn new_value_map() -> ValueMap {
    FxHashMap::default()
}

/// Create a [`ValueMap`] from an iterator of `(key, value)` pairs.
pub fn value_map_from<I, K>(pairs: I) -> ValueMap
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Create an empty string set.
#[must_use]
pub fn new_string_set() -> FxHashSet<String> {
    FxHashSet::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_map_from_pairs() {
        let m = value_map_from([("a", json!(1)), ("b", json!("two"))]);
        assert_eq!(m.len(), 2);
        assert_eq!(m["a"], json!(1));
    }
}
