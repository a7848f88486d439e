//! Flat key -> tensor mappings and ownership-passing partition helpers

use crate::Tensor;
use std::collections::BTreeMap;

/// Serialized adapter state, ordered by key.
pub type StateDict = BTreeMap<String, Tensor>;

/// Split `dict` into the entries under `prefix` (prefix stripped) and the rest.
///
/// Takes the dictionary by value and hands back the remainder, so a caller
/// feeding several consumers in turn can see exactly what each one took.
pub fn partition_prefixed(dict: StateDict, prefix: &str) -> (StateDict, StateDict) {
    let mut taken = StateDict::new();
    let mut rest = StateDict::new();
    for (key, tensor) in dict {
        match key.strip_prefix(prefix) {
            Some(stripped) => {
                taken.insert(stripped.to_string(), tensor);
            }
            None => {
                rest.insert(key, tensor);
            }
        }
    }
    (taken, rest)
}

/// Re-attach `prefix` to every key of `dict`.
pub fn with_prefix(dict: StateDict, prefix: &str) -> StateDict {
    dict.into_iter().map(|(k, v)| (format!("{prefix}{k}"), v)).collect()
}

/// Whether any key lives under `prefix`.
pub fn has_prefix(dict: &StateDict, prefix: &str) -> bool {
    dict.range(prefix.to_string()..).next().is_some_and(|(k, _)| k.starts_with(prefix))
}
