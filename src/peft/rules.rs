//! Per-layer rank/alpha overrides resolved by glob pattern
//!
//! When several patterns match a layer name the longest pattern wins.
//! Patterns of equal length keep their insertion order, so a `BTreeMap`
//! source resolves ties lexicographically.

use super::glob::GlobPattern;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Partial hyperparameters for the layers a pattern matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f32>,
}

impl LayerOverride {
    pub fn rank(rank: usize) -> Self {
        Self { rank: Some(rank), alpha: None }
    }

    pub fn alpha(alpha: f32) -> Self {
        Self { rank: None, alpha: Some(alpha) }
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = Some(alpha);
        self
    }
}

/// Pattern table mapping glob -> override, glob-string form.
pub type OverrideMap = BTreeMap<String, LayerOverride>;

/// Compiled override table.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<(GlobPattern, LayerOverride)>,
}

impl RuleSet {
    /// Compile `(pattern, override)` pairs.
    pub fn new<I, S>(rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, LayerOverride)>,
        S: AsRef<str>,
    {
        let mut compiled = rules
            .into_iter()
            .map(|(p, o)| Ok((GlobPattern::new(p.as_ref())?, o)))
            .collect::<Result<Vec<_>>>()?;
        // Stable: equal lengths keep insertion order.
        compiled.sort_by_key(|(p, _)| std::cmp::Reverse(p.as_str().chars().count()));
        Ok(Self { rules: compiled })
    }

    pub fn from_map(map: &OverrideMap) -> Result<Self> {
        Self::new(map.iter().map(|(k, v)| (k.as_str(), *v)))
    }

    /// Global overrides merged with a preset's; the preset replaces any pattern it defines.
    pub fn merged(global: &OverrideMap, preset: &OverrideMap) -> Result<Self> {
        let mut merged = global.clone();
        merged.extend(preset.iter().map(|(k, v)| (k.clone(), *v)));
        Self::from_map(&merged)
    }

    /// Override of the longest pattern matching `name`.
    pub fn match_layer(&self, name: &str) -> Option<&LayerOverride> {
        self.rules.iter().find(|(p, _)| p.matches(name)).map(|(_, o)| o)
    }

    /// `(rank, alpha)` for `name`, falling back to the defaults field by field.
    pub fn resolve(&self, name: &str, default_rank: usize, default_alpha: f32) -> (usize, f32) {
        match self.match_layer(name) {
            Some(o) => (o.rank.unwrap_or(default_rank), o.alpha.unwrap_or(default_alpha)),
            None => (default_rank, default_alpha),
        }
    }

    /// Patterns in match order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|(p, _)| p.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn map(entries: &[(&str, LayerOverride)]) -> OverrideMap {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_longest_pattern_wins() {
        let rules = RuleSet::from_map(&map(&[
            ("*", LayerOverride::rank(2)),
            ("*attn*", LayerOverride::rank(8)),
            ("*attn1.to_q", LayerOverride::rank(32)),
        ]))
        .unwrap();

        assert_eq!(rules.match_layer("blocks.0.attn1.to_q").unwrap().rank, Some(32));
        assert_eq!(rules.match_layer("blocks.0.attn1.to_k").unwrap().rank, Some(8));
        assert_eq!(rules.match_layer("blocks.0.ff.net").unwrap().rank, Some(2));
    }

    #[test]
    fn test_no_match_returns_none() {
        let rules = RuleSet::from_map(&map(&[("a.1", LayerOverride::rank(16))])).unwrap();
        assert!(rules.match_layer("a.0").is_none());
        assert_eq!(rules.resolve("a.0", 4, 8.0), (4, 8.0));
    }

    #[test]
    fn test_partial_override_falls_back_per_field() {
        let rules = RuleSet::from_map(&map(&[
            ("a.1", LayerOverride::rank(16)),
            ("a.2", LayerOverride::alpha(1.0)),
        ]))
        .unwrap();
        assert_eq!(rules.resolve("a.1", 4, 8.0), (16, 8.0));
        assert_eq!(rules.resolve("a.2", 4, 8.0), (4, 1.0));
    }

    #[test]
    fn test_equal_length_ties_keep_key_order() {
        let rules = RuleSet::from_map(&map(&[
            ("a.?", LayerOverride::rank(1)),
            ("?.0", LayerOverride::rank(2)),
        ]))
        .unwrap();
        // BTreeMap order: "?.0" < "a.?"
        assert_eq!(rules.match_layer("a.0").unwrap().rank, Some(2));
    }

    #[test]
    fn test_preset_replaces_global_pattern() {
        let global = map(&[("*", LayerOverride::rank(4)), ("a.*", LayerOverride::rank(8))]);
        let preset = map(&[("a.*", LayerOverride::alpha(2.0))]);
        let rules = RuleSet::merged(&global, &preset).unwrap();
        assert_eq!(rules.len(), 2);
        // Whole override replaced: the rank from the global entry is gone.
        assert_eq!(rules.resolve("a.0", 1, 1.0), (1, 2.0));
        assert_eq!(rules.resolve("b.0", 1, 1.0), (4, 1.0));
    }

    #[test]
    fn test_override_deserializes_partial_fields() {
        let parsed: OverrideMap = serde_json::from_str(r#"{"a.1": {"rank": 16}}"#).unwrap();
        assert_eq!(parsed["a.1"], LayerOverride::rank(16));
        let bad: std::result::Result<OverrideMap, _> =
            serde_json::from_str(r#"{"a.1": {"rnak": 16}}"#);
        assert!(bad.is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        /// The chosen override belongs to a matching pattern of maximal length
        #[test]
        fn prop_match_is_longest_matching(
            patterns in proptest::collection::btree_map("[ab.*?]{1,6}", 1usize..64, 1..8),
            name in "[ab.]{1,8}",
        ) {
            let overrides: OverrideMap =
                patterns.iter().map(|(k, r)| (k.clone(), LayerOverride::rank(*r))).collect();
            let rules = RuleSet::from_map(&overrides).unwrap();

            let matching: Vec<(&String, usize)> = patterns
                .iter()
                .filter(|(p, _)| GlobPattern::new(p).unwrap().matches(&name))
                .map(|(p, r)| (p, *r))
                .collect();

            match rules.match_layer(&name) {
                None => prop_assert!(matching.is_empty()),
                Some(found) => {
                    let longest = matching.iter().map(|(p, _)| p.chars().count()).max().unwrap();
                    let candidates: Vec<usize> = matching
                        .iter()
                        .filter(|(p, _)| p.chars().count() == longest)
                        .map(|(_, r)| *r)
                        .collect();
                    prop_assert!(candidates.contains(&found.rank.unwrap()));
                }
            }
        }
    }
}
