//! Tag-matching rule engine
//!
//! Rules are evaluated in declaration order and the first match wins. A rule
//! matches when any of its OR pairs equals the element's tag value, or when its
//! AND pairs are non-empty and all of them match. Value comparison is exact and
//! case-sensitive.

use crate::config::{MappingConfig, SourceItem, TagPair};
use crate::taxonomy::Taxonomy;
use std::collections::BTreeMap;

/// Type assigned to elements that no rule matches
pub const GENERIC_TYPE_ID: &str = "generic";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub target_type_id: String,
    pub or_pairs: Vec<TagPair>,
    pub and_pairs: Vec<TagPair>,
}

impl Rule {
    pub fn new(
        target_type_id: impl Into<String>,
        or_pairs: Vec<TagPair>,
        and_pairs: Vec<TagPair>,
    ) -> Self {
        Self {
            target_type_id: target_type_id.into(),
            or_pairs,
            and_pairs,
        }
    }

    pub fn matches(&self, tags: &BTreeMap<String, String>) -> bool {
        let pair_matches = |pair: &TagPair| tags.get(&pair.k).is_some_and(|v| *v == pair.v);

        self.or_pairs.iter().any(pair_matches)
            || (!self.and_pairs.is_empty() && self.and_pairs.iter().all(pair_matches))
    }
}

/// Ordered rule list; order is priority
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Build rules from source items in the given order. Items whose target
    /// type cannot be resolved to a taxonomy item are skipped.
    pub fn from_sources<'a>(
        items: impl IntoIterator<Item = &'a SourceItem>,
        taxonomy: &Taxonomy,
        mapping: Option<&MappingConfig>,
    ) -> Self {
        let rules = items
            .into_iter()
            .filter_map(|item| {
                let target = resolve_target_type(item, taxonomy, mapping)?;
                Some(Rule::new(target, item.tags.clone(), item.tags_all.clone()))
            })
            .collect();
        Self { rules }
    }

    /// Type id of the first matching rule, or [`GENERIC_TYPE_ID`]
    pub fn classify(&self, tags: &BTreeMap<String, String>) -> &str {
        self.rules
            .iter()
            .find(|rule| rule.matches(tags))
            .map(|rule| rule.target_type_id.as_str())
            .unwrap_or(GENERIC_TYPE_ID)
    }

    #[inline]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Taxonomy type a source item classifies into: the inline `typeId`, else the
/// mapping entry, else the item's own id when it names a taxonomy item.
///
/// Silent on failure; configurations are checked once with
/// [`report_unresolved_sources`].
pub fn resolve_target_type(
    item: &SourceItem,
    taxonomy: &Taxonomy,
    mapping: Option<&MappingConfig>,
) -> Option<String> {
    let target = candidate_type(item, mapping);
    taxonomy.contains(&target).then_some(target)
}

/// Warn about every source item whose type is not in the taxonomy; returns
/// how many were found
pub fn report_unresolved_sources<'a>(
    items: impl IntoIterator<Item = &'a SourceItem>,
    taxonomy: &Taxonomy,
    mapping: Option<&MappingConfig>,
) -> usize {
    let mut unresolved = 0;
    for item in items {
        let target = candidate_type(item, mapping);
        if !taxonomy.contains(&target) {
            tracing::warn!(
                "Source item {} maps to unknown type {}, skipping",
                item.id,
                target
            );
            unresolved += 1;
        }
    }
    unresolved
}

fn candidate_type(item: &SourceItem, mapping: Option<&MappingConfig>) -> String {
    item.type_id
        .clone()
        .or_else(|| mapping.and_then(|m| m.map.get(&item.id).cloned()))
        .unwrap_or_else(|| item.id.clone())
}
