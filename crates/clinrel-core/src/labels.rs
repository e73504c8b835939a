//! Relation label registry
//!
//! Maps relation label strings to dense class indices. Indices are handed
//! out lowest-free-first, never change once assigned, and the registry
//! never shrinks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Mapping between relation labels and class indices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, usize>", into = "BTreeMap<String, usize>")]
pub struct LabelRegistry {
    label_to_index: BTreeMap<String, usize>,
    index_to_label: BTreeMap<usize, String>,
}

impl From<BTreeMap<String, usize>> for LabelRegistry {
    fn from(label_to_index: BTreeMap<String, usize>) -> Self {
        let index_to_label = label_to_index
            .iter()
            .map(|(label, &idx)| (idx, label.clone()))
            .collect();
        Self {
            label_to_index,
            index_to_label,
        }
    }
}

impl From<LabelRegistry> for BTreeMap<String, usize> {
    fn from(registry: LabelRegistry) -> Self {
        registry.label_to_index
    }
}

impl LabelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `label`, assigning the lowest free index if it is new
    ///
    /// Surrounding whitespace is not significant.
    pub fn resolve_or_add(&mut self, label: &str) -> usize {
        let label = label.trim();
        if let Some(&idx) = self.label_to_index.get(label) {
            return idx;
        }

        let idx = self.next_free_index();
        self.label_to_index.insert(label.to_string(), idx);
        self.index_to_label.insert(idx, label.to_string());
        tracing::debug!("Registered relation label '{}' as class {}", label, idx);
        idx
    }

    /// Resolve a batch of labels in first-seen order
    ///
    /// Returns the class count after resolution.
    pub fn resolve_all<'a, I>(&mut self, labels: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        for label in labels {
            self.resolve_or_add(label);
        }
        self.class_count()
    }

    fn next_free_index(&self) -> usize {
        let mut idx = 0;
        while self.index_to_label.contains_key(&idx) {
            idx += 1;
        }
        idx
    }

    /// Index of a known label
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.label_to_index.get(label.trim()).copied()
    }

    /// Label of a known index
    pub fn label_of(&self, idx: usize) -> Option<&str> {
        self.index_to_label.get(&idx).map(String::as_str)
    }

    /// Number of registered labels
    pub fn class_count(&self) -> usize {
        self.label_to_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.label_to_index.is_empty()
    }

    /// Snapshot of label -> index
    pub fn label_to_index(&self) -> &BTreeMap<String, usize> {
        &self.label_to_index
    }

    /// Snapshot of index -> label
    pub fn index_to_label(&self) -> &BTreeMap<usize, String> {
        &self.index_to_label
    }

    /// Width a classifier needs to cover every registered index
    pub fn output_width(&self) -> usize {
        self.index_to_label
            .keys()
            .next_back()
            .map(|&max| max + 1)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_resolve_is_idempotent() {
        let mut registry = LabelRegistry::new();
        let a = registry.resolve_or_add("ADE-Drug");
        let b = registry.resolve_or_add("ADE-Drug");
        let c = registry.resolve_or_add("  ADE-Drug ");

        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(registry.class_count(), 1);
    }

    #[test]
    fn test_fills_gaps_before_extending() {
        let mut persisted = BTreeMap::new();
        persisted.insert("Other".to_string(), 0);
        persisted.insert("Reason-Drug".to_string(), 2);
        let mut registry = LabelRegistry::from(persisted);

        assert_eq!(registry.resolve_or_add("Dosage-Drug"), 1);
        assert_eq!(registry.resolve_or_add("Route-Drug"), 3);
        assert_eq!(registry.label_of(2), Some("Reason-Drug"));
        assert_eq!(registry.output_width(), 4);
    }

    #[test]
    fn test_resolve_all_returns_class_count() {
        let mut registry = LabelRegistry::new();
        let count = registry.resolve_all(["Other", "ADE-Drug", "Other"]);

        assert_eq!(count, 2);
        assert_eq!(registry.index_of("Other"), Some(0));
        assert_eq!(registry.index_of("ADE-Drug"), Some(1));
        assert_eq!(registry.index_of("Strength-Drug"), None);
    }

    #[test]
    fn test_serde_keeps_inverse_mapping() {
        let mut registry = LabelRegistry::new();
        registry.resolve_all(["Other", "Frequency-Drug"]);

        let json = serde_json::to_string(&registry).unwrap();
        let restored: LabelRegistry = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, registry);
        assert_eq!(restored.label_of(1), Some("Frequency-Drug"));
    }

    proptest! {
        #[test]
        fn prop_distinct_labels_are_dense(labels in proptest::collection::hash_set("[a-zA-Z-]{1,12}", 1..20)) {
            let mut registry = LabelRegistry::new();
            let mut seen = Vec::new();
            for label in &labels {
                seen.push(registry.resolve_or_add(label));
            }
            seen.sort_unstable();
            let expected: Vec<usize> = (0..labels.len()).collect();
            prop_assert_eq!(seen, expected);
            prop_assert_eq!(registry.class_count(), labels.len());
        }

        #[test]
        fn prop_indices_never_change(first in "[a-z]{1,8}", others in proptest::collection::vec("[a-z]{1,8}", 0..10)) {
            let mut registry = LabelRegistry::new();
            let idx = registry.resolve_or_add(&first);
            for label in &others {
                registry.resolve_or_add(label);
            }
            prop_assert_eq!(registry.index_of(&first), Some(idx));
        }
    }
}
