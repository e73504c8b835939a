//! Concept type lookup
//!
//! Resolves a concept identifier (CUI) to the semantic type names used by
//! the relation type whitelist.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{ClinrelError, Result};

/// CUI -> semantic type names
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConceptTypes {
    types: HashMap<String, Vec<String>>,
}

impl ConceptTypes {
    /// Create an empty table (every lookup yields no types)
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON object of `{"cui": ["type name", ...]}`
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ClinrelError::io(path, e))?;
        let table: Self = serde_json::from_str(&content)?;
        tracing::info!(
            "Loaded semantic types for {} concepts from {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    /// Register the types of a concept
    pub fn insert(&mut self, cui: impl Into<String>, types: Vec<String>) {
        self.types.insert(cui.into(), types);
    }

    /// Type names of `cui`, empty when unknown
    pub fn types_of(&self, cui: &str) -> Vec<String> {
        self.types.get(cui).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let mut table = ConceptTypes::new();
        table.insert("C0015967", vec!["Sign or Symptom".to_string()]);

        assert_eq!(table.types_of("C0015967"), vec!["Sign or Symptom"]);
        assert!(table.types_of("C9999999").is_empty());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("types.json");
        std::fs::write(&path, r#"{"C0004057": ["Pharmacologic Substance"]}"#).unwrap();

        let table = ConceptTypes::from_file(&path).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.types_of("C0004057"), vec!["Pharmacologic Substance"]);
    }
}
