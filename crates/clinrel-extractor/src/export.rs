//! Structured annotation export
//!
//! Projects hold documents; each document carries its text, entity
//! annotations and the relations annotators drew between them.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use clinrel_core::text::lowercase_in_place;
use clinrel_core::{ClinrelError, Document, Entity, Result};

fn default_true() -> bool {
    true
}

/// Identifier that may be written as a number or a string
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExportId {
    Int(i64),
    Str(String),
}

impl fmt::Display for ExportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Str(id) => write!(f, "{id}"),
        }
    }
}

impl From<&str> for ExportId {
    fn from(id: &str) -> Self {
        Self::Str(id.to_string())
    }
}

impl From<i64> for ExportId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

/// Top level of an annotation export
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainerExport {
    pub projects: Vec<ExportProject>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportProject {
    #[serde(default)]
    pub id: Option<ExportId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub documents: Vec<ExportDocument>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportDocument {
    #[serde(default)]
    pub id: Option<ExportId>,
    #[serde(default)]
    pub name: Option<String>,
    pub text: String,
    #[serde(default)]
    pub annotations: Vec<ExportAnnotation>,
    #[serde(default)]
    pub relations: Vec<ExportRelation>,
}

/// An entity annotation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportAnnotation {
    pub id: ExportId,
    #[serde(default)]
    pub cui: Option<String>,
    pub value: String,
    pub start: usize,
    pub end: usize,
    #[serde(default = "default_true")]
    pub validated: bool,
}

/// A relation between two annotations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRelation {
    pub start_entity: ExportId,
    #[serde(default)]
    pub start_entity_cui: Option<String>,
    #[serde(default)]
    pub start_entity_value: String,
    pub start_entity_start_idx: usize,
    pub start_entity_end_idx: usize,

    pub end_entity: ExportId,
    #[serde(default)]
    pub end_entity_cui: Option<String>,
    #[serde(default)]
    pub end_entity_value: String,
    pub end_entity_start_idx: usize,
    pub end_entity_end_idx: usize,

    pub relation: String,
    #[serde(default = "default_true")]
    pub validated: bool,
}

impl ExportRelation {
    /// Swap start and end entity when the end entity comes first
    pub fn canonicalize(&mut self) {
        if self.start_entity_start_idx <= self.end_entity_start_idx {
            return;
        }
        std::mem::swap(&mut self.start_entity, &mut self.end_entity);
        std::mem::swap(&mut self.start_entity_cui, &mut self.end_entity_cui);
        std::mem::swap(&mut self.start_entity_value, &mut self.end_entity_value);
        std::mem::swap(
            &mut self.start_entity_start_idx,
            &mut self.end_entity_start_idx,
        );
        std::mem::swap(&mut self.start_entity_end_idx, &mut self.end_entity_end_idx);
    }
}

impl TrainerExport {
    /// Load an export from JSON
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ClinrelError::io(path, e))?;
        let export: Self = serde_json::from_str(&content)?;
        tracing::info!(
            "Loaded export {} ({} projects, {} documents)",
            path.display(),
            export.projects.len(),
            export.document_count()
        );
        Ok(export)
    }

    /// Wrap plain documents as a single unlabeled project
    ///
    /// Entities without an id get their position in the document.
    pub fn from_documents(docs: &[Document]) -> Self {
        let documents = docs
            .iter()
            .map(|doc| ExportDocument {
                id: (!doc.id.is_empty()).then(|| ExportId::Str(doc.id.clone())),
                name: None,
                text: doc.text.clone(),
                annotations: doc
                    .entities
                    .iter()
                    .enumerate()
                    .map(|(idx, e)| ExportAnnotation {
                        id: e
                            .id
                            .as_deref()
                            .map(ExportId::from)
                            .unwrap_or(ExportId::Int(idx as i64)),
                        cui: e.cui.clone(),
                        value: e.text.clone(),
                        start: e.start,
                        end: e.end,
                        validated: e.validated,
                    })
                    .collect(),
                relations: Vec::new(),
            })
            .collect();

        Self {
            projects: vec![ExportProject {
                id: None,
                name: None,
                documents,
            }],
        }
    }

    /// Documents across all projects
    pub fn document_count(&self) -> usize {
        self.projects.iter().map(|p| p.documents.len()).sum()
    }

    /// Iterate over every document with its export-wide key
    ///
    /// With several projects the key is `{project}/{document}`, the project
    /// part being its id or its index.
    pub fn documents(&self) -> impl Iterator<Item = (String, &ExportDocument)> {
        let qualify = self.projects.len() > 1;
        self.projects
            .iter()
            .enumerate()
            .flat_map(move |(index, project)| {
                project
                    .documents
                    .iter()
                    .enumerate()
                    .map(move |(position, doc)| {
                        let local = doc.document_id(position);
                        let key = if qualify {
                            format!("{}/{}", project.key(index), local)
                        } else {
                            local
                        };
                        (key, doc)
                    })
            })
    }
}

impl ExportProject {
    fn key(&self, index: usize) -> String {
        match &self.id {
            Some(id) => id.to_string(),
            None => index.to_string(),
        }
    }
}

impl ExportDocument {
    /// Identifier inside the owning project
    pub fn document_id(&self, position: usize) -> String {
        match &self.id {
            Some(id) => id.to_string(),
            None => position.to_string(),
        }
    }

    /// Convert to a plain annotated document
    ///
    /// Lowercasing keeps annotation offsets valid.
    pub fn to_document(&self, document_id: &str, lowercase: bool) -> Document {
        let lower = |s: &str| -> String {
            if lowercase {
                lowercase_in_place(s)
            } else {
                s.to_string()
            }
        };

        let mut doc = Document::new(document_id, lower(&self.text));
        for ann in &self.annotations {
            let mut entity = Entity::new(lower(&ann.value), ann.start, ann.end)
                .with_id(ann.id.to_string())
                .with_validated(ann.validated);
            entity.cui = ann.cui.clone();
            doc = doc.with_entity(entity);
        }
        doc
    }
}
