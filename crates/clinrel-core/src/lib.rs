//! clinrel Core - Domain models, boundaries, and shared types
//!
//! This crate defines the core abstractions used throughout the clinrel system:
//! - Annotated documents, entities and relation records
//! - The label registry (relation label <-> class index)
//! - Tokenizer and encoder boundaries
//! - Common error types
//! - Configuration management

pub mod concepts;
pub mod config;
pub mod encoder;
pub mod labels;
pub mod text;
pub mod tokenizer;

pub use concepts::ConceptTypes;
pub use config::{AppConfig, ConfigError, GeneralConfig, LoggingConfig, ModelConfig, TrainConfig};
pub use encoder::{EmbeddingTableEncoder, EncoderOutput, TextEncoder};
pub use labels::LabelRegistry;
pub use tokenizer::{Encoding, HfTokenizer, Tokenizer, WordTokenizer};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Label carried by records whose relation has not been resolved
pub const UNKNOWN_LABEL: &str = "UNK";

/// Label of the synthetic no-relation class
pub const OTHER_LABEL: &str = "Other";

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for clinrel operations
#[derive(Error, Debug)]
pub enum ClinrelError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Tensor error: {0}")]
    Tensor(String),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ConfigError> for ClinrelError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<serde_json::Error> for ClinrelError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl ClinrelError {
    /// Wrap an IO error with the path that produced it
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClinrelError>;

// ============================================================================
// Annotated Documents
// ============================================================================

fn default_validated() -> bool {
    true
}

/// An annotated concept mention
///
/// `start` and `end` are character offsets into the owning document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier from the upstream annotation system
    #[serde(default)]
    pub id: Option<String>,

    /// Surface text
    pub text: String,

    /// Start character offset (inclusive)
    pub start: usize,

    /// End character offset (exclusive)
    pub end: usize,

    /// Concept identifier (CUI)
    #[serde(default)]
    pub cui: Option<String>,

    /// Semantic type names
    #[serde(default)]
    pub types: Vec<String>,

    /// Whether a human confirmed this annotation
    #[serde(default = "default_validated")]
    pub validated: bool,
}

impl Entity {
    /// Create a new entity spanning `start..end`
    pub fn new(text: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            id: None,
            text: text.into(),
            start,
            end,
            cui: None,
            types: Vec::new(),
            validated: true,
        }
    }

    /// Set the stable identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the concept identifier
    pub fn with_cui(mut self, cui: impl Into<String>) -> Self {
        self.cui = Some(cui.into());
        self
    }

    /// Set the semantic type names
    pub fn with_types(mut self, types: Vec<String>) -> Self {
        self.types = types;
        self
    }

    /// Mark the annotation as validated or not
    pub fn with_validated(mut self, validated: bool) -> Self {
        self.validated = validated;
        self
    }
}

/// Anything exposing full text plus its entity annotations
///
/// Plain documents, export documents and pipeline outputs all go through
/// the same pair generation path via this trait.
pub trait AnnotatedDocument {
    /// Identifier of the originating document
    fn document_id(&self) -> &str;

    /// Full document text
    fn text(&self) -> &str;

    /// Entity annotations over `text`
    fn entities(&self) -> &[Entity];
}

/// A document with its entity annotations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl Document {
    /// Create a new document without entities
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            entities: Vec::new(),
        }
    }

    /// Add an entity annotation
    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }
}

impl AnnotatedDocument for Document {
    fn document_id(&self) -> &str {
        &self.id
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn entities(&self) -> &[Entity] {
        &self.entities
    }
}

// ============================================================================
// Relation Records
// ============================================================================

/// Canonical unit pairing two entities with label and token-window data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRecord {
    /// Subword ids of the window, boundary markers included
    pub token_ids: Vec<u32>,

    /// Token indices of entity 1 and entity 2 inside `token_ids`
    pub entity_positions: (usize, usize),

    pub entity1_text: String,
    pub entity2_text: String,

    /// Relation label, `UNK` until known
    pub label: String,

    /// Class index, set once the label registry resolved `label`
    pub label_index: Option<usize>,

    pub entity1_types: Option<Vec<String>>,
    pub entity2_types: Option<Vec<String>>,

    pub entity1_id: Option<String>,
    pub entity2_id: Option<String>,
    pub entity1_concept_id: Option<String>,
    pub entity2_concept_id: Option<String>,

    pub document_id: String,

    /// Entity 1 start/end and entity 2 start/end, in window-local characters
    pub char_offsets: [usize; 4],
}

impl RelationRecord {
    /// Check the positional invariants against the token sequence
    pub fn is_well_formed(&self) -> bool {
        let (e1, e2) = self.entity_positions;
        e1 != e2 && e1 < self.token_ids.len() && e2 < self.token_ids.len()
    }
}

/// One classified candidate pair of a live document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedRelation {
    pub relation: String,
    pub label_id: usize,
    pub ent1_text: String,
    pub ent2_text: String,
    /// Softmax probability of `relation`, rounded to 3 decimals
    pub confidence: f32,
    pub start_entity_id: Option<String>,
    pub end_entity_id: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
