//! clinrel Configuration Management
//!
//! Handles configuration from TOML files and environment variables
//! with defaults suitable for fine-tuning a relation classifier on
//! clinical notes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::labels::LabelRegistry;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Pair generation, windowing and model identity
    pub general: GeneralConfig,

    /// Classification head shape
    pub model: ModelConfig,

    /// Optimisation and checkpointing
    pub train: TrainConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Persisted relation label registry
    pub labels: LabelRegistry,
}

impl AppConfig {
    /// Load configuration from environment variables on top of defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Write as TOML
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;
        std::fs::write(path, content).map_err(|e| ConfigError::FileWriteError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Render as a TOML document
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        if let Ok(name) = std::env::var("CLINREL_MODEL_NAME") {
            self.general.model_name = name;
        }
        if let Ok(dir) = std::env::var("CLINREL_CHECKPOINT_DIR") {
            self.train.checkpoint_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("CLINREL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(seed) = parse_env("CLINREL_SEED")? {
            self.general.seed = seed;
        }
        if let Some(nepochs) = parse_env("CLINREL_NEPOCHS")? {
            self.train.nepochs = nepochs;
        }
        if let Some(batch_size) = parse_env("CLINREL_BATCH_SIZE")? {
            self.train.batch_size = batch_size;
        }

        Ok(self)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.train.batch_size == 0 {
            return Err(invalid("train.batch_size", self.train.batch_size));
        }
        if self.train.gradient_acc_steps == 0 {
            return Err(invalid(
                "train.gradient_acc_steps",
                self.train.gradient_acc_steps,
            ));
        }
        if !(0.0..1.0).contains(&self.train.test_size) {
            return Err(invalid("train.test_size", self.train.test_size));
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return Err(invalid("model.dropout", self.model.dropout));
        }
        let tags = self.general.annotation_schema_tags.len();
        if tags != 0 && tags != 4 {
            return Err(ConfigError::InvalidValue {
                key: "general.annotation_schema_tags".to_string(),
                value: format!("{tags} tags (expected 0 or 4)"),
            });
        }
        if self.model.hidden_size < 2 {
            return Err(invalid("model.hidden_size", self.model.hidden_size));
        }
        // both name the checkpoint files
        if self.general.task.trim().is_empty() {
            return Err(ConfigError::MissingRequired("general.task".to_string()));
        }
        if self.general.model_name.trim().is_empty() {
            return Err(ConfigError::MissingRequired("general.model_name".to_string()));
        }

        Ok(())
    }
}

fn invalid(key: &str, value: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Pair generation, windowing and model identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Name of the pretrained encoder, also used in checkpoint file names
    pub model_name: String,

    /// Task tag used in checkpoint file names
    pub task: String,

    /// Seed for sampling, shuffling and weight initialisation
    pub seed: u64,

    /// Maximum start-to-start character distance between paired entities
    pub window_size: usize,

    /// Context tokens kept left of entity 1
    pub cntx_left: usize,

    /// Context tokens kept right of entity 2
    pub cntx_right: usize,

    /// Maximum token length of a window
    pub max_seq_length: usize,

    /// Entity boundary markers: entity-1 start/end, entity-2 start/end
    pub annotation_schema_tags: Vec<String>,

    /// Allowed (entity-1 type, entity-2 type) pairs; empty allows all
    pub relation_type_filter_pairs: Vec<(String, String)>,

    /// Lowercase export document text before tokenizing
    pub lowercase: bool,

    /// Sample synthetic "Other" pairs from validated, unrelated entities
    pub create_addl_rels: bool,

    /// Suffix synthetic labels with the entity types
    pub create_addl_rels_by_type: bool,

    /// Global budget of synthetic "Other" records, split across documents
    pub addl_rels_max_sample_size: usize,

    /// tokenizer.json or word vocabulary file
    pub tokenizer_path: Option<PathBuf>,

    /// Pretrained encoder weights
    pub encoder_weights_path: Option<PathBuf>,

    /// CUI -> semantic type names table
    pub concept_types_path: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            model_name: "bert-base-uncased".to_string(),
            task: "train".to_string(),
            seed: 13,
            window_size: 300,
            cntx_left: 15,
            cntx_right: 15,
            max_seq_length: 512,
            annotation_schema_tags: Vec::new(),
            relation_type_filter_pairs: Vec::new(),
            lowercase: true,
            create_addl_rels: false,
            create_addl_rels_by_type: false,
            addl_rels_max_sample_size: 200,
            tokenizer_path: None,
            encoder_weights_path: None,
            concept_types_path: None,
        }
    }
}

/// Classification head configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Width of the first dense layer
    pub hidden_size: usize,

    /// Encoder output width used when no weights can be loaded
    pub encoder_hidden_size: usize,

    /// Dropout probability applied before the first two dense layers
    pub dropout: f32,

    /// Output classes of the head
    pub nclasses: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_size: 256,
            encoder_hidden_size: 768,
            dropout: 0.2,
            nclasses: 2,
        }
    }
}

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainConfig {
    /// Epochs per `train` call
    pub nepochs: usize,

    /// Records per batch
    pub batch_size: usize,

    /// Adam learning rate
    pub lr: f32,

    /// Fraction of records held out for evaluation
    pub test_size: f32,

    /// Batches accumulated per optimizer step
    pub gradient_acc_steps: usize,

    /// Optimizer steps at which the learning rate decays
    pub multistep_milestones: Vec<usize>,

    /// Learning rate decay factor
    pub multistep_lr_gamma: f32,

    /// Gradient norm clipping threshold
    pub max_grad_norm: f32,

    /// Shuffle records every epoch
    pub shuffle_data: bool,

    /// Directory for checkpoints and results history
    pub checkpoint_dir: PathBuf,

    /// Resolve held-out labels in their own registry
    pub isolated_test_labels: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            nepochs: 1,
            batch_size: 100,
            lr: 1e-4,
            test_size: 0.2,
            gradient_acc_steps: 1,
            multistep_milestones: vec![2, 4, 6, 8, 12, 15, 18, 20, 22, 24, 26, 30],
            multistep_lr_gamma: 0.8,
            max_grad_norm: 1.0,
            shuffle_data: true,
            checkpoint_dir: PathBuf::from("./checkpoints"),
            isolated_test_labels: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    FileWriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.general.window_size, 300);
        assert_eq!(config.general.cntx_left, 15);
        assert_eq!(config.train.batch_size, 100);
        assert!(config.general.annotation_schema_tags.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [general]
            window_size = 120
            annotation_schema_tags = ["[s1]", "[e1]", "[s2]", "[e2]"]

            [train]
            nepochs = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.general.window_size, 120);
        assert_eq!(config.general.cntx_right, 15);
        assert_eq!(config.train.nepochs, 3);
        assert_eq!(config.train.batch_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.general.annotation_schema_tags = vec!["[s1]".to_string()];
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.train.gradient_acc_steps = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.train.test_size = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_checkpoint_names() {
        let mut config = AppConfig::default();
        config.general.task = " ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(key)) if key == "general.task"
        ));

        let mut config = AppConfig::default();
        config.general.model_name.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(key)) if key == "general.model_name"
        ));
    }

    #[test]
    fn test_file_round_trip_with_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.general.relation_type_filter_pairs =
            vec![("Disease or Syndrome".to_string(), "Pharmacologic Substance".to_string())];
        config.labels.resolve_or_add("Other");
        config.labels.resolve_or_add("ADE-Drug");
        config.to_file(&path).unwrap();

        let loaded = AppConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.labels.index_of("ADE-Drug"), Some(1));
    }

    #[test]
    fn test_missing_file_error() {
        let err = AppConfig::from_file("/nonexistent/clinrel.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError { .. }));
    }
}
