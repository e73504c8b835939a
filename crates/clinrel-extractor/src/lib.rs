//! clinrel Extractor - Relation candidate pipeline
//!
//! Generates candidate entity pairs, cuts token windows around them and
//! assembles labelled relation datasets from delimited exports, structured
//! annotation exports and live documents.

pub mod dataset;
pub mod delimited;
pub mod export;
pub mod metrics;
pub mod pairs;
pub mod windower;

pub use dataset::{DatasetAssembler, RelationDataset};
pub use delimited::DelimitedRow;
pub use export::{ExportAnnotation, ExportDocument, ExportId, ExportRelation, TrainerExport};
pub use metrics::{evaluate, BatchMetrics, EvaluationSummary, LabelStats, MetricsAccumulator};
pub use pairs::{CandidatePair, OtherSampler, PairGenerator, PairKey};
pub use windower::{
    CharSpan, ContextWindower, SchemaTags, TokenWindow, WindowConfig, WindowRejection,
    DEFAULT_SCHEMA_TAGS,
};
