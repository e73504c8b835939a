//! clinrel Train - Relation classifier training
//!
//! Batch collation, the classification head on top of a frozen encoder,
//! Adam with a MultiStep schedule, checkpoint/resume and prediction over
//! live documents.

pub mod checkpoint;
pub mod collate;
pub mod head;
pub mod optim;
pub mod predict;
pub mod trainer;

pub use checkpoint::{CheckpointKind, CheckpointStore, TrainingHistory, TrainingState};
pub use collate::{Batch, BatchCollator, LABEL_PAD};
pub use head::{
    argmax_rows, cross_entropy, entity_features, features_tensor, scalar, softmax, HeadGradients,
    HeadState, LayerState, RelationHead, TensorState,
};
pub use optim::{clip_grad_norm, Adam, AdamState, MomentState, MultiStepLr};
pub use predict::{round_confidence, DocumentPredictions};
pub use trainer::{
    RelationClassifier, TrainingReport, TrainingSource, MODEL_CONFIG_FILE, MODEL_WEIGHTS_FILE,
};
