//! Checkpoints and training history
//!
//! Two checkpoint files per model and task live in the checkpoint
//! directory: the periodic one written after every epoch and the best one
//! written when test F1 improves. A `train_results.json` history of
//! per-epoch loss, accuracy and F1 sits beside them.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use clinrel_core::{ClinrelError, Result};

use crate::head::HeadState;
use crate::optim::{AdamState, MultiStepLr};

/// Everything needed to continue training
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingState {
    /// Completed epochs
    pub epoch: usize,
    pub best_f1: f32,
    pub head: HeadState,
    pub optimizer: AdamState,
    pub scheduler: MultiStepLr,
    pub saved_at: DateTime<Utc>,
}

/// Which of the two checkpoint files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointKind {
    Periodic,
    Best,
}

/// Checkpoint file naming for one model and task
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    task: String,
    model_name: String,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>, task: &str, model_name: &str) -> Self {
        Self {
            dir: dir.into(),
            task: task.to_string(),
            model_name: model_name.replace('/', "_"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: CheckpointKind) -> PathBuf {
        let name = match kind {
            CheckpointKind::Periodic => {
                format!("{}_checkpoint_{}.json", self.task, self.model_name)
            }
            CheckpointKind::Best => format!("{}_model_best_{}.json", self.task, self.model_name),
        };
        self.dir.join(name)
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join("train_results.json")
    }

    /// Write a checkpoint, creating the directory if needed
    pub fn save(&self, state: &TrainingState, kind: CheckpointKind) -> Result<PathBuf> {
        let path = self.path(kind);
        write_json(&path, state)?;
        tracing::info!(
            "Saved {:?} checkpoint at epoch {} (best F1 {:.4}) to {}",
            kind,
            state.epoch,
            state.best_f1,
            path.display()
        );
        Ok(path)
    }

    /// Read a checkpoint, `None` when the file does not exist
    pub fn load(&self, kind: CheckpointKind) -> Result<Option<TrainingState>> {
        let path = self.path(kind);
        if !path.exists() {
            tracing::info!("No {:?} checkpoint at {}", kind, path.display());
            return Ok(None);
        }
        let state: TrainingState = read_json(&path)
            .map_err(|e| ClinrelError::Checkpoint(format!("{}: {}", path.display(), e)))?;
        tracing::info!(
            "Loaded {:?} checkpoint from {} (epoch {}, best F1 {:.4})",
            kind,
            path.display(),
            state.epoch,
            state.best_f1
        );
        Ok(Some(state))
    }

    /// Previous history, empty when none was written
    pub fn load_history(&self) -> Result<TrainingHistory> {
        let path = self.history_path();
        if !path.exists() {
            return Ok(TrainingHistory::default());
        }
        read_json(&path)
    }

    pub fn save_history(&self, history: &TrainingHistory) -> Result<()> {
        write_json(&self.history_path(), history)
    }
}

/// Per-epoch training curve
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub losses_per_epoch: Vec<f32>,
    pub accuracy_per_epoch: Vec<f32>,
    pub f1_per_epoch: Vec<f32>,
    /// Index of the last recorded epoch
    pub epoch: usize,
}

impl TrainingHistory {
    pub fn record(&mut self, epoch: usize, loss: f32, accuracy: f32, f1: f32) {
        self.losses_per_epoch.push(loss);
        self.accuracy_per_epoch.push(accuracy);
        self.f1_per_epoch.push(f1);
        self.epoch = epoch;
    }
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ClinrelError::io(parent, e))?;
    }
    let content = serde_json::to_string(value)?;
    std::fs::write(path, content).map_err(|e| ClinrelError::io(path, e))
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| ClinrelError::io(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::head::RelationHead;
    use crate::optim::Adam;

    fn create_state(epoch: usize) -> TrainingState {
        let head = RelationHead::new(6, 4, 3, 0.1, 1).unwrap();
        let optimizer = Adam::new(&head).unwrap();
        TrainingState {
            epoch,
            best_f1: 0.25,
            head: head.state().unwrap(),
            optimizer: optimizer.state().unwrap(),
            scheduler: MultiStepLr::new(1e-4, vec![2], 0.8),
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn test_file_names() {
        let store = CheckpointStore::new("/tmp/ckpt", "train", "bert/base");

        assert_eq!(
            store.path(CheckpointKind::Periodic),
            PathBuf::from("/tmp/ckpt/train_checkpoint_bert_base.json")
        );
        assert_eq!(
            store.path(CheckpointKind::Best),
            PathBuf::from("/tmp/ckpt/train_model_best_bert_base.json")
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested"), "train", "m");

        assert!(store.load(CheckpointKind::Periodic).unwrap().is_none());

        let state = create_state(3);
        store.save(&state, CheckpointKind::Periodic).unwrap();
        let loaded = store.load(CheckpointKind::Periodic).unwrap().unwrap();

        assert_eq!(loaded.epoch, 3);
        assert_eq!(loaded.head, state.head);
        assert_eq!(loaded.optimizer, state.optimizer);
        assert_eq!(loaded.scheduler, state.scheduler);
        assert!(store.load(CheckpointKind::Best).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "train", "m");
        std::fs::write(store.path(CheckpointKind::Periodic), "{not json").unwrap();

        let err = store.load(CheckpointKind::Periodic).unwrap_err();
        assert!(matches!(err, ClinrelError::Checkpoint(_)));
    }

    #[test]
    fn test_history_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "train", "m");

        let mut history = store.load_history().unwrap();
        history.record(0, 1.5, 0.4, 0.3);
        store.save_history(&history).unwrap();

        let mut history = store.load_history().unwrap();
        history.record(1, 1.1, 0.6, 0.5);
        assert_eq!(history.f1_per_epoch, vec![0.3, 0.5]);
        assert_eq!(history.epoch, 1);
    }
}
