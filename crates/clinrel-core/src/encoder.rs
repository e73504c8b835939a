//! Encoder boundary
//!
//! Token ids in, contextual embeddings out. The encoder is frozen; only the
//! classification head on top of it learns.

use std::path::Path;

use ndarray::{Array2, Array3, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{ClinrelError, Result};

/// Output of one encoder pass
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// Per-token vectors, shape `[batch, seq, hidden]`
    pub sequence_output: Array3<f32>,

    /// Per-sequence vector, shape `[batch, hidden]`
    pub pooled_output: Array2<f32>,
}

/// Trait for text encoders
pub trait TextEncoder: Send + Sync {
    /// Width of the produced vectors
    fn hidden_size(&self) -> usize;

    /// Encode a padded batch
    ///
    /// All three inputs have shape `[batch, seq]`.
    fn encode(
        &self,
        token_ids: &Array2<i64>,
        attention_mask: &Array2<f32>,
        token_type_ids: &Array2<i64>,
    ) -> Result<EncoderOutput>;
}

// ============================================================================
// Embedding Table Encoder
// ============================================================================

/// Static token embeddings with masked-mean pooling
#[derive(Debug, Clone)]
pub struct EmbeddingTableEncoder {
    table: Array2<f32>,
}

impl EmbeddingTableEncoder {
    /// Wrap an existing `[vocab, hidden]` table
    pub fn new(table: Array2<f32>) -> Self {
        Self { table }
    }

    /// Seeded uniform table in `[-0.1, 0.1)`
    pub fn random(vocab_size: usize, hidden_size: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let table = Array2::from_shape_fn((vocab_size, hidden_size), |_| {
            rng.gen_range(-0.1f32..0.1f32)
        });
        Self { table }
    }

    /// Load a JSON-serialized table
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ClinrelError::io(path, e))?;
        let table: Array2<f32> = serde_json::from_str(&content)?;
        Ok(Self { table })
    }

    /// Write the table as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string(&self.table)?;
        std::fs::write(path, json).map_err(|e| ClinrelError::io(path, e))
    }

    /// Load pretrained weights, falling back to a seeded table
    ///
    /// A missing file, a parse failure or a table with fewer rows than the
    /// tokenizer vocabulary all fall back; the failure is logged.
    pub fn load_or_default(
        path: Option<&Path>,
        vocab_size: usize,
        hidden_size: usize,
        seed: u64,
    ) -> Self {
        let Some(path) = path else {
            tracing::info!(
                "No encoder weights configured, using seeded {}x{} table",
                vocab_size,
                hidden_size
            );
            return Self::random(vocab_size, hidden_size, seed);
        };

        match Self::from_file(path) {
            Ok(encoder) if encoder.vocab_size() >= vocab_size => {
                tracing::info!(
                    "Loaded encoder weights from {} ({}x{})",
                    path.display(),
                    encoder.vocab_size(),
                    encoder.hidden_size()
                );
                encoder
            }
            Ok(encoder) => {
                tracing::warn!(
                    "Encoder weights at {} cover {} tokens but vocabulary has {}, using seeded table",
                    path.display(),
                    encoder.vocab_size(),
                    vocab_size
                );
                Self::random(vocab_size, hidden_size, seed)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load encoder weights from {}: {}, using seeded table",
                    path.display(),
                    e
                );
                Self::random(vocab_size, hidden_size, seed)
            }
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.table.nrows()
    }
}

impl TextEncoder for EmbeddingTableEncoder {
    fn hidden_size(&self) -> usize {
        self.table.ncols()
    }

    fn encode(
        &self,
        token_ids: &Array2<i64>,
        attention_mask: &Array2<f32>,
        token_type_ids: &Array2<i64>,
    ) -> Result<EncoderOutput> {
        if token_ids.dim() != attention_mask.dim() || token_ids.dim() != token_type_ids.dim() {
            return Err(ClinrelError::Encoder(format!(
                "Input shape mismatch: ids {:?}, mask {:?}, type ids {:?}",
                token_ids.dim(),
                attention_mask.dim(),
                token_type_ids.dim()
            )));
        }

        let (batch, seq) = token_ids.dim();
        let hidden = self.hidden_size();
        let vocab = self.vocab_size();

        let mut sequence_output = Array3::<f32>::zeros((batch, seq, hidden));
        for ((b, t), &id) in token_ids.indexed_iter() {
            if id < 0 || id as usize >= vocab {
                return Err(ClinrelError::Encoder(format!(
                    "Token id {id} outside embedding table of {vocab} rows"
                )));
            }
            sequence_output
                .index_axis_mut(Axis(0), b)
                .row_mut(t)
                .assign(&self.table.row(id as usize));
        }

        let mut pooled_output = Array2::<f32>::zeros((batch, hidden));
        for b in 0..batch {
            let mask = attention_mask.row(b);
            let count = mask.sum().max(1.0);
            let mut pooled = pooled_output.row_mut(b);
            for (t, &m) in mask.iter().enumerate() {
                if m > 0.0 {
                    pooled.scaled_add(m, &sequence_output.slice(ndarray::s![b, t, ..]));
                }
            }
            pooled.mapv_inplace(|v| (v / count).tanh());
        }

        Ok(EncoderOutput {
            sequence_output,
            pooled_output,
        })
    }
}
