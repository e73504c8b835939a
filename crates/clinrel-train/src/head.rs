//! Relation classification head
//!
//! Sits on top of a frozen [`TextEncoder`](clinrel_core::TextEncoder):
//! the sequence vector and the two entity vectors are concatenated and fed
//! through three dense layers. Encoder output stays in `ndarray`; the head,
//! its loss and its gradients run on `candle` tensors.
//!
//! Author: hephaex@gmail.com

use candle_core::{Device, Module, Tensor, Var, D};
use candle_nn::Linear;
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use clinrel_core::{ClinrelError, EncoderOutput, Result};

use crate::collate::Batch;

// ============================================================================
// Entity Features
// ============================================================================

/// Concatenate pooled output with the entity 1 and entity 2 vectors
///
/// With marker ids (`[s1, e1, s2, e2]`) each entity vector is the max over
/// the tokens strictly between its start and end marker, or the start marker
/// itself when nothing lies between them. Without markers the vectors at
/// `entity_positions` are used. Output shape is `[batch, 3 * hidden]`.
pub fn entity_features(
    output: &EncoderOutput,
    batch: &Batch,
    tag_ids: Option<[u32; 4]>,
) -> Array2<f32> {
    let (rows, seq, hidden) = output.sequence_output.dim();
    let mut features = Array2::zeros((rows, 3 * hidden));
    if seq == 0 {
        return features;
    }

    for b in 0..rows {
        let sequence = output.sequence_output.index_axis(Axis(0), b);
        let tokens = batch.token_ids.row(b);
        let position = |col: usize| (batch.entity_positions[[b, col]].max(0) as usize).min(seq - 1);

        let (e1, e2) = match tag_ids {
            Some([s1, t1, s2, t2]) => (
                tagged_vector(&sequence, tokens.as_slice(), s1, t1, position(0)),
                tagged_vector(&sequence, tokens.as_slice(), s2, t2, position(1)),
            ),
            None => (
                sequence.row(position(0)).to_owned(),
                sequence.row(position(1)).to_owned(),
            ),
        };

        let mut row = features.row_mut(b);
        row.slice_mut(s![..hidden])
            .assign(&output.pooled_output.row(b));
        row.slice_mut(s![hidden..2 * hidden]).assign(&e1);
        row.slice_mut(s![2 * hidden..]).assign(&e2);
    }
    features
}

fn tagged_vector(
    sequence: &ArrayView2<f32>,
    tokens: Option<&[i64]>,
    start_id: u32,
    end_id: u32,
    fallback: usize,
) -> Array1<f32> {
    let Some(tokens) = tokens else {
        return sequence.row(fallback).to_owned();
    };
    let Some(start) = tokens.iter().position(|&t| t == start_id as i64) else {
        return sequence.row(fallback).to_owned();
    };
    let end = tokens[start + 1..]
        .iter()
        .position(|&t| t == end_id as i64)
        .map(|offset| start + 1 + offset);

    match end {
        Some(end) if end > start + 1 => sequence
            .slice(s![start + 1..end, ..])
            .fold_axis(Axis(0), f32::NEG_INFINITY, |&a, &b| a.max(b)),
        _ => sequence.row(start).to_owned(),
    }
}

/// Copy a `[rows, cols]` feature matrix into a tensor
pub fn features_tensor(features: &Array2<f32>, device: &Device) -> Result<Tensor> {
    let values: Vec<f32> = features.iter().copied().collect();
    Tensor::from_vec(values, features.dim(), device).map_err(map_candle)
}

pub(crate) fn map_candle(e: candle_core::Error) -> ClinrelError {
    ClinrelError::Tensor(e.to_string())
}

/// Value of a single-element tensor
pub fn scalar(t: &Tensor) -> Result<f32> {
    t.flatten_all()
        .and_then(|flat| flat.to_vec1::<f32>())
        .map_err(map_candle)?
        .first()
        .copied()
        .ok_or_else(|| ClinrelError::Tensor("Empty tensor has no scalar value".to_string()))
}

// ============================================================================
// Snapshots
// ============================================================================

/// Plain copy of a tensor, used in checkpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorState {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl TensorState {
    pub fn from_tensor(t: &Tensor) -> Result<Self> {
        let values = t
            .flatten_all()
            .and_then(|flat| flat.to_vec1::<f32>())
            .map_err(map_candle)?;
        Ok(Self {
            shape: t.dims().to_vec(),
            values,
        })
    }

    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let expected: usize = self.shape.iter().product();
        if expected != self.values.len() {
            return Err(ClinrelError::Checkpoint(format!(
                "Tensor of shape {:?} holds {} values",
                self.shape,
                self.values.len()
            )));
        }
        Tensor::from_vec(self.values.clone(), self.shape.as_slice(), device).map_err(map_candle)
    }
}

/// Weights of one dense layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerState {
    /// `[out, in]`
    pub weight: TensorState,
    pub bias: TensorState,
}

/// Weights of a [`RelationHead`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadState {
    pub layers: Vec<LayerState>,
    pub dropout: f32,
}

impl HeadState {
    pub fn input_dim(&self) -> usize {
        self.layers
            .first()
            .and_then(|layer| layer.weight.shape.get(1))
            .copied()
            .unwrap_or(0)
    }
}

// ============================================================================
// Dense Layers
// ============================================================================

/// Trainable `y = x W^T + b` with `W` of shape `[out, in]`
#[derive(Debug)]
struct DenseLayer {
    weight: Var,
    bias: Var,
}

impl DenseLayer {
    /// Uniform init in `[-1/sqrt(in), 1/sqrt(in))`
    fn new<R: Rng + ?Sized>(input: usize, output: usize, rng: &mut R, device: &Device) -> Result<Self> {
        let bound = 1.0 / (input.max(1) as f32).sqrt();
        let mut sample = |n: usize| -> Vec<f32> { (0..n).map(|_| rng.gen_range(-bound..bound)).collect() };

        let weight = Tensor::from_vec(sample(output * input), (output, input), device).map_err(map_candle)?;
        let bias = Tensor::from_vec(sample(output), output, device).map_err(map_candle)?;
        Self::from_tensors(&weight, &bias)
    }

    fn from_tensors(weight: &Tensor, bias: &Tensor) -> Result<Self> {
        let (rows, _) = weight.dims2().map_err(map_candle)?;
        if bias.dims() != [rows] {
            return Err(ClinrelError::Checkpoint(format!(
                "Bias of shape {:?} for {} output rows",
                bias.dims(),
                rows
            )));
        }
        Ok(Self {
            weight: Var::from_tensor(weight).map_err(map_candle)?,
            bias: Var::from_tensor(bias).map_err(map_candle)?,
        })
    }

    fn input_dim(&self) -> usize {
        self.weight.as_tensor().dims().get(1).copied().unwrap_or(0)
    }

    fn output_dim(&self) -> usize {
        self.weight.as_tensor().dims().first().copied().unwrap_or(0)
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Linear::new(
            self.weight.as_tensor().clone(),
            Some(self.bias.as_tensor().clone()),
        )
        .forward(x)
        .map_err(map_candle)
    }

    fn state(&self) -> Result<LayerState> {
        Ok(LayerState {
            weight: TensorState::from_tensor(self.weight.as_tensor())?,
            bias: TensorState::from_tensor(self.bias.as_tensor())?,
        })
    }

    /// Append freshly initialised output rows up to `outputs`
    fn grow_outputs<R: Rng + ?Sized>(&mut self, outputs: usize, rng: &mut R) -> Result<()> {
        let current = self.output_dim();
        if outputs <= current {
            return Ok(());
        }
        let device = self.weight.as_tensor().device().clone();
        let fresh = DenseLayer::new(self.input_dim(), outputs - current, rng, &device)?;

        let weight = Tensor::cat(&[self.weight.as_tensor(), fresh.weight.as_tensor()], 0)
            .map_err(map_candle)?;
        let bias = Tensor::cat(&[self.bias.as_tensor(), fresh.bias.as_tensor()], 0)
            .map_err(map_candle)?;
        *self = Self::from_tensors(&weight, &bias)?;
        Ok(())
    }
}

/// Gradients of every head variable, in [`RelationHead::trainable_vars`] order
#[derive(Debug, Clone)]
pub struct HeadGradients {
    pub grads: Vec<Tensor>,
}

impl HeadGradients {
    pub fn zeros(head: &RelationHead) -> Result<Self> {
        let grads = head
            .trainable_vars()
            .into_iter()
            .map(|var| var.as_tensor().zeros_like().map_err(map_candle))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { grads })
    }

    /// Backpropagate `loss` into the head variables
    ///
    /// A variable the loss does not depend on gets a zero gradient.
    pub fn from_backward(head: &RelationHead, loss: &Tensor) -> Result<Self> {
        let store = loss.backward().map_err(map_candle)?;
        let grads = head
            .trainable_vars()
            .into_iter()
            .map(|var| match store.get(var.as_tensor()) {
                Some(grad) => Ok(grad.clone()),
                None => var.as_tensor().zeros_like().map_err(map_candle),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { grads })
    }

    /// `self += scale * other`
    pub fn accumulate(&mut self, other: &HeadGradients, scale: f32) -> Result<()> {
        for (acc, grad) in self.grads.iter_mut().zip(&other.grads) {
            *acc = grad
                .affine(scale as f64, 0.0)
                .and_then(|scaled| acc.add(&scaled))
                .map_err(map_candle)?;
        }
        Ok(())
    }

    pub fn scale(&mut self, factor: f32) -> Result<()> {
        for grad in &mut self.grads {
            *grad = grad.affine(factor as f64, 0.0).map_err(map_candle)?;
        }
        Ok(())
    }

    /// L2 norm over all variables together
    pub fn global_norm(&self) -> Result<f32> {
        let mut squared = 0.0;
        for grad in &self.grads {
            squared += grad
                .sqr()
                .and_then(|g| g.sum_all())
                .and_then(|g| g.to_scalar::<f32>())
                .map_err(map_candle)?;
        }
        Ok(squared.sqrt())
    }
}

// ============================================================================
// Relation Head
// ============================================================================

/// `features -> hidden -> hidden/2 -> classes`
#[derive(Debug)]
pub struct RelationHead {
    fc1: DenseLayer,
    fc2: DenseLayer,
    fc3: DenseLayer,
    /// Drop probability applied to the input and the first hidden layer
    dropout: f32,
    device: Device,
}

impl RelationHead {
    pub fn new(input_dim: usize, hidden_size: usize, nclasses: usize, dropout: f32, seed: u64) -> Result<Self> {
        let device = Device::Cpu;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let half = (hidden_size / 2).max(1);
        Ok(Self {
            fc1: DenseLayer::new(input_dim, hidden_size, &mut rng, &device)?,
            fc2: DenseLayer::new(hidden_size, half, &mut rng, &device)?,
            fc3: DenseLayer::new(half, nclasses.max(1), &mut rng, &device)?,
            dropout,
            device,
        })
    }

    /// Rebuild a head from stored weights
    pub fn from_state(state: &HeadState, device: &Device) -> Result<Self> {
        let [l1, l2, l3] = state.layers.as_slice() else {
            return Err(ClinrelError::Checkpoint(format!(
                "Head needs 3 layers, checkpoint has {}",
                state.layers.len()
            )));
        };
        let layer = |l: &LayerState| -> Result<DenseLayer> {
            DenseLayer::from_tensors(&l.weight.to_tensor(device)?, &l.bias.to_tensor(device)?)
        };
        Ok(Self {
            fc1: layer(l1)?,
            fc2: layer(l2)?,
            fc3: layer(l3)?,
            dropout: state.dropout,
            device: device.clone(),
        })
    }

    pub fn state(&self) -> Result<HeadState> {
        Ok(HeadState {
            layers: vec![self.fc1.state()?, self.fc2.state()?, self.fc3.state()?],
            dropout: self.dropout,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn input_dim(&self) -> usize {
        self.fc1.input_dim()
    }

    pub fn nclasses(&self) -> usize {
        self.fc3.output_dim()
    }

    pub fn trainable_vars(&self) -> Vec<&Var> {
        vec![
            &self.fc1.weight,
            &self.fc1.bias,
            &self.fc2.weight,
            &self.fc2.bias,
            &self.fc3.weight,
            &self.fc3.bias,
        ]
    }

    /// Inference pass, no dropout
    pub fn forward(&self, features: &Tensor) -> Result<Tensor> {
        self.check_input(features)?;
        let a1 = self.fc1.forward(features)?.relu().map_err(map_candle)?;
        let a2 = self.fc2.forward(&a1)?.relu().map_err(map_candle)?;
        self.fc3.forward(&a2)
    }

    /// Training pass with inverted dropout
    pub fn forward_train<R: Rng + ?Sized>(&self, features: &Tensor, rng: &mut R) -> Result<Tensor> {
        self.check_input(features)?;
        let input = dropout(features, self.dropout, rng)?;
        let a1 = self.fc1.forward(&input)?.relu().map_err(map_candle)?;
        let a1 = dropout(&a1, self.dropout, rng)?;
        let a2 = self.fc2.forward(&a1)?.relu().map_err(map_candle)?;
        self.fc3.forward(&a2)
    }

    /// Grow the output layer to `nclasses`, keeping trained rows
    ///
    /// Returns whether the layer changed. Never shrinks.
    pub fn resize_output(&mut self, nclasses: usize, seed: u64) -> Result<bool> {
        if nclasses <= self.nclasses() {
            return Ok(false);
        }
        let previous = self.nclasses();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        self.fc3.grow_outputs(nclasses, &mut rng)?;
        tracing::info!(
            "Resized classification layer from {} to {} classes",
            previous,
            nclasses
        );
        Ok(true)
    }

    fn check_input(&self, features: &Tensor) -> Result<()> {
        let (_, cols) = features.dims2().map_err(map_candle)?;
        if cols != self.input_dim() {
            return Err(ClinrelError::Validation(format!(
                "Head expects {} features, got {}",
                self.input_dim(),
                cols
            )));
        }
        Ok(())
    }
}

fn dropout<R: Rng + ?Sized>(x: &Tensor, p: f32, rng: &mut R) -> Result<Tensor> {
    if p <= 0.0 {
        return Ok(x.clone());
    }
    let keep = 1.0 - p;
    let mask: Vec<f32> = (0..x.elem_count())
        .map(|_| if rng.gen::<f32>() < keep { 1.0 / keep } else { 0.0 })
        .collect();
    let mask = Tensor::from_vec(mask, x.dims(), x.device()).map_err(map_candle)?;
    x.mul(&mask).map_err(map_candle)
}

// ============================================================================
// Loss
// ============================================================================

/// Row-wise softmax
pub fn softmax(logits: &Tensor) -> Result<Tensor> {
    candle_nn::ops::softmax(logits, D::Minus1).map_err(map_candle)
}

/// Index of the largest logit per row
pub fn argmax_rows(logits: &Tensor) -> Result<Vec<i64>> {
    let indices = logits
        .argmax(D::Minus1)
        .and_then(|t| t.to_vec1::<u32>())
        .map_err(map_candle)?;
    Ok(indices.into_iter().map(i64::from).collect())
}

/// Mean cross-entropy over the labelled rows of `logits`
///
/// Rows with a negative label are ignored; `None` when no row is labelled.
pub fn cross_entropy(logits: &Tensor, labels: &[i64]) -> Result<Option<Tensor>> {
    let (rows, classes) = logits.dims2().map_err(map_candle)?;
    if labels.len() != rows {
        return Err(ClinrelError::Validation(format!(
            "{} labels for {} logit rows",
            labels.len(),
            rows
        )));
    }
    if let Some(&bad) = labels.iter().find(|&&l| l >= classes as i64) {
        return Err(ClinrelError::Validation(format!(
            "Label {bad} outside {classes} output classes"
        )));
    }

    let (kept, targets): (Vec<u32>, Vec<u32>) = labels
        .iter()
        .enumerate()
        .filter(|(_, &label)| label >= 0)
        .map(|(row, &label)| (row as u32, label as u32))
        .unzip();
    if kept.is_empty() {
        return Ok(None);
    }

    let device = logits.device();
    let count = kept.len();
    let kept = Tensor::from_vec(kept, count, device).map_err(map_candle)?;
    let targets = Tensor::from_vec(targets, count, device).map_err(map_candle)?;
    let labelled = logits.index_select(&kept, 0).map_err(map_candle)?;

    candle_nn::loss::cross_entropy(&labelled, &targets)
        .map(Some)
        .map_err(map_candle)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collate::BatchCollator;
    use candle_core::DType;
    use clinrel_core::RelationRecord;
    use ndarray::Array3;

    fn create_record(token_ids: Vec<u32>, positions: (usize, usize)) -> RelationRecord {
        RelationRecord {
            token_ids,
            entity_positions: positions,
            entity1_text: "a".to_string(),
            entity2_text: "b".to_string(),
            label: "L".to_string(),
            label_index: Some(0),
            entity1_types: None,
            entity2_types: None,
            entity1_id: None,
            entity2_id: None,
            entity1_concept_id: None,
            entity2_concept_id: None,
            document_id: "0".to_string(),
            char_offsets: [0, 1, 2, 3],
        }
    }

    /// One row whose token t has every hidden unit equal to t
    fn create_output(len: usize, hidden: usize) -> EncoderOutput {
        EncoderOutput {
            sequence_output: Array3::from_shape_fn((1, len, hidden), |(_, t, _)| t as f32),
            pooled_output: Array2::from_elem((1, hidden), -1.0),
        }
    }

    fn create_batch() -> Tensor {
        Tensor::new(&[[0.5f32, -0.2, 0.1, 0.9], [-0.3, 0.8, 0.4, -0.6]], &Device::Cpu).unwrap()
    }

    #[test]
    fn test_features_at_entity_positions() {
        let records = vec![create_record(vec![2, 7, 8, 9, 3], (1, 3))];
        let batch = BatchCollator::new(0).collate(&records, &[0]);
        let features = entity_features(&create_output(5, 2), &batch, None);

        assert_eq!(features.dim(), (1, 6));
        assert_eq!(features.row(0).to_vec(), vec![-1.0, -1.0, 1.0, 1.0, 3.0, 3.0]);
    }

    #[test]
    fn test_features_max_pooled_between_markers() {
        // [CLS] s1 x y e1 z s2 e2 [SEP]
        let records = vec![create_record(vec![2, 10, 20, 21, 11, 22, 12, 13, 3], (1, 6))];
        let batch = BatchCollator::new(0).collate(&records, &[0]);
        let features = entity_features(&create_output(9, 1), &batch, Some([10, 11, 12, 13]));

        // entity 1 pools tokens 2..4, entity 2 has nothing between its markers
        assert_eq!(features.row(0).to_vec(), vec![-1.0, 3.0, 6.0]);
    }

    #[test]
    fn test_features_tensor_keeps_layout() {
        let features = Array2::from_shape_fn((2, 3), |(r, c)| (r * 3 + c) as f32);
        let tensor = features_tensor(&features, &Device::Cpu).unwrap();

        assert_eq!(tensor.dims(), &[2, 3]);
        assert_eq!(
            tensor.to_vec2::<f32>().unwrap(),
            vec![vec![0.0, 1.0, 2.0], vec![3.0, 4.0, 5.0]]
        );
    }

    #[test]
    fn test_cross_entropy_ignores_padding() {
        let logits = Tensor::new(&[[2.0f32, 0.0], [0.0, 0.0]], &Device::Cpu).unwrap();
        let loss = cross_entropy(&logits, &[0, -1]).unwrap().unwrap();

        let p0 = 2f32.exp() / (2f32.exp() + 1.0);
        assert!((scalar(&loss).unwrap() + p0.ln()).abs() < 1e-5);

        assert!(cross_entropy(&logits, &[-1, -1]).unwrap().is_none());
        assert!(cross_entropy(&logits, &[2, 0]).is_err());
        assert!(cross_entropy(&logits, &[0]).is_err());
    }

    #[test]
    fn test_softmax_and_argmax() {
        let logits = Tensor::new(&[[1.0f32, 3.0, 2.0], [0.0, 0.0, 0.0]], &Device::Cpu).unwrap();
        let probs = softmax(&logits).unwrap().to_vec2::<f32>().unwrap();

        assert!((probs[0].iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((probs[1][2] - 1.0 / 3.0).abs() < 1e-5);
        assert_eq!(argmax_rows(&logits).unwrap()[0], 1);
    }

    #[test]
    fn test_backward_reaches_every_layer() {
        let head = RelationHead::new(4, 6, 3, 0.0, 7).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let logits = head.forward_train(&create_batch(), &mut rng).unwrap();
        let loss = cross_entropy(&logits, &[2, 0]).unwrap().unwrap();
        let grads = HeadGradients::from_backward(&head, &loss).unwrap();

        assert_eq!(grads.grads.len(), 6);
        for (grad, var) in grads.grads.iter().zip(head.trainable_vars()) {
            assert_eq!(grad.dims(), var.as_tensor().dims());
        }
        // the output bias always receives p - onehot
        let bias = grads.grads[5].to_vec1::<f32>().unwrap();
        assert!(bias.iter().any(|g| g.abs() > 1e-6));
        assert!(bias.iter().sum::<f32>().abs() < 1e-5);
    }

    #[test]
    fn test_dropout_off_matches_inference() {
        let head = RelationHead::new(4, 6, 3, 0.0, 7).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let train = head.forward_train(&create_batch(), &mut rng).unwrap();
        let eval = head.forward(&create_batch()).unwrap();
        assert_eq!(train.to_vec2::<f32>().unwrap(), eval.to_vec2::<f32>().unwrap());
    }

    #[test]
    fn test_resize_keeps_existing_rows() {
        let mut head = RelationHead::new(6, 4, 2, 0.2, 1).unwrap();
        let before = head.state().unwrap().layers[2].clone();

        assert!(head.resize_output(4, 99).unwrap());
        assert_eq!(head.nclasses(), 4);

        let after = head.state().unwrap().layers[2].clone();
        assert_eq!(after.weight.shape, vec![4, 2]);
        assert_eq!(after.weight.values[..4], before.weight.values[..]);
        assert_eq!(after.bias.values[..2], before.bias.values[..]);
        assert!(!head.resize_output(3, 99).unwrap());
    }

    #[test]
    fn test_state_round_trip() {
        let head = RelationHead::new(6, 4, 3, 0.1, 1).unwrap();
        let state = head.state().unwrap();
        let rebuilt = RelationHead::from_state(&state, &Device::Cpu).unwrap();

        assert_eq!(rebuilt.state().unwrap(), state);
        assert_eq!(state.input_dim(), 6);

        let mut broken = state;
        broken.layers.pop();
        assert!(RelationHead::from_state(&broken, &Device::Cpu).is_err());
    }

    #[test]
    fn test_forward_rejects_wrong_width() {
        let head = RelationHead::new(6, 4, 2, 0.0, 1).unwrap();
        let x = Tensor::zeros((1, 5), DType::F32, &Device::Cpu).unwrap();
        assert!(head.forward(&x).is_err());
    }

    #[test]
    fn test_gradient_norm_and_accumulate() {
        let head = RelationHead::new(2, 2, 2, 0.0, 3).unwrap();
        let mut acc = HeadGradients::zeros(&head).unwrap();
        let mut step = HeadGradients::zeros(&head).unwrap();
        step.grads[5] = Tensor::ones(2, DType::F32, &Device::Cpu).unwrap();

        acc.accumulate(&step, 0.5).unwrap();
        acc.accumulate(&step, 0.5).unwrap();
        assert!((acc.global_norm().unwrap() - 2f32.sqrt()).abs() < 1e-6);

        acc.scale(0.5).unwrap();
        assert_eq!(acc.grads[5].to_vec1::<f32>().unwrap(), vec![0.5, 0.5]);
    }
}
