//! Optimizer and learning-rate schedule
//!
//! Adam over the classification head variables, a MultiStep decay
//! schedule and global gradient-norm clipping. Both optimizer and schedule
//! serialize into checkpoints so a resumed run continues where it stopped.
//! Moment buffers are kept here rather than in `candle_nn::AdamW` so they
//! can be stored and padded when the output layer grows.

use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};

use clinrel_core::{ClinrelError, Result};

use crate::head::{map_candle, HeadGradients, RelationHead, TensorState};

// ============================================================================
// Adam
// ============================================================================

/// First and second moment buffers of one variable
#[derive(Debug, Clone)]
struct Moments {
    m: Tensor,
    v: Tensor,
}

impl Moments {
    fn zeros(like: &Tensor) -> Result<Self> {
        Ok(Self {
            m: like.zeros_like().map_err(map_candle)?,
            v: like.zeros_like().map_err(map_candle)?,
        })
    }

    /// Pad with zero rows so the buffers match a grown variable
    fn grow_rows(&mut self, like: &Tensor) -> Result<()> {
        if self.m.dims() == like.dims() {
            return Ok(());
        }
        let rows = like.dims().first().copied().unwrap_or(0);
        let current = self.m.dims().first().copied().unwrap_or(0);
        if rows <= current || self.m.dims().get(1..) != like.dims().get(1..) {
            *self = Self::zeros(like)?;
            return Ok(());
        }

        let mut pad_shape = like.dims().to_vec();
        pad_shape[0] = rows - current;
        let pad = Tensor::zeros(pad_shape.as_slice(), DType::F32, like.device()).map_err(map_candle)?;
        self.m = Tensor::cat(&[&self.m, &pad], 0).map_err(map_candle)?;
        self.v = Tensor::cat(&[&self.v, &pad], 0).map_err(map_candle)?;
        Ok(())
    }
}

/// Stored moments of one variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentState {
    pub m: TensorState,
    pub v: TensorState,
}

/// Stored [`Adam`] optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdamState {
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    pub step: u64,
    pub moments: Vec<MomentState>,
}

/// Adam with bias correction
#[derive(Debug, Clone)]
pub struct Adam {
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    /// Number of updates applied so far
    step: u64,
    moments: Vec<Moments>,
}

impl Adam {
    pub fn new(head: &RelationHead) -> Result<Self> {
        let moments = head
            .trainable_vars()
            .into_iter()
            .map(|var| Moments::zeros(var.as_tensor()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            step: 0,
            moments,
        })
    }

    pub fn from_state(state: &AdamState, device: &Device) -> Result<Self> {
        let moments = state
            .moments
            .iter()
            .map(|s| {
                Ok(Moments {
                    m: s.m.to_tensor(device)?,
                    v: s.v.to_tensor(device)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            beta1: state.beta1,
            beta2: state.beta2,
            eps: state.eps,
            step: state.step,
            moments,
        })
    }

    pub fn state(&self) -> Result<AdamState> {
        let moments = self
            .moments
            .iter()
            .map(|m| {
                Ok(MomentState {
                    m: TensorState::from_tensor(&m.m)?,
                    v: TensorState::from_tensor(&m.v)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(AdamState {
            beta1: self.beta1,
            beta2: self.beta2,
            eps: self.eps,
            step: self.step,
            moments,
        })
    }

    /// Number of updates applied so far
    pub fn steps(&self) -> u64 {
        self.step
    }

    /// Match the moment buffers to the head after a resize
    pub fn sync_with(&mut self, head: &RelationHead) -> Result<()> {
        let vars = head.trainable_vars();
        if vars.len() != self.moments.len() {
            tracing::warn!(
                "Optimizer holds {} moment buffers for {} variables; resetting",
                self.moments.len(),
                vars.len()
            );
            self.moments = vars
                .iter()
                .map(|var| Moments::zeros(var.as_tensor()))
                .collect::<Result<Vec<_>>>()?;
            return Ok(());
        }
        for (moments, var) in self.moments.iter_mut().zip(vars) {
            moments.grow_rows(var.as_tensor())?;
        }
        Ok(())
    }

    /// Apply one update with learning rate `lr`
    pub fn update(&mut self, head: &RelationHead, grads: &HeadGradients, lr: f32) -> Result<()> {
        self.sync_with(head)?;
        let vars = head.trainable_vars();
        if grads.grads.len() != vars.len() {
            return Err(ClinrelError::Validation(format!(
                "{} gradients for {} variables",
                grads.grads.len(),
                vars.len()
            )));
        }

        self.step += 1;
        let t = self.step as i32;
        let beta1 = self.beta1 as f64;
        let beta2 = self.beta2 as f64;
        let correction1 = 1.0 - beta1.powi(t);
        let correction2 = 1.0 - beta2.powi(t);
        let eps = self.eps as f64;

        for ((var, grad), moments) in vars.into_iter().zip(&grads.grads).zip(&mut self.moments) {
            let m = moments
                .m
                .affine(beta1, 0.0)
                .and_then(|m| m.add(&grad.affine(1.0 - beta1, 0.0)?))
                .map_err(map_candle)?;
            let v = moments
                .v
                .affine(beta2, 0.0)
                .and_then(|v| v.add(&grad.sqr()?.affine(1.0 - beta2, 0.0)?))
                .map_err(map_candle)?;

            let denom = v
                .affine(1.0 / correction2, 0.0)
                .and_then(|v_hat| v_hat.sqrt())
                .and_then(|d| d.affine(1.0, eps))
                .map_err(map_candle)?;
            let updated = m
                .affine(lr as f64 / correction1, 0.0)
                .and_then(|step| step.div(&denom))
                .and_then(|step| var.as_tensor().sub(&step))
                .map_err(map_candle)?;
            var.set(&updated).map_err(map_candle)?;

            moments.m = m;
            moments.v = v;
        }
        Ok(())
    }
}

// ============================================================================
// Schedule
// ============================================================================

/// Multiply the learning rate by `gamma` at every milestone step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiStepLr {
    pub base_lr: f32,
    pub milestones: Vec<usize>,
    pub gamma: f32,
    /// Number of schedule steps taken
    pub last_step: usize,
}

impl MultiStepLr {
    pub fn new(base_lr: f32, milestones: Vec<usize>, gamma: f32) -> Self {
        Self {
            base_lr,
            milestones,
            gamma,
            last_step: 0,
        }
    }

    pub fn lr(&self) -> f32 {
        let passed = self
            .milestones
            .iter()
            .filter(|&&m| m <= self.last_step)
            .count();
        self.base_lr * self.gamma.powi(passed as i32)
    }

    pub fn step(&mut self) {
        self.last_step += 1;
    }
}

/// Scale gradients so their global norm is at most `max_norm`
///
/// Returns the norm before clipping.
pub fn clip_grad_norm(grads: &mut HeadGradients, max_norm: f32) -> Result<f32> {
    let norm = grads.global_norm()?;
    if max_norm > 0.0 && norm > max_norm {
        grads.scale(max_norm / (norm + 1e-6))?;
    }
    Ok(norm)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::head::{cross_entropy, scalar};

    fn create_gradients(head: &RelationHead, value: f32) -> HeadGradients {
        let grads = head
            .trainable_vars()
            .into_iter()
            .map(|var| var.as_tensor().ones_like().unwrap().affine(value as f64, 0.0).unwrap())
            .collect();
        HeadGradients { grads }
    }

    fn first_weight(head: &RelationHead) -> f32 {
        head.state().unwrap().layers[0].weight.values[0]
    }

    #[test]
    fn test_first_adam_step_moves_by_lr() {
        let head = RelationHead::new(3, 4, 2, 0.0, 5).unwrap();
        let before = first_weight(&head);
        let mut adam = Adam::new(&head).unwrap();

        adam.update(&head, &create_gradients(&head, 0.5), 0.01).unwrap();

        // bias-corrected first step is lr * sign(g)
        assert!((before - first_weight(&head) - 0.01).abs() < 1e-5);
        assert_eq!(adam.steps(), 1);
    }

    #[test]
    fn test_steps_reduce_loss_on_fixed_batch() {
        let head = RelationHead::new(4, 8, 3, 0.0, 11).unwrap();
        let mut adam = Adam::new(&head).unwrap();
        let x = Tensor::new(
            &[[0.5f32, -0.2, 0.1, 0.9], [-0.3, 0.8, 0.4, -0.6], [0.2, 0.2, -0.7, 0.1]],
            &Device::Cpu,
        )
        .unwrap();
        let labels = [2, 0, 1];
        let loss_of = |head: &RelationHead| {
            let logits = head.forward(&x).unwrap();
            cross_entropy(&logits, &labels).unwrap().unwrap()
        };

        let initial = scalar(&loss_of(&head)).unwrap();
        for _ in 0..50 {
            let grads = HeadGradients::from_backward(&head, &loss_of(&head)).unwrap();
            adam.update(&head, &grads, 0.01).unwrap();
        }
        let trained = scalar(&loss_of(&head)).unwrap();

        assert!(trained < initial, "{trained} >= {initial}");
    }

    #[test]
    fn test_moments_follow_resize() {
        let mut head = RelationHead::new(3, 4, 2, 0.0, 5).unwrap();
        let mut adam = Adam::new(&head).unwrap();
        adam.update(&head, &create_gradients(&head, 0.1), 0.01).unwrap();
        let before = adam.state().unwrap();

        head.resize_output(5, 1).unwrap();
        adam.update(&head, &create_gradients(&head, 0.1), 0.01).unwrap();

        let state = adam.state().unwrap();
        assert_eq!(state.moments[4].m.shape, vec![5, 2]);
        assert_eq!(state.moments[5].v.shape, vec![5]);
        assert_eq!(state.step, 2);
        assert_eq!(before.moments[5].m.shape, vec![2]);
    }

    #[test]
    fn test_state_round_trip() {
        let head = RelationHead::new(3, 4, 2, 0.0, 5).unwrap();
        let mut adam = Adam::new(&head).unwrap();
        adam.update(&head, &create_gradients(&head, 0.3), 0.01).unwrap();

        let state = adam.state().unwrap();
        let restored = Adam::from_state(&state, &Device::Cpu).unwrap();
        assert_eq!(restored.state().unwrap(), state);
        assert_eq!(restored.steps(), 1);
    }

    #[test]
    fn test_multistep_schedule() {
        let mut schedule = MultiStepLr::new(1.0, vec![2, 4], 0.5);
        let mut rates = Vec::new();
        for _ in 0..5 {
            rates.push(schedule.lr());
            schedule.step();
        }
        assert_eq!(rates, vec![1.0, 1.0, 0.5, 0.5, 0.25]);
    }

    #[test]
    fn test_clip_grad_norm() {
        let head = RelationHead::new(2, 2, 2, 0.0, 5).unwrap();
        let mut grads = create_gradients(&head, 1.0);
        let norm = clip_grad_norm(&mut grads, 1.0).unwrap();

        assert!(norm > 1.0);
        assert!((grads.global_norm().unwrap() - 1.0).abs() < 1e-4);

        let mut small = create_gradients(&head, 0.01);
        let before = small.global_norm().unwrap();
        clip_grad_norm(&mut small, 1.0).unwrap();
        assert_eq!(small.global_norm().unwrap(), before);
    }
}
