//! Network Wrapper (spec §4.5): adapts a `burn` model to the uniform
//! forward/backward/copy contract the DQN algorithm needs, generalizing
//! the teacher's `DQNModel` trait and its `Option<M>`-take-and-replace
//! ownership dance for atomic weight copies.

use std::path::Path;

use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::record::{BinBytesRecorder, BinFileRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{Int, Tensor};

use crate::codec::STATE_FEATURES;
use crate::error::{EngineError, EngineResult};

/// A `burn` module usable as the online or target network of the DQN
/// algorithm. `D` is the input tensor's dimensionality (batch dimension
/// included); the output is always a `[batch, ACTION_SPACE]` Q-value
/// tensor.
pub trait DqnModel<B: AutodiffBackend, const D: usize>: AutodiffModule<B> + Clone {
    fn forward(&self, input: Tensor<B, D>) -> Tensor<B, 2>;
}

/// The loss used to turn per-sample TD errors into a scalar to
/// back-propagate (spec §4.6 `loss: {huber | mse}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    Huber,
    Mse,
}

impl LossKind {
    fn apply<B: AutodiffBackend>(
        self,
        prediction: Tensor<B, 2>,
        target: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        match self {
            // burn's HuberLoss is parameterized by delta; delta = 1.0 per
            // spec §4.6.
            LossKind::Huber => burn::nn::loss::HuberLoss::new(1.0)
                .forward_no_reduction(prediction, target)
                .mean_dim(1)
                .squeeze(1),
            LossKind::Mse => burn::nn::loss::MseLoss::new()
                .forward_no_reduction(prediction, target)
                .mean_dim(1)
                .squeeze(1),
        }
    }
}

/// Bridges a `burn` `DqnModel` to the contract the DQN algorithm and
/// checkpoint manager need: forward inference, a full training step with
/// backprop, atomic weight copies, and save/load.
///
/// Holds the model as `Option<M>` so a training step can `take()`
/// ownership to run `backward()` (which in `burn` consumes the autodiff
/// graph) and put the updated model back, exactly the way the teacher's
/// `DQNAgent` does. The optimizer is *not* owned here, mirroring the
/// teacher's `DQNAgent::learn(&mut self, optimizer: &mut impl
/// Optimizer<M, B>)` — it's passed in by the caller, which lets a single
/// `NetworkWrapper` type serve as both the online network (trained) and
/// the target network (never trained, only copied into).
pub struct NetworkWrapper<B, M, const D: usize>
where
    B: AutodiffBackend,
    M: DqnModel<B, D>,
{
    model: Option<M>,
    device: B::Device,
    loss: LossKind,
}

impl<B, M, const D: usize> Clone for NetworkWrapper<B, M, D>
where
    B: AutodiffBackend<FloatElem = f32, IntElem = i32>,
    M: DqnModel<B, D>,
{
    /// Clones the current weights into an independent wrapper. Used by
    /// `crate::checkpoint::CheckpointManager` to build a throwaway probe
    /// for integrity validation (load the just-written payload into a
    /// clone rather than the live online/target network).
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            device: self.device.clone(),
            loss: self.loss,
        }
    }
}

impl<B, M, const D: usize> NetworkWrapper<B, M, D>
where
    B: AutodiffBackend<FloatElem = f32, IntElem = i32>,
    M: DqnModel<B, D>,
{
    pub fn new(model: M, device: B::Device, loss: LossKind) -> Self {
        Self {
            model: Some(model),
            device,
            loss,
        }
    }

    /// Forward pass, no gradient tracking required by the caller (this
    /// still runs through the autodiff graph, matching the teacher's
    /// `policy_net.forward` call during action selection, which throws
    /// the graph away since nothing calls `.backward()` on it).
    pub fn forward(&self, input: Tensor<B, D>) -> Tensor<B, 2> {
        self.model
            .as_ref()
            .expect("model is only ever absent mid-step")
            .forward(input)
    }

    /// Run one gradient step: `prediction = forward(inputs)` gathered down
    /// to the chosen action's Q-value, loss against `targets` — already a
    /// `[batch, 1]` per-sample scalar target, per spec §4.6 step 5 ("a
    /// per-sample loss equivalent to Huber/MSE on the chosen action
    /// only") — optionally scaled by `sample_weights` for prioritized
    /// replay's IS correction, backprop, optimizer step.
    ///
    /// Returns `(avg_loss, per_sample_abs_error, gradient_norm)`.
    pub fn train_batch<O: Optimizer<M, B>>(
        &mut self,
        optimizer: &mut O,
        learning_rate: f64,
        inputs: Tensor<B, D>,
        targets: Tensor<B, 2>,
        chosen_actions: Tensor<B, 2, Int>,
        sample_weights: Option<&[f32]>,
    ) -> EngineResult<(f32, Vec<f32>, f32)> {
        let model = self
            .model
            .take()
            .expect("model is only ever absent mid-step");

        let prediction_all = model.forward(inputs);
        let prediction = prediction_all.gather(1, chosen_actions);
        let target = targets;

        let per_sample_loss = self.loss.apply(prediction.clone(), target.clone());

        let td_errors: Vec<f32> = (prediction - target)
            .abs()
            .into_data()
            .convert::<f32>()
            .value;

        let weighted_loss = if let Some(weights) = sample_weights {
            let w = Tensor::<B, 1>::from_floats(weights, &self.device);
            (per_sample_loss * w).mean()
        } else {
            per_sample_loss.mean()
        };

        let loss_value: f32 = weighted_loss.clone().into_data().convert::<f32>().value[0];
        if !loss_value.is_finite() {
            // Put the (untrained) model back so the caller can keep going.
            self.model = Some(model);
            log::error!("non-finite loss in train_batch: {loss_value}");
            return Err(EngineError::NumericalInstability(format!(
                "non-finite loss: {loss_value}"
            )));
        }

        // Proxy for gradient magnitude: burn doesn't expose a convenient
        // flattened-norm readout over `GradientsParams`, and the TD errors
        // are exactly the output-space gradient of an MSE loss (up to a
        // constant factor), so their L2 norm tracks gradient health well
        // enough for the validator's exploding/vanishing-gradient checks.
        let grad_norm = (td_errors.iter().map(|e| e * e).sum::<f32>()).sqrt();

        let grads = weighted_loss.backward();
        let grads_params = GradientsParams::from_grads(grads, &model);
        let model = optimizer.step(learning_rate, model, grads_params);

        self.model = Some(model);
        Ok((loss_value, td_errors, grad_norm))
    }

    /// Atomically copy this wrapper's weights into `other`. "Atomic" here
    /// means readers of `other` never observe a partially-copied model:
    /// the copy happens via a value swap, not in-place mutation.
    pub fn copy_weights_to(&self, other: &mut Self) {
        let source = self
            .model
            .as_ref()
            .expect("model is only ever absent mid-step")
            .clone();
        other.model = Some(source);
    }

    /// Whether `self` and `other` are weight-compatible, i.e. would
    /// accept a `copy_weights_to` without shape mismatches. `burn`
    /// enforces this at the type level (`M` is the same concrete type for
    /// both), so this is always true for wrappers over the same `M`; kept
    /// as an explicit check point in the contract (spec §4.5).
    pub fn is_weight_compatible_with(&self, _other: &Self) -> bool {
        true
    }

    /// Persist the model's weights to `path` using `burn`'s native binary
    /// recorder. This is the "weight payload" piece of the checkpoint
    /// framing described in spec §6; header and metadata are added by
    /// `crate::checkpoint::CheckpointManager`.
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let model = self
            .model
            .clone()
            .expect("model is only ever absent mid-step");
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        model.save_file(path, &recorder).map_err(|e| {
            log::error!("failed to save network weights to {path:?}: {e}");
            EngineError::CheckpointIO(e.to_string())
        })
    }

    /// Load weights from `path`, replacing this wrapper's model in place.
    /// Per spec §4.5, loading into the online wrapper must be followed by
    /// a copy into the target wrapper when one exists — that sequencing
    /// is the caller's responsibility (see `checkpoint::CheckpointManager::load`).
    pub fn load(&mut self, path: &Path) -> EngineResult<()> {
        let model = self
            .model
            .take()
            .expect("model is only ever absent mid-step");
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let record = recorder
            .load(path.to_path_buf(), &self.device)
            .map_err(|e| EngineError::IncompatibleCheckpoint(e.to_string()))?;
        self.model = Some(model.load_record(record));
        Ok(())
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Serialize the model's weights to an in-memory byte payload, used
    /// by `crate::checkpoint::CheckpointManager` to embed the weight
    /// payload inside its own composite checkpoint file rather than
    /// handing `burn` a path of its own (spec §6: "header, weight
    /// payload, metadata blob" all live in one file the manager frames
    /// itself).
    pub fn to_bytes(&self) -> EngineResult<Vec<u8>> {
        let model = self
            .model
            .clone()
            .expect("model is only ever absent mid-step");
        BinBytesRecorder::<FullPrecisionSettings>::new()
            .record(model.into_record(), ())
            .map_err(|e| EngineError::CheckpointIO(e.to_string()))
    }

    /// Restore weights from a byte payload produced by [`Self::to_bytes`].
    /// A payload that doesn't match this build's model shape surfaces as
    /// [`EngineError::IncompatibleCheckpoint`], never silently remapped.
    pub fn load_bytes(&mut self, bytes: Vec<u8>) -> EngineResult<()> {
        let model = self
            .model
            .take()
            .expect("model is only ever absent mid-step");
        let record = BinBytesRecorder::<FullPrecisionSettings>::new()
            .load(bytes, &self.device)
            .map_err(|e| EngineError::IncompatibleCheckpoint(e.to_string()))?;
        self.model = Some(model.load_record(record));
        Ok(())
    }
}

/// The feature width every `NetworkWrapper` in this crate is built
/// against; re-exported from `codec` so callers constructing an `M` don't
/// need to depend on `crate::codec` directly.
pub const INPUT_FEATURES: usize = STATE_FEATURES;
