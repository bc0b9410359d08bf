//! Shared `burn` backend/model fixtures for unit tests that need a real
//! `NetworkWrapper` (the DQN target-sync/masking tests, the checkpoint
//! manager's retention test). Grounded in the teacher's
//! `examples/dqn_cartpole/model.rs` and `main.rs`, the only place in the
//! teacher that wires a concrete `DQNModel` end to end: same
//! `Wgpu<AutoGraphicsApi, f32, i32>` backend (required by this crate's
//! `IntElem = i32` bound), same lazily-initialized static device.

use burn::backend::wgpu::{self, WgpuDevice};
use burn::backend::{Autodiff, Wgpu};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;
use burn::tensor::backend::AutodiffBackend;
use once_cell::sync::Lazy;

use crate::codec::{ACTION_SPACE, STATE_FEATURES};
use crate::network::DqnModel;

pub type TestInnerBackend = Wgpu<wgpu::AutoGraphicsApi, f32, i32>;
pub type TestBackend = Autodiff<TestInnerBackend>;

static DEVICE: Lazy<WgpuDevice> = Lazy::new(WgpuDevice::default);

pub fn test_device() -> WgpuDevice {
    DEVICE.clone()
}

/// A two-layer model, small enough to train in a unit test, with the
/// fixed `STATE_FEATURES`/`ACTION_SPACE` widths this crate's codec
/// commits to.
#[derive(Module, Debug, Clone)]
pub struct TinyModel<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
}

impl<B: Backend> TinyModel<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            fc1: LinearConfig::new(STATE_FEATURES, 16).init(device),
            fc2: LinearConfig::new(16, ACTION_SPACE).init(device),
        }
    }
}

impl<B: AutodiffBackend> DqnModel<B, 2> for TinyModel<B> {
    fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.fc2.forward(relu(self.fc1.forward(input)))
    }
}
