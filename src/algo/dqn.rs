//! The DQN learning algorithm (spec §4.6), generalizing the teacher's
//! `DQNAgent::learn`/`learn_prioritized` from a single-environment,
//! per-episode soft-update agent into a batch-oriented algorithm the
//! self-play orchestrator drives with externally generated experiences.

use burn::optim::Optimizer;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{Float, Int, Tensor};
use rand::RngCore;

use crate::algo::Algorithm;
use crate::codec::ACTION_SPACE;
use crate::error::EngineResult;
use crate::metrics::PolicyUpdateResult;
use crate::network::{DqnModel, NetworkWrapper};
use crate::replay::{Experience, ReplayBuffer};
use crate::traits::ToTensor;

/// Hyperparameters for one [`Dqn`] instance (spec §4.6 and the
/// configuration map in spec §6: `gamma`, `batch_size`,
/// `target_sync_period`, `double_dqn`, learning rate).
#[derive(Debug, Clone, Copy)]
pub struct DqnConfig {
    pub gamma: f32,
    pub batch_size: usize,
    pub target_sync_period: u64,
    pub double_dqn: bool,
    pub learning_rate: f64,
}

/// Holds the online and target network wrappers, a replay buffer, and the
/// optimizer (owned here, not by the wrapper, mirroring the teacher's
/// `DQNAgent::go` which constructs the optimizer once and threads it
/// through `learn`).
pub struct Dqn<B, M, O, R, S, const D: usize>
where
    B: AutodiffBackend<FloatElem = f32, IntElem = i32>,
    M: DqnModel<B, D>,
    O: Optimizer<M, B>,
    R: ReplayBuffer<S>,
    S: Clone,
{
    online: NetworkWrapper<B, M, D>,
    target: NetworkWrapper<B, M, D>,
    optimizer: O,
    buffer: R,
    config: DqnConfig,
    step_counter: u64,
    cycle: usize,
    /// Consecutive non-finite-loss updates (spec §4.6/§7: "increment a
    /// failure counter"); reset to `0` on the next finite update.
    instability_failures: u64,
    _state: std::marker::PhantomData<S>,
}

impl<B, M, O, R, S, const D: usize> Dqn<B, M, O, R, S, D>
where
    B: AutodiffBackend<FloatElem = f32, IntElem = i32>,
    M: DqnModel<B, D>,
    O: Optimizer<M, B>,
    R: ReplayBuffer<S>,
    S: Clone,
{
    pub fn new(
        online: NetworkWrapper<B, M, D>,
        target: NetworkWrapper<B, M, D>,
        optimizer: O,
        buffer: R,
        config: DqnConfig,
    ) -> Self {
        Self {
            online,
            target,
            optimizer,
            buffer,
            config,
            step_counter: 0,
            cycle: 0,
            instability_failures: 0,
            _state: std::marker::PhantomData,
        }
    }

    /// Consecutive non-finite-loss updates observed so far (spec §4.6/§7).
    pub fn instability_failures(&self) -> u64 {
        self.instability_failures
    }

    /// Called by the orchestrator at the start of each cycle, so the
    /// prioritized replay buffer's beta annealing (spec §4.3) tracks
    /// cycle count rather than raw step count.
    pub fn set_cycle(&mut self, cycle: usize) {
        self.cycle = cycle;
    }

    pub fn online(&self) -> &NetworkWrapper<B, M, D> {
        &self.online
    }

    pub fn target(&self) -> &NetworkWrapper<B, M, D> {
        &self.target
    }

    pub fn online_mut(&mut self) -> &mut NetworkWrapper<B, M, D> {
        &mut self.online
    }

    pub fn target_mut(&mut self) -> &mut NetworkWrapper<B, M, D> {
        &mut self.target
    }

    fn device(&self) -> B::Device {
        self.online.device().clone()
    }
}

impl<B, M, O, R, S, const D: usize> Algorithm<S> for Dqn<B, M, O, R, S, D>
where
    B: AutodiffBackend<FloatElem = f32, IntElem = i32>,
    M: DqnModel<B, D>,
    O: Optimizer<M, B>,
    R: ReplayBuffer<S>,
    S: Clone,
    Vec<S>: ToTensor<B, D, Float>,
{
    fn update(
        &mut self,
        new_experiences: Vec<Experience<S>>,
        rng: &mut dyn RngCore,
    ) -> EngineResult<PolicyUpdateResult> {
        for exp in new_experiences {
            self.buffer.add(exp);
        }

        if self.buffer.size() < self.config.batch_size {
            return Ok(PolicyUpdateResult::zero());
        }

        let batch = self.buffer.sample(self.config.batch_size, self.cycle, rng)?;
        let n = batch.experiences.len();
        let device = self.device();

        let states: Vec<S> = batch.experiences.iter().map(|e| e.state.clone()).collect();
        let states_tensor: Tensor<B, D> = states.to_tensor(&device);

        let chosen: Vec<[i32; 1]> = batch
            .experiences
            .iter()
            .map(|e| [e.action as i32])
            .collect();
        let chosen_tensor: Tensor<B, 2, Int> = chosen.to_tensor(&device);

        // Online Q-values at the sampled *current* states, used for the
        // `policy_entropy` and `q_value_mean` diagnostics.
        let online_q_flat: Vec<f32> = self
            .online
            .forward(states_tensor.clone())
            .into_data()
            .convert::<f32>()
            .value;

        let non_terminal: Vec<usize> = (0..n)
            .filter(|&i| !batch.experiences[i].done && batch.experiences[i].next_state.is_some())
            .collect();

        let (target_next_flat, online_next_flat) = if non_terminal.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            let next_states: Vec<S> = non_terminal
                .iter()
                .map(|&i| batch.experiences[i].next_state.clone().unwrap())
                .collect();
            let next_states_tensor: Tensor<B, D> = next_states.to_tensor(&device);

            let target_next = self
                .target
                .forward(next_states_tensor.clone())
                .into_data()
                .convert::<f32>()
                .value;

            let online_next = if self.config.double_dqn {
                self.online
                    .forward(next_states_tensor)
                    .into_data()
                    .convert::<f32>()
                    .value
            } else {
                Vec::new()
            };

            (target_next, online_next)
        };

        let mut non_terminal_slot = vec![usize::MAX; n];
        for (slot, &i) in non_terminal.iter().enumerate() {
            non_terminal_slot[i] = slot;
        }

        // Target computation (spec §4.6 step 4), legal-action masking
        // mandatory: max/argmax is taken only over `next_legal_actions`.
        let mut targets = Vec::with_capacity(n);
        for i in 0..n {
            let exp = &batch.experiences[i];
            let y = if non_terminal_slot[i] == usize::MAX {
                exp.reward as f32
            } else {
                let slot = non_terminal_slot[i];
                let row = &target_next_flat[slot * ACTION_SPACE..(slot + 1) * ACTION_SPACE];
                let bootstrap = if self.config.double_dqn {
                    let online_row =
                        &online_next_flat[slot * ACTION_SPACE..(slot + 1) * ACTION_SPACE];
                    let a_star =
                        crate::exploration::argmax_legal(&exp.next_legal_actions, online_row);
                    row[a_star]
                } else {
                    exp.next_legal_actions
                        .iter()
                        .map(|&a| row[a])
                        .fold(f32::NEG_INFINITY, f32::max)
                };
                exp.reward as f32 + self.config.gamma * bootstrap
            };
            targets.push([y]);
        }

        let target_value_mean = targets.iter().map(|t| t[0]).sum::<f32>() / n as f32;
        let q_value_mean = (0..n)
            .map(|i| online_q_flat[i * ACTION_SPACE + batch.experiences[i].action])
            .sum::<f32>()
            / n as f32;

        let policy_entropy = {
            let mut total = 0.0f32;
            for i in 0..n {
                let row = &online_q_flat[i * ACTION_SPACE..(i + 1) * ACTION_SPACE];
                let legal = &batch.experiences[i].legal_actions;
                if legal.is_empty() {
                    continue;
                }
                let max = legal
                    .iter()
                    .map(|&a| row[a])
                    .fold(f32::NEG_INFINITY, f32::max);
                let exp_vals: Vec<f32> = legal.iter().map(|&a| (row[a] - max).exp()).collect();
                let sum: f32 = exp_vals.iter().sum();
                let entropy: f32 = exp_vals
                    .iter()
                    .map(|&e| {
                        let p = e / sum;
                        if p > 0.0 {
                            -p * p.ln()
                        } else {
                            0.0
                        }
                    })
                    .sum();
                total += entropy;
            }
            total / n as f32
        };

        let targets_tensor: Tensor<B, 2> = targets.to_tensor(&device);
        let weights = if batch.weights.iter().any(|&w| w != 1.0) {
            Some(batch.weights.as_slice())
        } else {
            None
        };

        // Non-finite loss (spec §7 `NumericalInstability`): the optimizer
        // step is skipped (the wrapper already puts the untrained model
        // back), the step counter and target sync do not advance, but the
        // cycle still gets a report rather than an aborted run — the
        // caller's `?` would otherwise tear down the whole training run
        // for one bad batch (spec §7: "training continues").
        let (avg_loss, td_errors, gradient_norm) = match self.online.train_batch(
            &mut self.optimizer,
            self.config.learning_rate,
            states_tensor,
            targets_tensor,
            chosen_tensor,
            weights,
        ) {
            Ok(out) => out,
            Err(crate::error::EngineError::NumericalInstability(msg)) => {
                self.instability_failures += 1;
                log::warn!(
                    "skipping optimizer step after non-finite loss ({msg}); \
                     {} consecutive failures",
                    self.instability_failures
                );
                return Ok(PolicyUpdateResult {
                    avg_loss: f32::NAN,
                    gradient_norm: 0.0,
                    policy_entropy,
                    q_value_mean,
                    target_value_mean,
                    trained: true,
                    numerical_instability: true,
                });
            }
            Err(other) => return Err(other),
        };
        self.instability_failures = 0;

        self.buffer.update_priorities(&batch.indices, &td_errors);

        self.step_counter += 1;
        if self.step_counter % self.config.target_sync_period == 0 {
            self.online.copy_weights_to(&mut self.target);
        }

        Ok(PolicyUpdateResult {
            avg_loss,
            gradient_norm,
            policy_entropy,
            q_value_mean,
            target_value_mean,
            trained: true,
            numerical_instability: false,
        })
    }

    fn step_counter(&self) -> u64 {
        self.step_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::optim::AdamWConfig;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use crate::codec::{ACTION_SPACE, STATE_FEATURES};
    use crate::network::{LossKind, NetworkWrapper};
    use crate::replay::UniformReplayBuffer;
    use crate::test_support::{test_device, TestBackend, TinyModel};

    type State = [f32; STATE_FEATURES];

    fn exp(state: State, next: Option<State>, legal: Vec<usize>, next_legal: Vec<usize>) -> Experience<State> {
        Experience {
            state,
            legal_actions: legal,
            action: 0,
            reward: 1.0,
            next_state: next,
            done: next.is_none(),
            next_legal_actions: next_legal,
        }
    }

    fn new_dqn(
        config: DqnConfig,
    ) -> Dqn<TestBackend, TinyModel<TestBackend>, impl Optimizer<TinyModel<TestBackend>, TestBackend>, UniformReplayBuffer<State>, State, 2>
    {
        let device = test_device();
        let online = NetworkWrapper::new(TinyModel::new(&device), device.clone(), LossKind::Mse);
        let target = NetworkWrapper::new(TinyModel::new(&device), device.clone(), LossKind::Mse);
        let optimizer = AdamWConfig::new().init();
        let buffer = UniformReplayBuffer::new(16);
        Dqn::new(online, target, optimizer, buffer, config)
    }

    #[test]
    fn target_syncs_exactly_on_step_counter_multiples() {
        let _ = env_logger::try_init();
        let config = DqnConfig {
            gamma: 0.9,
            batch_size: 2,
            target_sync_period: 2,
            double_dqn: false,
            learning_rate: 1e-2,
        };
        let mut dqn = new_dqn(config);
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let batch = vec![
            exp([0.1; STATE_FEATURES], Some([0.2; STATE_FEATURES]), vec![0, 1], vec![0, 1]),
            exp([0.3; STATE_FEATURES], Some([0.4; STATE_FEATURES]), vec![0, 1], vec![0, 1]),
        ];

        dqn.update(batch, &mut rng).unwrap();
        assert_eq!(dqn.step_counter(), 1);
        assert_ne!(
            dqn.online().to_bytes().unwrap(),
            dqn.target().to_bytes().unwrap(),
            "after an odd step_counter the target must still lag the online network"
        );

        dqn.update(Vec::new(), &mut rng).unwrap();
        assert_eq!(dqn.step_counter(), 2);
        assert_eq!(
            dqn.online().to_bytes().unwrap(),
            dqn.target().to_bytes().unwrap(),
            "step_counter hit a target_sync_period multiple, target must now equal online"
        );
    }

    #[test]
    fn double_dqn_bootstrap_is_masked_to_next_legal_actions() {
        let device = test_device();
        let online = NetworkWrapper::new(TinyModel::<TestBackend>::new(&device), device.clone(), LossKind::Mse);
        let target = NetworkWrapper::new(TinyModel::<TestBackend>::new(&device), device.clone(), LossKind::Mse);

        let state: State = [0.0; STATE_FEATURES];
        let batch_state: Tensor<TestBackend, 2> = vec![state].to_tensor(&device);
        let online_row: Vec<f32> = online
            .forward(batch_state.clone())
            .into_data()
            .convert::<f32>()
            .value;
        let target_row: Vec<f32> = target.forward(batch_state).into_data().convert::<f32>().value;

        let global_argmax = online_row
            .iter()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc })
            .0;
        let next_legal = vec![(global_argmax + 1) % ACTION_SPACE, (global_argmax + 2) % ACTION_SPACE];

        let gamma = 0.9f32;
        let reward = 2.0f64;
        let masked_argmax = crate::exploration::argmax_legal(&next_legal, &online_row);
        let expected_target = reward as f32 + gamma * target_row[masked_argmax];
        let unmasked_target = reward as f32 + gamma * target_row[global_argmax];
        assert!(
            (expected_target - unmasked_target).abs() > 1e-6,
            "test setup must pick a next_legal_actions set that excludes the global argmax"
        );

        let config = DqnConfig {
            gamma,
            batch_size: 1,
            target_sync_period: 1_000,
            double_dqn: true,
            learning_rate: 1e-2,
        };
        let optimizer = AdamWConfig::new().init();
        let buffer = UniformReplayBuffer::new(16);
        let mut dqn = Dqn::new(online, target, optimizer, buffer, config);

        let transition = Experience {
            state,
            legal_actions: vec![0],
            action: 0,
            reward,
            next_state: Some(state),
            done: false,
            next_legal_actions: next_legal,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let result = dqn.update(vec![transition], &mut rng).unwrap();

        assert!(
            (result.target_value_mean - expected_target).abs() < 1e-3,
            "expected {expected_target}, got {}",
            result.target_value_mean
        );
    }
}
