//! The flat configuration map described in spec §6, as one
//! `serde`-deserializable struct. `TrainingConfig::validate` is what
//! `Trainer::new` calls before constructing any component; an invalid
//! config is refused with [`EngineError::InvalidConfiguration`] rather
//! than allowed to surface as a panic deep in some component.

use serde::{Deserialize, Serialize};

use crate::codec::STATE_FEATURES;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Dqn,
    Pg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayKind {
    Uniform,
    Prioritized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    Huber,
    Mse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Adam,
    Sgd,
    Rmsprop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightInit {
    He,
    Xavier,
}

/// Either an epsilon-greedy or a Boltzmann exploration configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationConfig {
    Epsilon {
        start: f32,
        end: f32,
        decay_rate: f32,
    },
    Temperature {
        start: f32,
        end: f32,
        decay_rate: f32,
    },
}

/// Thresholds the validator uses to classify issues (spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IssueThresholds {
    pub gradient_high: f32,
    pub gradient_low: f32,
    pub entropy_low: f32,
    pub loss_high: f32,
    pub winrate_low: f32,
}

impl Default for IssueThresholds {
    fn default() -> Self {
        Self {
            gradient_high: 100.0,
            gradient_low: 1e-6,
            entropy_low: 0.1,
            loss_high: 10.0,
            winrate_low: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerScalars {
    /// Used by adam/rmsprop.
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// Used by sgd with momentum.
    pub momentum: f32,
}

impl Default for OptimizerScalars {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            momentum: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub master_seed: u64,
    pub agent: AgentKind,
    pub hidden_layers: Vec<usize>,
    pub learning_rate: f32,
    pub exploration: ExplorationConfig,
    pub batch_size: usize,
    pub buffer_capacity: usize,
    pub replay: ReplayKind,
    pub gamma: f32,
    pub target_sync_period: usize,
    pub double_dqn: bool,
    pub loss: LossKind,
    pub optimizer: OptimizerKind,
    #[serde(default)]
    pub optimizer_scalars: OptimizerScalars,
    pub l2: f32,
    pub weight_init: WeightInit,
    pub games_per_cycle: usize,
    pub max_steps_per_game: usize,
    pub worker_count: usize,
    pub cycles_per_checkpoint: usize,
    pub max_checkpoints: usize,
    pub compression: bool,
    pub validation_enabled: bool,
    pub baseline_interval: usize,
    pub baseline_games_per_opponent: usize,
    pub stagnation_patience: usize,
    #[serde(default)]
    pub issue_thresholds: IssueThresholds,
    /// Prioritized-replay-only: the prioritization exponent (default 0.6
    /// per spec §4.3).
    #[serde(default = "default_prioritized_alpha")]
    pub prioritized_alpha: f32,
    /// Prioritized-replay-only: initial value for the IS-weight exponent,
    /// annealed to 1.0 across training (spec §4.3).
    #[serde(default = "default_prioritized_beta0")]
    pub prioritized_beta0: f32,
}

fn default_prioritized_alpha() -> f32 {
    0.6
}

fn default_prioritized_beta0() -> f32 {
    0.4
}

impl TrainingConfig {
    /// Validate ranges and internal consistency, refusing to initialize
    /// per spec §7 `InvalidConfiguration`.
    pub fn validate(&self) -> EngineResult<()> {
        let bad = |msg: &str| {
            log::warn!("rejecting training config: {msg}");
            Err(EngineError::InvalidConfiguration(msg.to_string()))
        };

        if self.batch_size == 0 {
            return bad("batch_size must be > 0");
        }
        if self.buffer_capacity < self.batch_size {
            return bad("buffer_capacity must be >= batch_size");
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return bad("gamma must be in [0, 1]");
        }
        if self.target_sync_period == 0 {
            return bad("target_sync_period must be > 0");
        }
        if self.learning_rate <= 0.0 {
            return bad("learning_rate must be > 0");
        }
        if self.worker_count == 0 {
            return bad("worker_count must be >= 1");
        }
        if self.games_per_cycle == 0 {
            return bad("games_per_cycle must be >= 1");
        }
        if self.max_steps_per_game == 0 {
            return bad("max_steps_per_game must be >= 1");
        }
        if self.max_checkpoints == 0 {
            return bad("max_checkpoints must be >= 1");
        }
        if self.hidden_layers.is_empty() {
            return bad("hidden_layers must not be empty");
        }
        match self.exploration {
            ExplorationConfig::Epsilon { start, end, .. } => {
                if !(0.0..=1.0).contains(&start) || !(0.0..=1.0).contains(&end) {
                    return bad("epsilon start/end must be in [0, 1]");
                }
            }
            ExplorationConfig::Temperature { start, end, .. } => {
                if start <= 0.0 || end <= 0.0 {
                    return bad("temperature start/end must be > 0");
                }
            }
        }
        if !(0.0..=1.0).contains(&self.prioritized_alpha) {
            return bad("prioritized_alpha must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.prioritized_beta0) {
            return bad("prioritized_beta0 must be in [0, 1]");
        }
        if self.baseline_interval == 0 {
            return bad("baseline_interval must be >= 1");
        }
        if self.baseline_games_per_opponent == 0 {
            return bad("baseline_games_per_opponent must be >= 1");
        }
        Ok(())
    }

    /// The feature width this config's state encoder must be built with.
    /// Always `STATE_FEATURES` today (spec pins one width at build time);
    /// kept as a method so callers have a single place to check against.
    pub fn state_features(&self) -> usize {
        STATE_FEATURES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> TrainingConfig {
        TrainingConfig {
            master_seed: 1,
            agent: AgentKind::Dqn,
            hidden_layers: vec![256, 256],
            learning_rate: 1e-3,
            exploration: ExplorationConfig::Epsilon {
                start: 1.0,
                end: 0.05,
                decay_rate: 1e-3,
            },
            batch_size: 32,
            buffer_capacity: 4096,
            replay: ReplayKind::Uniform,
            gamma: 0.99,
            target_sync_period: 1000,
            double_dqn: true,
            loss: LossKind::Huber,
            optimizer: OptimizerKind::Adam,
            optimizer_scalars: OptimizerScalars::default(),
            l2: 0.0,
            weight_init: WeightInit::He,
            games_per_cycle: 4,
            max_steps_per_game: 200,
            worker_count: 1,
            cycles_per_checkpoint: 10,
            max_checkpoints: 5,
            compression: false,
            validation_enabled: true,
            baseline_interval: 20,
            baseline_games_per_opponent: 10,
            stagnation_patience: 10,
            issue_thresholds: IssueThresholds::default(),
            prioritized_alpha: 0.6,
            prioritized_beta0: 0.4,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut c = valid_config();
        c.batch_size = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn capacity_smaller_than_batch_is_rejected() {
        let mut c = valid_config();
        c.buffer_capacity = 4;
        c.batch_size = 32;
        assert!(c.validate().is_err());
    }

    #[test]
    fn gamma_out_of_range_is_rejected() {
        let mut c = valid_config();
        c.gamma = 1.5;
        assert!(c.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let c = valid_config();
        let s = serde_json::to_string(&c).unwrap();
        let back: TrainingConfig = serde_json::from_str(&s).unwrap();
        assert_eq!(back.master_seed, c.master_seed);
        assert_eq!(back.batch_size, c.batch_size);
    }
}
