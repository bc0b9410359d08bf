//! The `Trainer` facade (spec §6): wires the seed fabric, replay buffer,
//! DQN algorithm, self-play orchestrator, checkpoint manager, and
//! training validator into the single entry point callers (tests,
//! binaries, dashboards — all external to this core) drive.
//!
//! Grounded on the teacher's `DQNAgent<B, M, E, D>::go`, which is the
//! only place in the teacher that wires a model, an environment, and an
//! optimizer together end to end; generalized here from one continuous
//! episode loop into the cycle-granular loop spec §4.7/§6 describes
//! (self-play a cycle's worth of games, drain into the buffer, train,
//! validate, checkpoint).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use burn::optim::Optimizer;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{Float, Tensor};
use rand::RngCore;

use crate::algo::dqn::{Dqn, DqnConfig};
use crate::algo::Algorithm;
use crate::baseline::{HeuristicOpponent, Opponent};
use crate::checkpoint::{CheckpointInfo, CheckpointManager, CheckpointMetadata};
use crate::config::{AgentKind, ExplorationConfig, LossKind as ConfigLossKind, ReplayKind, TrainingConfig};
use crate::env::ChessEnvironment;
use crate::error::{EngineError, EngineResult};
use crate::exploration::{Boltzmann, EpsilonGreedy, ExplorationPolicy};
use crate::metrics::{PolicyUpdateResult, TrainingCycleMetrics};
use crate::network::{DqnModel, LossKind, NetworkWrapper};
use crate::orchestrator::{OrchestratorConfig, Policy, SelfPlayOrchestrator};
use crate::replay::{PrioritizedReplayBuffer, ReplayBuffer, UniformReplayBuffer};
use crate::seed::{SeedFabric, StreamName};
use crate::traits::ToTensor;
use crate::validator::{ValidatorConfig, ValidatorReport, TrainingValidator};

/// Cooperative run state (spec §9 "model as an explicit run-state enum").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    Stopping,
    Stopped,
}

/// A frozen read-only view of the online network, handed to the
/// orchestrator's workers for the duration of one cycle (spec §5).
struct NetworkPolicy<B, M, const D: usize, S> {
    network: NetworkWrapper<B, M, D>,
    _state: std::marker::PhantomData<fn() -> S>,
}

impl<B, M, const D: usize, S> Policy<S> for NetworkPolicy<B, M, D, S>
where
    B: AutodiffBackend<FloatElem = f32, IntElem = i32>,
    M: DqnModel<B, D> + Send + Sync,
    B::Device: Send + Sync,
    S: Clone + Send + Sync,
    Vec<S>: ToTensor<B, D, Float>,
{
    fn action_values(&self, state: &S, _legal_actions: &[usize]) -> Vec<f32> {
        let device = self.network.device().clone();
        let batch: Tensor<B, D> = vec![state.clone()].to_tensor(&device);
        self.network.forward(batch).into_data().convert::<f32>().value
    }
}

/// One cycle's full report (experiences collected, metrics, validator
/// verdict, and any checkpoint taken), returned by `run_cycle`.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub metrics: TrainingCycleMetrics,
    pub update: PolicyUpdateResult,
    pub validation: ValidatorReport,
    pub checkpoint: Option<CheckpointVersionStamp>,
}

#[derive(Debug, Clone, Copy)]
pub struct CheckpointVersionStamp {
    pub version: u32,
}

/// The final summary a `run(n_cycles)` call produces (spec §7
/// "a run always produces a final report").
#[derive(Debug, Clone)]
pub struct RunReport {
    pub cycles_completed: usize,
    pub last_metrics: Option<TrainingCycleMetrics>,
    pub detected_issues: Vec<crate::validator::Issue>,
    pub stopped_early: bool,
    pub checkpoints_retained: Vec<u32>,
}

/// Wires every component in §4 together behind the public surface spec
/// §6 names. Generic over the caller's `burn` backend/model/optimizer
/// and their chess engine implementation, the way the teacher's
/// `DQNAgent<B, M, E, D>` is generic over its environment.
pub struct Trainer<B, M, O, E, const D: usize>
where
    B: AutodiffBackend<FloatElem = f32, IntElem = i32>,
    M: DqnModel<B, D> + Send + Sync,
    B::Device: Send + Sync + Clone,
    O: Optimizer<M, B>,
    E: ChessEnvironment + 'static,
    E::State: Clone + Send + Sync + 'static,
    Vec<E::State>: ToTensor<B, D, Float>,
{
    config: TrainingConfig,
    seeds: SeedFabric,
    env_factory: Arc<dyn Fn() -> E + Send + Sync>,
    dqn: Dqn<B, M, O, Box<dyn ReplayBuffer<E::State> + Send>, E::State, D>,
    orchestrator: SelfPlayOrchestrator,
    checkpoint_manager: CheckpointManager<B, M, D>,
    validator: TrainingValidator,
    heuristic_opponent: HeuristicOpponent,
    cycle: usize,
    history: Vec<TrainingCycleMetrics>,
    run_state: RunState,
    next_checkpoint_version: u32,
    stop_flag: Arc<AtomicBool>,
}

impl<B, M, O, E, const D: usize> Trainer<B, M, O, E, D>
where
    B: AutodiffBackend<FloatElem = f32, IntElem = i32>,
    M: DqnModel<B, D> + Send + Sync,
    B::Device: Send + Sync + Clone,
    O: Optimizer<M, B>,
    E: ChessEnvironment + 'static,
    E::State: Clone + Send + Sync + 'static,
    Vec<E::State>: ToTensor<B, D, Float>,
{
    /// Build a new trainer. `model_factory` constructs one fresh model
    /// instance (used for both the online and target network so their
    /// shapes are guaranteed compatible); `env_factory` constructs one
    /// fresh environment per self-play worker.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: TrainingConfig,
        device: B::Device,
        model_factory: impl Fn(&B::Device) -> M,
        optimizer: O,
        env_factory: impl Fn() -> E + Send + Sync + 'static,
        checkpoint_directory: impl Into<PathBuf>,
    ) -> EngineResult<Self> {
        config.validate()?;
        if !matches!(config.agent, AgentKind::Dqn) {
            return Err(EngineError::InvalidConfiguration(
                "Trainer currently wires only the DQN algorithm path".into(),
            ));
        }

        let seeds = SeedFabric::new();
        seeds.initialize(config.master_seed)?;

        let loss = match config.loss {
            ConfigLossKind::Huber => LossKind::Huber,
            ConfigLossKind::Mse => LossKind::Mse,
        };
        let online = NetworkWrapper::new(model_factory(&device), device.clone(), loss);
        let target = NetworkWrapper::new(model_factory(&device), device.clone(), loss);

        let buffer: Box<dyn ReplayBuffer<E::State> + Send> = match config.replay {
            ReplayKind::Uniform => Box::new(UniformReplayBuffer::new(config.buffer_capacity)),
            ReplayKind::Prioritized => Box::new(PrioritizedReplayBuffer::new(
                config.buffer_capacity,
                config.prioritized_alpha,
                config.prioritized_beta0,
                // beta reaches 1.0 around the point where a long run would
                // plausibly stop producing new checkpoints; a generous
                // fixed horizon keeps the anneal from completing too early.
                10_000,
            )),
        };

        let dqn_config = DqnConfig {
            gamma: config.gamma,
            batch_size: config.batch_size,
            target_sync_period: config.target_sync_period as u64,
            double_dqn: config.double_dqn,
            learning_rate: config.learning_rate as f64,
        };
        let dqn = Dqn::new(online, target, optimizer, buffer, dqn_config);

        let orchestrator = SelfPlayOrchestrator::new(OrchestratorConfig {
            games_per_cycle: config.games_per_cycle,
            max_steps_per_game: config.max_steps_per_game,
            worker_count: config.worker_count,
        });

        let checkpoint_manager = CheckpointManager::new(
            checkpoint_directory,
            config.max_checkpoints,
            config.compression,
            config.validation_enabled,
        );

        let validator = TrainingValidator::new(ValidatorConfig::from_training_config(&config));

        Ok(Self {
            config,
            seeds,
            env_factory: Arc::new(env_factory),
            dqn,
            orchestrator,
            checkpoint_manager,
            validator,
            heuristic_opponent: HeuristicOpponent::new(crate::baseline::Weights::default()),
            cycle: 0,
            history: Vec::new(),
            run_state: RunState::Running,
            next_checkpoint_version: 0,
            stop_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn latest_metrics(&self) -> Option<&TrainingCycleMetrics> {
        self.history.last()
    }

    pub fn metrics_history(&self) -> &[TrainingCycleMetrics] {
        &self.history
    }

    pub fn checkpoints(&self) -> Vec<&CheckpointInfo> {
        self.checkpoint_manager.list()
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    /// Cooperative stop: workers finish their in-flight episode within
    /// one step (spec §5); subsequent `run_cycle`/`run` calls return
    /// immediately once observed.
    pub fn stop(&mut self) {
        log::info!("stop requested at cycle {}", self.cycle);
        self.stop_flag.store(true, Ordering::Relaxed);
        self.orchestrator.stop();
        self.run_state = RunState::Stopping;
    }

    fn exploration_rate(&self) -> f32 {
        let t = self.cycle as f32;
        match self.config.exploration {
            ExplorationConfig::Epsilon {
                start,
                end,
                decay_rate,
            } => crate::decay::Linear::new(decay_rate, start, end)
                .map(|d| {
                    use crate::decay::Decay;
                    d.evaluate(t)
                })
                .unwrap_or(end),
            ExplorationConfig::Temperature {
                start,
                end,
                decay_rate,
            } => crate::decay::Linear::new(decay_rate, start, end)
                .map(|d| {
                    use crate::decay::Decay;
                    d.evaluate(t)
                })
                .unwrap_or(end),
        }
    }

    /// Run exactly one training cycle: self-play `games_per_cycle`
    /// episodes, drain into the replay buffer, perform
    /// `ceil(new_experiences / batch_size)` batch updates, validate, and
    /// checkpoint on cadence (spec §4.7 steps 1-5).
    pub fn run_cycle(&mut self) -> EngineResult<CycleReport> {
        if self.stop_flag.load(Ordering::Relaxed) {
            return Err(EngineError::Cancelled);
        }

        self.dqn.set_cycle(self.cycle);

        let snapshot = NetworkPolicy {
            network: self.dqn.online().clone(),
            _state: std::marker::PhantomData,
        };
        let policy: Arc<NetworkPolicy<B, M, D, E::State>> = Arc::new(snapshot);

        let worker_count = self.config.worker_count.max(1);
        let worker_rngs: Vec<Box<dyn RngCore + Send>> = (0..worker_count)
            .map(|i| -> EngineResult<Box<dyn RngCore + Send>> {
                Ok(Box::new(self.seeds.child_stream(StreamName::SelfPlay, i as u64)?))
            })
            .collect::<EngineResult<_>>()?;

        let rate = self.exploration_rate();
        let exploration_kind = matches!(self.config.exploration, ExplorationConfig::Epsilon { .. });

        let env_factory = Arc::clone(&self.env_factory);
        let start = std::time::Instant::now();

        let (experiences, matchup) = if exploration_kind {
            self.orchestrator.run_cycle(
                move || env_factory(),
                policy,
                move || EpsilonGreedy::new(rate),
                worker_rngs,
            )
        } else {
            self.orchestrator.run_cycle(
                move || env_factory(),
                policy,
                move || Boltzmann::new(rate),
                worker_rngs,
            )
        };

        let elapsed = start.elapsed().as_secs_f32().max(f32::EPSILON);
        let games_played = {
            let n = matchup.avg_game_length;
            let total_experiences = experiences.len() as f32;
            if n > 0.0 {
                (total_experiences / n).round() as usize
            } else {
                0
            }
        };
        let experiences_collected = experiences.len();

        let batch_updates = (experiences_collected as f64 / self.config.batch_size as f64).ceil() as usize;
        let batch_updates = batch_updates.max(1);

        let mut replay_rng = self.seeds.child_stream(StreamName::ReplayBuffer, self.cycle as u64)?;

        let mut last_update = PolicyUpdateResult::zero();
        let mut remaining = experiences;
        let mut avg_losses = Vec::new();
        for i in 0..batch_updates {
            let batch_experiences = if i == 0 {
                std::mem::take(&mut remaining)
            } else {
                Vec::new()
            };
            last_update = self.dqn.update(batch_experiences, &mut replay_rng)?;
            if last_update.trained {
                avg_losses.push(last_update.avg_loss);
            }
        }

        let avg_loss = if avg_losses.is_empty() {
            0.0
        } else {
            avg_losses.iter().sum::<f32>() / avg_losses.len() as f32
        };
        let loss_variance = if avg_losses.len() < 2 {
            0.0
        } else {
            let m = avg_loss;
            avg_losses.iter().map(|l| (l - m).powi(2)).sum::<f32>() / avg_losses.len() as f32
        };

        let metrics = TrainingCycleMetrics {
            cycle: self.cycle,
            games_played,
            avg_game_length: matchup.avg_game_length,
            experiences_collected,
            matchup,
            avg_reward: matchup.avg_reward,
            reward_variance: matchup.reward_variance,
            batch_updates,
            avg_loss,
            loss_variance,
            policy_entropy: last_update.policy_entropy,
            gradient_norm: last_update.gradient_norm,
            game_quality: 1.0 - matchup.step_limit_ratio,
            move_accuracy: 0.0,
            throughput: experiences_collected as f32 / elapsed,
            efficiency: games_played as f32 / elapsed,
        };

        let validation = self.validator.validate(metrics.clone(), last_update);
        self.history.push(metrics.clone());

        let checkpoint = if self.config.cycles_per_checkpoint > 0
            && (self.cycle + 1) % self.config.cycles_per_checkpoint == 0
        {
            let version = self.next_checkpoint_version;
            self.next_checkpoint_version += 1;
            let performance = metrics.avg_reward as f64;
            let info = self.checkpoint_manager.create(
                self.dqn.online(),
                version,
                CheckpointMetadata {
                    cycle: self.cycle,
                    performance,
                    description: format!("cycle {} auto-checkpoint", self.cycle),
                    is_best: false,
                    extras: serde_json::Map::new(),
                },
            )?;
            Some(CheckpointVersionStamp {
                version: info.version,
            })
        } else {
            None
        };

        log::debug!(
            "cycle {} complete: {games_played} games, {experiences_collected} experiences, avg_loss {avg_loss:.4}",
            self.cycle
        );

        self.cycle += 1;
        if validation.should_stop {
            log::info!("validator recommended stopping after cycle {}", self.cycle - 1);
            self.run_state = RunState::Stopped;
        }

        Ok(CycleReport {
            metrics,
            update: last_update,
            validation,
            checkpoint,
        })
    }

    /// Run up to `n_cycles`, stopping early if the validator recommends
    /// it or the cooperative stop flag is observed (spec §6/§7).
    pub fn run(&mut self, n_cycles: usize) -> EngineResult<RunReport> {
        let mut completed = 0;
        let mut last_issues = Vec::new();
        let mut stopped_early = false;

        for _ in 0..n_cycles {
            if self.stop_flag.load(Ordering::Relaxed) {
                stopped_early = true;
                break;
            }
            let report = self.run_cycle()?;
            completed += 1;
            last_issues = report.validation.issues.clone();
            if report.validation.should_stop {
                stopped_early = true;
                break;
            }
        }

        Ok(RunReport {
            cycles_completed: completed,
            last_metrics: self.history.last().cloned(),
            detected_issues: last_issues,
            stopped_early,
            checkpoints_retained: self
                .checkpoint_manager
                .list()
                .into_iter()
                .map(|c| c.version)
                .collect(),
        })
    }

    /// Restore a prior checkpoint into the online network, syncing the
    /// target network immediately after (spec §4.5, §6).
    pub fn load_checkpoint(&mut self, version: u32) -> EngineResult<()> {
        let info = self
            .checkpoint_manager
            .get(version)
            .ok_or_else(|| EngineError::InvalidConfiguration(format!("no checkpoint v{version}")))?
            .clone();
        let (online, target) = (self.dqn.online_mut(), self.dqn.target_mut());
        self.checkpoint_manager.load(&info, online, Some(target))
    }

    /// Pause training, play `baseline_games_per_opponent` games each
    /// against {random, heuristic, material} opponents, and report the
    /// weighted aggregate score to the validator (spec §4.7 step 5,
    /// §4.10 baseline gating).
    pub fn evaluate_baselines(&mut self) -> EngineResult<crate::validator::BaselineScore>
    where
        E: Send,
    {
        let mut env = (self.env_factory)();
        let games = self.config.baseline_games_per_opponent.max(1);

        // Each tier gets its own child stream of `StreamName::General` so
        // the three evaluations don't share (and perturb) one RNG
        // sequence, while staying reproducible from the master seed.
        let mut random_rng = self.seeds.child_stream(StreamName::General, self.cycle as u64 * 3)?;
        let mut heuristic_rng = self.seeds.child_stream(StreamName::General, self.cycle as u64 * 3 + 1)?;
        let mut material_rng = self.seeds.child_stream(StreamName::General, self.cycle as u64 * 3 + 2)?;

        // Three genuinely distinct opponents (spec §4.10): uniform random
        // choice among legal moves, the configured heuristic evaluator,
        // and a material-only evaluator (every positional weight zeroed).
        let random_score = self.play_against(&mut env, games, &Opponent::Random, &mut random_rng)?;
        let heuristic_score = self.play_against(
            &mut env,
            games,
            &Opponent::Heuristic(self.heuristic_opponent),
            &mut heuristic_rng,
        )?;
        let material_score = self.play_against(
            &mut env,
            games,
            &Opponent::Heuristic(HeuristicOpponent::new(crate::baseline::Weights {
                mobility: 0.0,
                king_safety: 0.0,
                doubled_pawn_penalty: 0.0,
                isolated_pawn_penalty: 0.0,
                passed_pawn_bonus: 0.0,
                ..crate::baseline::Weights::default()
            })),
            &mut material_rng,
        )?;

        let score = crate::validator::BaselineScore {
            random: random_score,
            heuristic: heuristic_score,
            material: material_score,
        };
        self.validator.record_baseline(score);
        Ok(score)
    }

    /// Play `games` fixed-length games of the online network against
    /// `opponent`, returning the agent's win rate. `rng` backs `opponent`'s
    /// own stochastic choices (used by `Opponent::Random` only).
    fn play_against(
        &self,
        env: &mut E,
        games: usize,
        opponent: &Opponent,
        rng: &mut dyn RngCore,
    ) -> EngineResult<f32> {
        let mut wins = 0usize;
        for game in 0..games {
            let mut state = env.reset();
            let agent_is_white = game % 2 == 0;
            let mut steps = 0usize;
            loop {
                if steps >= self.config.max_steps_per_game {
                    break;
                }
                let legal = env.legal_actions(&state);
                if legal.is_empty() {
                    break;
                }
                let agent_turn = (steps % 2 == 0) == agent_is_white;
                let action = if agent_turn {
                    let device = self.dqn.online().device().clone();
                    let batch: Tensor<B, D> = vec![state.clone()].to_tensor(&device);
                    let values = self
                        .dqn
                        .online()
                        .forward(batch)
                        .into_data()
                        .convert::<f32>()
                        .value;
                    crate::exploration::argmax_legal(&legal, &values)
                } else {
                    let opponent_color = if agent_is_white {
                        crate::env::Color::Black
                    } else {
                        crate::env::Color::White
                    };
                    opponent
                        .select(env, opponent_color, &legal, rng)
                        .map_err(|_| EngineError::EvaluationError {
                            legal_action_count: legal.len(),
                        })?
                };
                let outcome = env.step(action);
                steps += 1;
                match outcome.next_state {
                    Some(next) if !outcome.done => state = next,
                    _ => {
                        if outcome.done {
                            let color = if agent_is_white {
                                crate::env::Color::White
                            } else {
                                crate::env::Color::Black
                            };
                            if env.position_evaluation(color) > 0.0 {
                                wins += 1;
                            }
                        }
                        break;
                    }
                }
            }
        }
        Ok(wins as f32 / games.max(1) as f32)
    }
}
