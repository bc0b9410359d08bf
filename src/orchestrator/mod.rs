//! The Self-Play Orchestrator (spec §4.7, concurrency model spec §5):
//! drives the training loop at cycle granularity across a worker thread
//! pool, decoupled from the neural network's concrete type via the
//! [`Policy`] trait so this module never depends on `burn`'s generics —
//! only `crate::trainer` wires a real network in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Sender};
use rand::RngCore;

use crate::env::{ChessEnvironment, Color, EpisodeTerminationReason};
use crate::exploration::ExplorationPolicy;
use crate::metrics::MatchupDiagnostics;
use crate::replay::Experience;

/// A read-only, thread-safe view onto the online network's action
/// values, frozen for the duration of one cycle (spec §5: "workers use a
/// read-only snapshot frozen at the start of the cycle").
pub trait Policy<S>: Send + Sync {
    fn action_values(&self, state: &S, legal_actions: &[usize]) -> Vec<f32>;
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub games_per_cycle: usize,
    pub max_steps_per_game: usize,
    pub worker_count: usize,
}

/// One channel message: a completed episode's experiences plus the
/// per-game outcome diagnostics needed for matchup aggregation.
struct EpisodeResult<S> {
    experiences: Vec<Experience<S>>,
    winner: Option<Color>,
    length: usize,
    termination_reason: EpisodeTerminationReason,
    /// Sum of every step's `Experience::reward` over the episode (spec
    /// §3/§4.7 step 5's `avg_reward`/`reward_variance`).
    total_reward: f64,
}

/// Drives `games_per_cycle` self-play episodes across `worker_count`
/// threads per cycle. Holds only the cooperative stop flag across calls;
/// everything else is supplied fresh to `run_cycle` so the orchestrator
/// itself carries no network/environment state between cycles.
pub struct SelfPlayOrchestrator {
    config: OrchestratorConfig,
    stop: Arc<AtomicBool>,
}

impl SelfPlayOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative cancellation: workers observe this between steps and
    /// at channel sends, finishing their in-flight episode within one
    /// step (spec §4.7, §5).
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn reset_stop(&self) {
        self.stop.store(false, Ordering::Relaxed);
    }

    /// Run one cycle's worth of self-play episodes and return the
    /// collected experiences (in per-worker episode order, spec §5
    /// ordering guarantee (a); cross-worker interleaving is unspecified,
    /// guarantee (b)) plus matchup diagnostics.
    ///
    /// `env_factory` builds one environment per worker (thread-confined,
    /// per spec §5). `policy` is the frozen online-network snapshot.
    /// `exploration_factory` builds one exploration policy per worker —
    /// exploration state (e.g. epsilon) is not shared across workers, but
    /// all workers are configured with the same rate by the caller.
    #[allow(clippy::too_many_arguments)]
    pub fn run_cycle<E, F, P, X, XF>(
        &self,
        env_factory: F,
        policy: Arc<P>,
        exploration_factory: XF,
        mut worker_rngs: Vec<Box<dyn RngCore + Send>>,
    ) -> (Vec<Experience<E::State>>, MatchupDiagnostics)
    where
        E: ChessEnvironment + 'static,
        E::State: Send + 'static,
        F: Fn() -> E + Send + Sync + 'static,
        P: Policy<E::State> + 'static,
        X: ExplorationPolicy + 'static,
        XF: Fn() -> X + Send + Sync + 'static,
    {
        let worker_count = self.config.worker_count.max(1);
        assert_eq!(
            worker_rngs.len(),
            worker_count,
            "caller must supply one child RNG stream per worker"
        );
        log::debug!(
            "starting self-play cycle: {} games across {worker_count} worker(s)",
            self.config.games_per_cycle
        );

        // Bounded channel backpressures workers against memory (spec §5).
        let (tx, rx) = bounded::<EpisodeResult<E::State>>(worker_count * 2);

        let games_per_worker = divide_games(self.config.games_per_cycle, worker_count);
        let env_factory = Arc::new(env_factory);
        let exploration_factory = Arc::new(exploration_factory);
        let policy = Arc::clone(&policy);

        std::thread::scope(|scope| {
            for (worker_index, games) in games_per_worker.into_iter().enumerate() {
                let tx: Sender<EpisodeResult<E::State>> = tx.clone();
                let env_factory = Arc::clone(&env_factory);
                let exploration_factory = Arc::clone(&exploration_factory);
                let policy = Arc::clone(&policy);
                let stop = Arc::clone(&self.stop);
                let max_steps = self.config.max_steps_per_game;
                let mut rng = worker_rngs
                    .pop()
                    .expect("one rng per worker, popped in order");

                scope.spawn(move || {
                    let mut env = env_factory();
                    let mut exploration = exploration_factory();

                    for game_index in 0..games {
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                        // Color rotates across games to bound color bias
                        // (spec §4.7): worker-local game parity, offset by
                        // worker index so workers don't all rotate in
                        // lockstep.
                        let mover_color = if (game_index + worker_index) % 2 == 0 {
                            Color::White
                        } else {
                            Color::Black
                        };

                        let result = play_episode(
                            &mut env,
                            &*policy,
                            &mut exploration,
                            rng.as_mut(),
                            max_steps,
                            mover_color,
                            &stop,
                        );

                        if tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            let mut experiences = Vec::new();
            let mut wins_white = 0usize;
            let mut wins_black = 0usize;
            let mut draws = 0usize;
            let mut total_games = 0usize;
            let mut total_length = 0usize;
            let mut step_limit_hits = 0usize;
            let mut episode_rewards = Vec::new();

            for result in rx.iter() {
                total_games += 1;
                total_length += result.length;
                if result.termination_reason == EpisodeTerminationReason::StepLimit {
                    step_limit_hits += 1;
                }
                match result.winner {
                    Some(Color::White) => wins_white += 1,
                    Some(Color::Black) => wins_black += 1,
                    None => draws += 1,
                }
                episode_rewards.push(result.total_reward);
                experiences.extend(result.experiences);
            }

            let diagnostics = if total_games == 0 {
                MatchupDiagnostics {
                    white_win_rate: 0.0,
                    black_win_rate: 0.0,
                    draw_rate: 0.0,
                    avg_game_length: 0.0,
                    color_bias: 0.0,
                    step_limit_ratio: 0.0,
                    avg_reward: 0.0,
                    reward_variance: 0.0,
                }
            } else {
                let n = total_games as f32;
                let white_win_rate = wins_white as f32 / n;
                let black_win_rate = wins_black as f32 / n;
                let mean_reward = episode_rewards.iter().sum::<f64>() / total_games as f64;
                let reward_variance = episode_rewards
                    .iter()
                    .map(|r| (r - mean_reward).powi(2))
                    .sum::<f64>()
                    / total_games as f64;
                MatchupDiagnostics {
                    white_win_rate,
                    black_win_rate,
                    draw_rate: draws as f32 / n,
                    avg_game_length: total_length as f32 / n,
                    color_bias: (white_win_rate - black_win_rate).abs(),
                    step_limit_ratio: step_limit_hits as f32 / n,
                    avg_reward: mean_reward as f32,
                    reward_variance: reward_variance as f32,
                }
            };

            log::debug!(
                "cycle finished: {total_games} games, {} experiences, color bias {:.3}",
                experiences.len(),
                diagnostics.color_bias
            );
            (experiences, diagnostics)
        })
    }
}

fn divide_games(total: usize, workers: usize) -> Vec<usize> {
    let base = total / workers;
    let remainder = total % workers;
    (0..workers)
        .map(|i| base + usize::from(i < remainder))
        .collect()
}

/// Play one full episode: reset, then step until termination or the
/// step limit, recording one `Experience` per transition (spec §4.7
/// step 2).
#[allow(clippy::too_many_arguments)]
fn play_episode<E, P, X>(
    env: &mut E,
    policy: &P,
    exploration: &mut X,
    rng: &mut dyn RngCore,
    max_steps: usize,
    mover: Color,
    stop: &AtomicBool,
) -> EpisodeResult<E::State>
where
    E: ChessEnvironment,
    P: Policy<E::State>,
    X: ExplorationPolicy,
{
    let mut state = env.reset();
    let mut experiences = Vec::new();
    let mut hit_step_limit = false;
    let mut stopped_manually = false;
    let mut steps = 0usize;
    let mut total_reward = 0.0f64;

    loop {
        if stop.load(Ordering::Relaxed) {
            stopped_manually = true;
            break;
        }
        if steps >= max_steps {
            hit_step_limit = true;
            break;
        }

        let legal = env.legal_actions(&state);
        if legal.is_empty() {
            break;
        }

        let values = policy.action_values(&state, &legal);
        let action = exploration.select(&legal, &values, rng);

        let outcome = env.step(action);
        steps += 1;
        total_reward += outcome.reward;

        let next_legal = outcome
            .next_state
            .as_ref()
            .map(|s| env.legal_actions(s))
            .unwrap_or_default();

        experiences.push(Experience {
            state: state.clone(),
            legal_actions: legal,
            action,
            reward: outcome.reward,
            next_state: outcome.next_state.clone(),
            done: outcome.done,
            next_legal_actions: next_legal,
        });

        match outcome.next_state {
            Some(next) if !outcome.done => state = next,
            _ => break,
        }
    }

    let winner = if env.game_status().is_terminal() && !hit_step_limit {
        match env.position_evaluation(mover) {
            v if v > 0.0 => Some(mover),
            v if v < 0.0 => Some(mover.opposite()),
            _ => None,
        }
    } else {
        None
    };

    let termination_reason = if stopped_manually {
        EpisodeTerminationReason::Manual
    } else if hit_step_limit {
        EpisodeTerminationReason::StepLimit
    } else {
        EpisodeTerminationReason::GameEnded
    };

    EpisodeResult {
        length: steps,
        winner,
        experiences,
        termination_reason,
        total_reward,
    }
}

/// A `Policy` sourced from a shared, lock-protected host-side buffer —
/// useful for tests and for adapters that don't have a `burn` backend at
/// all (e.g. a purely tabular policy snapshot).
pub struct TableSnapshot<S> {
    lookup: Mutex<Box<dyn Fn(&S, &[usize]) -> Vec<f32> + Send>>,
}

impl<S> TableSnapshot<S> {
    pub fn new(lookup: impl Fn(&S, &[usize]) -> Vec<f32> + Send + 'static) -> Self {
        Self {
            lookup: Mutex::new(Box::new(lookup)),
        }
    }
}

impl<S> Policy<S> for TableSnapshot<S>
where
    S: Send + Sync,
{
    fn action_values(&self, state: &S, legal_actions: &[usize]) -> Vec<f32> {
        (self.lookup.lock().expect("snapshot lock poisoned"))(state, legal_actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::StepOutcome;
    use crate::exploration::EpsilonGreedy;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[derive(Clone)]
    struct CountingEnv {
        step: usize,
        limit: usize,
    }

    impl ChessEnvironment for CountingEnv {
        type State = usize;

        fn reset(&mut self) -> Self::State {
            self.step = 0;
            0
        }
        fn current_state(&self) -> Self::State {
            self.step
        }
        fn legal_actions(&self, _state: &Self::State) -> Vec<usize> {
            vec![0, 1]
        }
        fn step(&mut self, action: usize) -> StepOutcome<Self::State> {
            self.step += 1;
            let done = self.step >= self.limit;
            StepOutcome {
                next_state: if done { None } else { Some(self.step) },
                reward: action as f64,
                done,
                termination_reason: None,
            }
        }
        fn game_status(&self) -> crate::env::GameStatus {
            if self.step >= self.limit {
                crate::env::GameStatus::Checkmate
            } else {
                crate::env::GameStatus::InProgress
            }
        }
        fn load_fen(&mut self, _fen: &str) -> bool {
            true
        }
        fn to_fen(&self) -> String {
            String::new()
        }
        fn position_evaluation(&self, _color: Color) -> f64 {
            0.0
        }
        fn decode_move(&self, action: usize) -> crate::codec::Move {
            crate::codec::ActionCodec::decode_action(action)
        }
    }

    #[test]
    fn run_cycle_collects_experiences_from_every_worker() {
        let orchestrator = SelfPlayOrchestrator::new(OrchestratorConfig {
            games_per_cycle: 4,
            max_steps_per_game: 3,
            worker_count: 2,
        });
        let policy = Arc::new(TableSnapshot::new(|_: &usize, legal: &[usize]| {
            vec![0.0; legal.len().max(2)]
        }));
        let rngs: Vec<Box<dyn RngCore + Send>> = (0..2)
            .map(|i| Box::new(ChaCha8Rng::seed_from_u64(i)) as Box<dyn RngCore + Send>)
            .collect();

        let (experiences, diagnostics) = orchestrator.run_cycle(
            || CountingEnv { step: 0, limit: 3 },
            policy,
            || EpsilonGreedy::new(1.0),
            rngs,
        );

        assert_eq!(experiences.len(), 4 * 3);
        assert_eq!(diagnostics.avg_game_length, 3.0);
    }

    #[test]
    fn stop_flag_halts_new_episodes() {
        let orchestrator = SelfPlayOrchestrator::new(OrchestratorConfig {
            games_per_cycle: 100,
            max_steps_per_game: 1,
            worker_count: 1,
        });
        orchestrator.stop();
        let policy = Arc::new(TableSnapshot::new(|_: &usize, legal: &[usize]| {
            vec![0.0; legal.len().max(2)]
        }));
        let rngs: Vec<Box<dyn RngCore + Send>> =
            vec![Box::new(ChaCha8Rng::seed_from_u64(0))];

        let (experiences, _diagnostics) = orchestrator.run_cycle(
            || CountingEnv { step: 0, limit: 1 },
            policy,
            || EpsilonGreedy::new(1.0),
            rngs,
        );

        assert!(experiences.is_empty());
    }
}
