//! Plain value types emitted by the DQN algorithm and the self-play
//! orchestrator (spec §3, §4.6 step 9, §4.7 step 5).

use serde::{Deserialize, Serialize};

/// The result of one `Algorithm::update` call (spec §4.6 step 9). All
/// fields are `0.0` (and `batch_updates: false`) when the buffer hadn't
/// cleared warmup yet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyUpdateResult {
    pub avg_loss: f32,
    pub gradient_norm: f32,
    pub policy_entropy: f32,
    pub q_value_mean: f32,
    pub target_value_mean: f32,
    /// Whether this call actually drew a batch and trained, as opposed to
    /// returning the zero-valued warmup result.
    pub trained: bool,
    /// Set when this update's loss was non-finite (spec §4.6 "report
    /// NumericalInstability, skip the optimizer step"): the optimizer step
    /// was skipped and `avg_loss` is `NaN` so the validator's "any
    /// non-finite metric" rule (spec §4.10) still fires.
    pub numerical_instability: bool,
}

impl PolicyUpdateResult {
    pub fn zero() -> Self {
        Self {
            avg_loss: 0.0,
            gradient_norm: 0.0,
            policy_entropy: 0.0,
            q_value_mean: 0.0,
            target_value_mean: 0.0,
            trained: false,
            numerical_instability: false,
        }
    }
}

impl Default for PolicyUpdateResult {
    fn default() -> Self {
        Self::zero()
    }
}

/// Per-game outcome diagnostics the orchestrator aggregates across one
/// cycle's episodes (spec §4.7 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchupDiagnostics {
    pub white_win_rate: f32,
    pub black_win_rate: f32,
    pub draw_rate: f32,
    pub avg_game_length: f32,
    /// `|white_win_rate - black_win_rate|`.
    pub color_bias: f32,
    /// Fraction of games that hit `max_steps_per_game` rather than ending
    /// naturally.
    pub step_limit_ratio: f32,
    /// Mean of each episode's summed `Experience::reward` across the
    /// cycle's games.
    pub avg_reward: f32,
    /// Population variance of each episode's summed reward across the
    /// cycle's games.
    pub reward_variance: f32,
}

/// Everything one orchestrator cycle produces (spec §3, §4.7 step 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingCycleMetrics {
    pub cycle: usize,
    pub games_played: usize,
    pub avg_game_length: f32,
    pub experiences_collected: usize,
    pub matchup: MatchupDiagnostics,
    pub avg_reward: f32,
    pub reward_variance: f32,
    pub batch_updates: usize,
    pub avg_loss: f32,
    pub loss_variance: f32,
    pub policy_entropy: f32,
    pub gradient_norm: f32,
    /// Composite "is the agent playing sensible chess" signal, in
    /// `[0, 1]`; left to the orchestrator's configured heuristic (spec
    /// doesn't pin a formula beyond "game quality").
    pub game_quality: f32,
    /// Fraction of moves played that matched the baseline heuristic's
    /// top choice, when a baseline comparison ran this cycle.
    pub move_accuracy: f32,
    /// `experiences_collected / wall_clock_seconds` for the cycle.
    pub throughput: f32,
    /// `games_played / wall_clock_seconds` for the cycle.
    pub efficiency: f32,
}
