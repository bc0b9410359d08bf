//! The chess engine collaborator contract (spec §6). The core never
//! implements chess rules itself — it consumes whatever engine the host
//! application wires in through this trait, the same way the teacher's
//! `Environment` trait let an agent stay ignorant of its MDP's concrete
//! dynamics.

use crate::codec::Move;

/// Why an episode ended (spec §4.7 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EpisodeTerminationReason {
    GameEnded,
    StepLimit,
    Manual,
}

/// The terminal/non-terminal status of a position, as reported by
/// `game_status` (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameStatus {
    InProgress,
    Checkmate,
    Stalemate,
    DrawByRepetition,
    DrawByFiftyMoveRule,
    DrawByInsufficientMaterial,
}

impl GameStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, GameStatus::InProgress)
    }
}

/// The side to move / mover perspective used by `position_evaluation`
/// and the baseline opponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opposite(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

/// The outcome of one `step` call (spec §6).
pub struct StepOutcome<S> {
    pub next_state: Option<S>,
    pub reward: f64,
    pub done: bool,
    pub termination_reason: Option<EpisodeTerminationReason>,
}

/// A chess engine usable as the environment for self-play. `State` is
/// whatever the engine chooses to represent a position with; the codec
/// turns it into the fixed-width feature vector the network consumes.
/// Reward shaping is entirely the engine's responsibility (spec §9 open
/// question: "the core does not define their numeric semantics").
pub trait ChessEnvironment {
    type State: Clone;

    fn reset(&mut self) -> Self::State;

    fn current_state(&self) -> Self::State;

    /// Legal action indices at `state`, encoded via
    /// [`crate::codec::ActionCodec`].
    fn legal_actions(&self, state: &Self::State) -> Vec<usize>;

    /// Apply the given action index, returning the resulting transition.
    fn step(&mut self, action: usize) -> StepOutcome<Self::State>;

    fn game_status(&self) -> GameStatus;

    /// Replace the current position with the one described by `fen`.
    /// Returns `false` if `fen` doesn't parse.
    fn load_fen(&mut self, fen: &str) -> bool;

    fn to_fen(&self) -> String;

    /// A static positional evaluation from `color`'s perspective,
    /// independent of the agent's own value function (used by the
    /// baseline opponent and by diagnostics, not by the learning
    /// algorithm itself).
    fn position_evaluation(&self, color: Color) -> f64;

    /// Decode an action index back into a move descriptor. Implementations
    /// typically delegate to [`crate::codec::ActionCodec::decode_action`]
    /// and then disambiguate promotions against their own legal-move list.
    fn decode_move(&self, action: usize) -> Move;
}
