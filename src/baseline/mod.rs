//! The Baseline Opponent (spec §4.8): a deterministic heuristic player,
//! built in the teacher's small-constructor-validated-value-type style
//! (cf. `crate::decay`), used to measure agent strength without
//! depending on the learned network at all.
//!
//! The collaborator contract (spec §6) exposes no piece-placement query,
//! only `to_fen()`/`load_fen()` — so every weighted feature below (material,
//! piece-square tables, pawn structure, king safety, mobility) is computed
//! from a FEN string the opponent parses itself. This keeps the chess rules
//! engine entirely out of scope (spec §1 Non-goal) while still letting the
//! heuristic read the board it's scoring.

use rand::RngCore;

use crate::env::{ChessEnvironment, Color, GameStatus};
use crate::error::{EngineError, EngineResult};
use crate::exploration::argmax_legal;

/// Standard centipawn piece values plus the positional-signal weights
/// spec §4.8 names (material, piece-square, pawn structure, king safety,
/// mobility), exposed as named fields so the heuristic is introspectable
/// and unit-testable per feature rather than an opaque vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub pawn: f64,
    pub knight: f64,
    pub bishop: f64,
    pub rook: f64,
    pub queen: f64,
    pub mobility: f64,
    pub king_safety: f64,
    pub doubled_pawn_penalty: f64,
    pub isolated_pawn_penalty: f64,
    pub passed_pawn_bonus: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            pawn: 100.0,
            knight: 320.0,
            bishop: 330.0,
            rook: 500.0,
            queen: 900.0,
            mobility: 1.0,
            king_safety: 5.0,
            doubled_pawn_penalty: 10.0,
            isolated_pawn_penalty: 8.0,
            passed_pawn_bonus: 20.0,
        }
    }
}

/// One of the six piece kinds, independent of color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Piece {
    kind: Kind,
    color: Color,
}

/// An 8x8 board parsed out of a FEN board-placement field. `squares[r][f]`
/// is rank `r` (0 = rank 1) and file `f` (0 = file a), matching neither the
/// engine's own square numbering nor `crate::codec`'s — this is a private
/// re-derivation used only for scoring, not for move encoding.
struct Board {
    squares: [[Option<Piece>; 8]; 8],
}

impl Board {
    /// Parse the piece-placement field (the first space-delimited part of
    /// a FEN string). Malformed input yields an empty board rather than
    /// panicking, since evaluation must stay total over whatever a
    /// well-behaved collaborator hands back from `to_fen()`.
    fn from_fen(fen: &str) -> Self {
        let mut squares: [[Option<Piece>; 8]; 8] = [[None; 8]; 8];
        let placement = fen.split_whitespace().next().unwrap_or("");
        for (rank_from_top, row) in placement.split('/').enumerate() {
            if rank_from_top >= 8 {
                break;
            }
            let rank = 7 - rank_from_top;
            let mut file = 0usize;
            for ch in row.chars() {
                if file >= 8 {
                    break;
                }
                if let Some(skip) = ch.to_digit(10) {
                    file += skip as usize;
                    continue;
                }
                if let Some(piece) = parse_piece(ch) {
                    squares[rank][file] = Some(piece);
                }
                file += 1;
            }
        }
        Self { squares }
    }

    fn piece_at(&self, rank: usize, file: usize) -> Option<Piece> {
        self.squares[rank][file]
    }

    fn pieces(&self) -> impl Iterator<Item = (usize, usize, Piece)> + '_ {
        (0..8).flat_map(move |rank| {
            (0..8).filter_map(move |file| self.piece_at(rank, file).map(|p| (rank, file, p)))
        })
    }

    fn king_square(&self, color: Color) -> Option<(usize, usize)> {
        self.pieces()
            .find(|&(_, _, p)| p.kind == Kind::King && p.color == color)
            .map(|(r, f, _)| (r, f))
    }
}

fn parse_piece(ch: char) -> Option<Piece> {
    let color = if ch.is_ascii_uppercase() {
        Color::White
    } else {
        Color::Black
    };
    let kind = match ch.to_ascii_lowercase() {
        'p' => Kind::Pawn,
        'n' => Kind::Knight,
        'b' => Kind::Bishop,
        'r' => Kind::Rook,
        'q' => Kind::Queen,
        'k' => Kind::King,
        _ => return None,
    };
    Some(Piece { kind, color })
}

/// Piece-square bonus, centipawns, from White's perspective; mirrored
/// vertically for Black. Indexed `[rank][file]`, rank 0 = rank 1. A small,
/// standard-shape table (favor central squares/advancement) rather than a
/// tuned one — the heuristic only needs to be a fixed, deterministic
/// baseline, not a strong engine (spec §1 Non-goal: "producing a player of
/// a given strength").
const PAWN_TABLE: [[i32; 8]; 8] = [
    [0, 0, 0, 0, 0, 0, 0, 0],
    [5, 5, 5, -10, -10, 5, 5, 5],
    [5, -5, -10, 0, 0, -10, -5, 5],
    [0, 0, 0, 20, 20, 0, 0, 0],
    [5, 5, 10, 25, 25, 10, 5, 5],
    [10, 10, 20, 30, 30, 20, 10, 10],
    [50, 50, 50, 50, 50, 50, 50, 50],
    [0, 0, 0, 0, 0, 0, 0, 0],
];

const CENTER_TABLE: [[i32; 8]; 8] = [
    [-20, -10, -10, -10, -10, -10, -10, -20],
    [-10, 0, 0, 0, 0, 0, 0, -10],
    [-10, 0, 5, 5, 5, 5, 0, -10],
    [-10, 0, 5, 10, 10, 5, 0, -10],
    [-10, 0, 5, 10, 10, 5, 0, -10],
    [-10, 0, 5, 5, 5, 5, 0, -10],
    [-10, 0, 0, 0, 0, 0, 0, -10],
    [-20, -10, -10, -10, -10, -10, -10, -20],
];

fn piece_square_value(kind: Kind, color: Color, rank: usize, file: usize) -> i32 {
    let rank = if color == Color::White { rank } else { 7 - rank };
    match kind {
        Kind::Pawn => PAWN_TABLE[rank][file],
        Kind::Knight | Kind::Bishop => CENTER_TABLE[rank][file],
        _ => 0,
    }
}

fn material_value(kind: Kind, w: &Weights) -> f64 {
    match kind {
        Kind::Pawn => w.pawn,
        Kind::Knight => w.knight,
        Kind::Bishop => w.bishop,
        Kind::Rook => w.rook,
        Kind::Queen => w.queen,
        Kind::King => 0.0,
    }
}

/// A deterministic, non-learning evaluator composed of weighted features:
/// material, piece-square tables, pawn-structure penalties/bonuses, a
/// king-safety proxy, and mobility differential (spec §4.8). No randomness
/// anywhere; identical inputs always produce identical outputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicOpponent {
    weights: Weights,
}

impl HeuristicOpponent {
    pub fn new(weights: Weights) -> Self {
        Self { weights }
    }

    /// Pick the best legal action by simulating each candidate on a board
    /// copy and evaluating the resulting position from the mover's
    /// perspective, breaking ties lexicographically on action index.
    ///
    /// Returns `EvaluationError` if `legal_actions` is non-empty but no
    /// move could be evaluated — per spec §4.8/§7 this is treated as a
    /// programmer bug (an environment that reports legal actions but then
    /// can't play any of them), not a recoverable condition.
    pub fn select<E: ChessEnvironment>(
        &self,
        env: &mut E,
        mover: Color,
        legal_actions: &[usize],
    ) -> EngineResult<usize> {
        if legal_actions.is_empty() {
            log::warn!("heuristic opponent asked to select with no legal actions");
            return Err(EngineError::EvaluationError {
                legal_action_count: 0,
            });
        }
        if legal_actions.len() == 1 {
            return Ok(legal_actions[0]);
        }

        let origin_fen = env.to_fen();
        let mut values = Vec::with_capacity(legal_actions.len());
        for &action in legal_actions {
            let outcome = env.step(action);
            let value = self.evaluate(env, mover);
            values.push(value as f32);
            env.load_fen(&origin_fen);
            let _ = outcome;
        }

        if values.is_empty() {
            return Err(EngineError::EvaluationError {
                legal_action_count: legal_actions.len(),
            });
        }

        Ok(argmax_legal(legal_actions, &vector_aligned(legal_actions, &values)))
    }

    /// Evaluate the current position on `env` from `perspective`'s point of
    /// view: material + piece-square + pawn structure + king safety +
    /// mobility, folded together with `position_evaluation` as an
    /// additional external term so engines that already track their own
    /// signal (e.g. check/draw detection beyond `game_status`) contribute
    /// it too.
    fn evaluate<E: ChessEnvironment>(&self, env: &mut E, perspective: Color) -> f64 {
        let status = env.game_status();
        if status.is_terminal() {
            return match status {
                GameStatus::Checkmate => -1_000_000.0,
                _ => 0.0,
            };
        }

        let origin_fen = env.to_fen();
        let board = Board::from_fen(&origin_fen);
        let opponent = perspective.opposite();

        let mut score = 0.0;
        for (rank, file, piece) in board.pieces() {
            let material = material_value(piece.kind, &self.weights);
            let positional = piece_square_value(piece.kind, piece.color, rank, file) as f64;
            let value = material + positional;
            score += if piece.color == perspective { value } else { -value };
        }

        score += self.weights.king_safety * king_safety_score(&board, perspective);
        score -= self.weights.king_safety * king_safety_score(&board, opponent);

        score += pawn_structure_score(&board, perspective, &self.weights);
        score -= pawn_structure_score(&board, opponent, &self.weights);

        let state = env.current_state();
        let own_mobility = env.legal_actions(&state).len() as f64;
        let opponent_mobility = opponent_mobility(env, &origin_fen);
        score += self.weights.mobility * (own_mobility - opponent_mobility);

        score + env.position_evaluation(perspective)
    }
}

/// One of the three baseline tiers spec §4.10 evaluates an agent against.
/// `Random` and `Heuristic` are genuinely distinct strategies, not the
/// same evaluator run with different weights — a zero-weighted
/// `HeuristicOpponent` still breaks ties lexicographically on action
/// index via `argmax_legal`, which is deterministic, not random.
pub enum Opponent {
    /// Uniform choice among legal actions, drawn from the caller-supplied
    /// RNG stream (`StreamName::General`, spec §4.1).
    Random,
    Heuristic(HeuristicOpponent),
}

impl Opponent {
    pub fn select<E: ChessEnvironment>(
        &self,
        env: &mut E,
        mover: Color,
        legal_actions: &[usize],
        rng: &mut dyn RngCore,
    ) -> EngineResult<usize> {
        match self {
            Opponent::Random => {
                if legal_actions.is_empty() {
                    log::warn!("random opponent asked to select with no legal actions");
                    return Err(EngineError::EvaluationError {
                        legal_action_count: 0,
                    });
                }
                let ix = (rng.next_u32() as usize) % legal_actions.len();
                Ok(legal_actions[ix])
            }
            Opponent::Heuristic(opponent) => opponent.select(env, mover, legal_actions),
        }
    }
}

/// Legal-move count for the side NOT on move: flip the FEN's side-to-move
/// field, load it, query `legal_actions`, then restore the original
/// position — spec §4.8's "mobility (legal-move count differential)" needs
/// both sides' counts, but the collaborator contract (spec §6) only ever
/// reports the mover's own legal actions.
fn opponent_mobility<E: ChessEnvironment>(env: &mut E, origin_fen: &str) -> f64 {
    let Some(flipped) = flip_side_to_move(origin_fen) else {
        return 0.0;
    };
    if !env.load_fen(&flipped) {
        return 0.0;
    }
    let state = env.current_state();
    let count = env.legal_actions(&state).len() as f64;
    env.load_fen(origin_fen);
    count
}

/// Toggle the side-to-move field (the second space-delimited FEN part)
/// between `w` and `b`, leaving every other field untouched.
fn flip_side_to_move(fen: &str) -> Option<String> {
    let mut fields: Vec<&str> = fen.split_whitespace().collect();
    let side = fields.get_mut(1)?;
    *side = match *side {
        "w" => "b",
        "b" => "w",
        _ => return None,
    };
    Some(fields.join(" "))
}

fn pawn_structure_score(board: &Board, color: Color, weights: &Weights) -> f64 {
    let mut files: [u8; 8] = [0; 8];
    let mut pawn_ranks: [Vec<usize>; 8] = Default::default();
    for (rank, file, piece) in board.pieces() {
        if piece.color == color && piece.kind == Kind::Pawn {
            files[file] += 1;
            pawn_ranks[file].push(rank);
        }
    }

    let mut score = 0.0;
    for file in 0..8 {
        if files[file] == 0 {
            continue;
        }
        if files[file] > 1 {
            score -= weights.doubled_pawn_penalty * (files[file] as f64 - 1.0);
        }
        let left_has = file > 0 && files[file - 1] > 0;
        let right_has = file < 7 && files[file + 1] > 0;
        if !left_has && !right_has {
            score -= weights.isolated_pawn_penalty * files[file] as f64;
        }
        for &rank in &pawn_ranks[file] {
            if is_passed(board, color, file, rank) {
                score += weights.passed_pawn_bonus;
            }
        }
    }
    score
}

/// A pawn is passed if no enemy pawn occupies its file or an adjacent file
/// on any rank ahead of it (toward promotion).
fn is_passed(board: &Board, color: Color, file: usize, rank: usize) -> bool {
    let enemy = color.opposite();
    let files = [file.saturating_sub(1), file, (file + 1).min(7)];
    for &f in &files {
        for r in 0..8 {
            let ahead = match color {
                Color::White => r > rank,
                Color::Black => r < rank,
            };
            if !ahead {
                continue;
            }
            if let Some(p) = board.piece_at(r, f) {
                if p.color == enemy && p.kind == Kind::Pawn {
                    return false;
                }
            }
        }
    }
    true
}

/// King safety proxy: distance from the board center (a king tucked in a
/// corner is "safer" in the middlegame) plus the count of friendly pawns
/// directly shielding it, both folded into one scalar (spec §4.8: "king
/// safety proxy (distance from center + pawn shield)").
fn king_safety_score(board: &Board, color: Color) -> f64 {
    let Some((rank, file)) = board.king_square(color) else {
        return 0.0;
    };
    let center_distance = ((rank as f64 - 3.5).abs() + (file as f64 - 3.5).abs()) / 2.0;

    let shield_rank = match color {
        Color::White => rank + 1,
        Color::Black => rank.wrapping_sub(1),
    };
    let mut shield = 0.0;
    if shield_rank < 8 {
        for f in file.saturating_sub(1)..=(file + 1).min(7) {
            if let Some(p) = board.piece_at(shield_rank, f) {
                if p.color == color && p.kind == Kind::Pawn {
                    shield += 1.0;
                }
            }
        }
    }

    center_distance + shield
}

/// `argmax_legal` expects a dense `action_values` slice indexed by action;
/// here we only have per-candidate scores aligned with `legal_actions`,
/// so scatter them into a dense buffer sized to the widest index used.
fn vector_aligned(legal_actions: &[usize], values: &[f32]) -> Vec<f32> {
    let width = legal_actions.iter().copied().max().unwrap_or(0) + 1;
    let mut dense = vec![f32::NEG_INFINITY; width];
    for (&action, &value) in legal_actions.iter().zip(values) {
        dense[action] = value;
    }
    dense
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::StepOutcome;

    #[derive(Clone)]
    struct FixedEnv {
        legal: Vec<usize>,
        eval: f64,
        status: GameStatus,
        fen: String,
    }

    impl ChessEnvironment for FixedEnv {
        type State = ();

        fn reset(&mut self) -> Self::State {}
        fn current_state(&self) -> Self::State {}
        fn legal_actions(&self, _state: &Self::State) -> Vec<usize> {
            self.legal.clone()
        }
        fn step(&mut self, _action: usize) -> StepOutcome<Self::State> {
            StepOutcome {
                next_state: Some(()),
                reward: 0.0,
                done: false,
                termination_reason: None,
            }
        }
        fn game_status(&self) -> GameStatus {
            self.status
        }
        fn load_fen(&mut self, _fen: &str) -> bool {
            true
        }
        fn to_fen(&self) -> String {
            self.fen.clone()
        }
        fn position_evaluation(&self, _color: Color) -> f64 {
            self.eval
        }
        fn decode_move(&self, action: usize) -> crate::codec::Move {
            crate::codec::ActionCodec::decode_action(action)
        }
    }

    const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    #[test]
    fn single_legal_move_is_always_selected() {
        let opp = HeuristicOpponent::new(Weights::default());
        let mut env = FixedEnv {
            legal: vec![7],
            eval: 0.0,
            status: GameStatus::InProgress,
            fen: START_FEN.into(),
        };
        let action = opp.select(&mut env, Color::White, &[7]).unwrap();
        assert_eq!(action, 7);
    }

    #[test]
    fn empty_legal_actions_is_an_evaluation_error() {
        let opp = HeuristicOpponent::new(Weights::default());
        let mut env = FixedEnv {
            legal: vec![],
            eval: 0.0,
            status: GameStatus::InProgress,
            fen: START_FEN.into(),
        };
        assert!(opp.select(&mut env, Color::White, &[]).is_err());
    }

    #[test]
    fn evaluation_is_deterministic_for_identical_inputs() {
        let opp = HeuristicOpponent::new(Weights::default());
        let mut env = FixedEnv {
            legal: vec![1, 2, 3],
            eval: 0.5,
            status: GameStatus::InProgress,
            fen: START_FEN.into(),
        };
        let a = opp.select(&mut env, Color::White, &[1, 2, 3]).unwrap();
        let b = opp.select(&mut env, Color::White, &[1, 2, 3]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn starting_position_is_materially_symmetric() {
        let opp = HeuristicOpponent::new(Weights::default());
        let mut env = FixedEnv {
            legal: vec![0],
            eval: 0.0,
            status: GameStatus::InProgress,
            fen: START_FEN.into(),
        };
        let white = opp.evaluate(&mut env, Color::White);
        let black = opp.evaluate(&mut env, Color::Black);
        assert!((white - black).abs() < 1e-6);
    }

    #[test]
    fn material_advantage_favors_the_side_with_more_material() {
        let opp = HeuristicOpponent::new(Weights::default());
        // White is missing both rooks relative to the start position.
        let mut env = FixedEnv {
            legal: vec![0],
            eval: 0.0,
            status: GameStatus::InProgress,
            fen: "1nbqkbn1/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1".into(),
        };
        let white = opp.evaluate(&mut env, Color::White);
        let black = opp.evaluate(&mut env, Color::Black);
        assert!(black > white);
    }

    #[test]
    fn doubled_pawns_are_penalized() {
        let board = Board::from_fen("8/8/8/8/8/P7/P7/8 w - - 0 1");
        let score = pawn_structure_score(&board, Color::White, &Weights::default());
        assert!(score < 0.0);
    }

    #[test]
    fn isolated_pawn_is_penalized() {
        let board = Board::from_fen("8/8/8/8/8/8/2P5/8 w - - 0 1");
        let score = pawn_structure_score(&board, Color::White, &Weights::default());
        assert!(score < 0.0);
    }

    #[test]
    fn passed_pawn_with_no_blockers_is_rewarded() {
        let board = Board::from_fen("8/8/8/8/8/8/P7/8 w - - 0 1");
        let score = pawn_structure_score(&board, Color::White, &Weights::default());
        assert!(score > 0.0);
    }

    #[test]
    fn king_in_the_corner_is_safer_than_in_the_center() {
        let corner = Board::from_fen("8/8/8/8/8/8/8/K7 w - - 0 1");
        let center = Board::from_fen("8/8/8/4K3/8/8/8/8 w - - 0 1");
        assert!(king_safety_score(&corner, Color::White) < king_safety_score(&center, Color::White));
    }

    #[test]
    fn random_opponent_stays_within_legal_actions() {
        use rand::SeedableRng;
        use rand_chacha::ChaCha8Rng;
        let mut env = FixedEnv {
            legal: vec![3, 7, 9],
            eval: 0.0,
            status: GameStatus::InProgress,
            fen: START_FEN.into(),
        };
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..50 {
            let action = Opponent::Random
                .select(&mut env, Color::White, &[3, 7, 9], &mut rng)
                .unwrap();
            assert!([3, 7, 9].contains(&action));
        }
    }

    #[test]
    fn random_opponent_does_not_always_pick_the_lowest_index() {
        use rand::SeedableRng;
        use rand_chacha::ChaCha8Rng;
        let mut env = FixedEnv {
            legal: vec![0, 1, 2, 3, 4],
            eval: 0.0,
            status: GameStatus::InProgress,
            fen: START_FEN.into(),
        };
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut distinct = std::collections::HashSet::new();
        for _ in 0..50 {
            let action = Opponent::Random
                .select(&mut env, Color::White, &[0, 1, 2, 3, 4], &mut rng)
                .unwrap();
            distinct.insert(action);
        }
        assert!(distinct.len() > 1, "expected genuine randomness, got {distinct:?}");
    }
}
