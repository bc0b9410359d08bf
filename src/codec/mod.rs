//! State/action codec (spec §4.2): board → fixed-width feature vector,
//! and a bijection between move descriptors and action indices.
//!
//! Both directions are pure and stateless. The feature width is pinned at
//! build time via [`STATE_FEATURES`] rather than being configurable at
//! runtime, so two codecs can never be mixed without a compile error or an
//! explicit [`crate::error::EngineError::InvalidConfiguration`] at
//! construction time (see [`FeatureWidth::require`]).

use crate::error::{EngineError, EngineResult};

/// The encoder's fixed feature width. Pinned per the Open Question in
/// spec §9 (776 vs 839): see `DESIGN.md`.
pub const STATE_FEATURES: usize = 776;

/// From-to square pairs, promotion folded into the default encoding.
pub const ACTION_SPACE: usize = 4096;

/// A board-to-vector encoder. Generic over the caller's board/state
/// representation so this crate never needs to depend on a concrete chess
/// engine (the engine is an external collaborator, spec §6).
pub trait StateEncoder<S> {
    /// Encode `state` into a fixed-width feature vector. Total: every
    /// reachable state has a representation.
    fn encode(&self, state: &S) -> [f32; STATE_FEATURES];
}

/// A square index in `[0, 64)`.
pub type Square = u8;

/// The piece a pawn promotes to. Folded into the default action encoding:
/// an under-promotion (`Rook`/`Bishop`/`Knight`) shares its action index
/// with the corresponding queen promotion, since `ACTION_SPACE` has no
/// spare room to distinguish them. Callers that need under-promotions
/// disambiguate using the legal-move list itself, not the decoded index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Promotion {
    Queen,
    Rook,
    Bishop,
    Knight,
}

/// A move descriptor: a from-square, a to-square, and an optional
/// promotion piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Promotion>,
}

impl Move {
    pub fn new(from: Square, to: Square, promotion: Option<Promotion>) -> Self {
        Self {
            from,
            to,
            promotion,
        }
    }
}

/// Bijection (up to under-promotion folding, see [`Promotion`]) between
/// move descriptors and `[0, ACTION_SPACE)`.
pub struct ActionCodec;

impl ActionCodec {
    /// Encode a move descriptor into an action index.
    ///
    /// Precondition: `mv` is a legal move at the board this index will be
    /// used against. This function does not and cannot check legality —
    /// it is a pure index computation — so callers must only invoke it
    /// with moves taken from a collaborator's legal-action list.
    pub fn encode_action(mv: Move) -> usize {
        debug_assert!((mv.from as usize) < 64 && (mv.to as usize) < 64);
        mv.from as usize * 64 + mv.to as usize
    }

    /// Decode an action index into a move descriptor.
    ///
    /// Total over `[0, ACTION_SPACE)`, but the result may not be legal (or
    /// even reachable) at any given board — the promotion field is always
    /// `None` since promotion is folded out of the index, and callers must
    /// intersect the result with the board's legal-action set to recover
    /// the intended move. Passing an index `>= ACTION_SPACE` is undefined
    /// behavior for the core per spec §3; this implementation panics.
    pub fn decode_action(index: usize) -> Move {
        assert!(
            index < ACTION_SPACE,
            "action index {index} out of range [0, {ACTION_SPACE})"
        );
        Move {
            from: (index / 64) as Square,
            to: (index % 64) as Square,
            promotion: None,
        }
    }
}

/// A marker carried alongside a trained artifact (e.g. a checkpoint) so a
/// mismatched codec build is refused rather than silently reinterpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureWidth(pub usize);

impl FeatureWidth {
    pub fn current() -> Self {
        Self(STATE_FEATURES)
    }

    /// Validate that `self` matches the width this build was compiled
    /// with, refusing to initialize otherwise.
    pub fn require(self) -> EngineResult<()> {
        if self.0 == STATE_FEATURES {
            Ok(())
        } else {
            Err(EngineError::InvalidConfiguration(format!(
                "codec built for feature width {} but this build uses {}",
                self.0, STATE_FEATURES
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip_for_plain_moves() {
        for from in 0..64u8 {
            for to in [0u8, 7, 33, 63] {
                let mv = Move::new(from, to, None);
                let ix = ActionCodec::encode_action(mv);
                assert!(ix < ACTION_SPACE);
                let back = ActionCodec::decode_action(ix);
                assert_eq!(back.from, mv.from);
                assert_eq!(back.to, mv.to);
            }
        }
    }

    #[test]
    fn action_space_is_exactly_64_squared() {
        assert_eq!(ACTION_SPACE, 64 * 64);
    }

    #[test]
    #[should_panic]
    fn decode_out_of_range_panics() {
        ActionCodec::decode_action(ACTION_SPACE);
    }

    #[test]
    fn feature_width_mismatch_is_rejected() {
        assert!(FeatureWidth(STATE_FEATURES).require().is_ok());
        assert!(FeatureWidth(839).require().is_err());
    }

    #[test]
    fn under_promotions_share_the_queen_promotion_index() {
        let queen = Move::new(12, 4, Some(Promotion::Queen));
        let knight = Move::new(12, 4, Some(Promotion::Knight));
        assert_eq!(
            ActionCodec::encode_action(queen),
            ActionCodec::encode_action(knight)
        );
    }
}
