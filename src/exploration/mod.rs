//! Exploration policies (spec §4.4): choose an action over a set of legal
//! actions and their estimated values.

mod boltzmann;
mod epsilon_greedy;

pub use boltzmann::Boltzmann;
pub use epsilon_greedy::EpsilonGreedy;

use rand::RngCore;

/// Sentinel action returned when `legal_actions` is empty (terminal or
/// aborted states). Never a valid index into the action space.
pub const NO_MOVE: usize = usize::MAX;

/// Either ε-greedy or Boltzmann action selection over a legal action set.
pub trait ExplorationPolicy {
    /// Choose an action index from `legal_actions`, given the full
    /// action-value vector `action_values` (indexed by action id) and a
    /// source of randomness drawn from the exploration stream.
    ///
    /// Returns [`NO_MOVE`] if `legal_actions` is empty.
    fn select(
        &self,
        legal_actions: &[usize],
        action_values: &[f32],
        rng: &mut dyn RngCore,
    ) -> usize;

    /// Update the policy's exploration rate (ε or temperature).
    fn set_rate(&mut self, rate: f32);

    /// The policy's current exploration rate.
    fn rate(&self) -> f32;
}

/// Restrict `action_values` to `legal_actions` and return the index (into
/// the full action space) of the maximum value, breaking ties on the
/// lowest action index. Panics if `legal_actions` is empty; callers must
/// check for [`NO_MOVE`] first.
pub(crate) fn argmax_legal(legal_actions: &[usize], action_values: &[f32]) -> usize {
    legal_actions
        .iter()
        .copied()
        .max_by(|&a, &b| {
            action_values[a]
                .partial_cmp(&action_values[b])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.cmp(&a)) // lower index wins ties
        })
        .expect("legal_actions must be non-empty")
}
