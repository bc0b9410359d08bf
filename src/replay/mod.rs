//! Experience replay (spec §4.3): uniform and prioritized variants behind
//! one [`ReplayBuffer`] contract, both backed by [`crate::ds::RingBuffer`].

mod prioritized;
mod uniform;

pub use prioritized::PrioritizedReplayBuffer;
pub use uniform::UniformReplayBuffer;

use rand::RngCore;

use crate::error::EngineResult;

/// A single transition, as defined in spec §3. `S` is the caller's state
/// representation (already encoded, or the raw board — whichever the
/// caller's `NetworkWrapper` expects as input).
#[derive(Debug)]
pub struct Experience<S> {
    pub state: S,
    /// The legal action indices available at `state`. Not part of the
    /// base transition tuple, but needed to restrict the DQN algorithm's
    /// `policy_entropy` diagnostic (spec §4.6 step 9) to legal actions
    /// rather than the full action space.
    pub legal_actions: Vec<usize>,
    pub action: usize,
    pub reward: f64,
    /// `None` iff this transition ended the episode.
    pub next_state: Option<S>,
    pub done: bool,
    /// The legal action indices at `next_state`. Bootstrapped targets are
    /// computed only over this set (spec §4.6 legal-action masking);
    /// empty when `done`.
    pub next_legal_actions: Vec<usize>,
}

impl<S: Clone> Clone for Experience<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            legal_actions: self.legal_actions.clone(),
            action: self.action,
            reward: self.reward,
            next_state: self.next_state.clone(),
            done: self.done,
            next_legal_actions: self.next_legal_actions.clone(),
        }
    }
}

/// The result of a `sample` call: the drawn experiences, their importance
/// sampling weights (all `1.0` for the uniform variant), and the buffer
/// indices they came from (needed to call
/// [`ReplayBuffer::update_priorities`] back on the prioritized variant).
#[derive(Debug)]
pub struct SampledBatch<S> {
    pub experiences: Vec<Experience<S>>,
    pub weights: Vec<f32>,
    pub indices: Vec<usize>,
}

/// The shared contract for both replay buffer variants.
pub trait ReplayBuffer<S: Clone> {
    /// Insert a new record. Amortized O(1); `size()` grows up to `Cap`,
    /// then further inserts evict FIFO (uniform) or overwrite the ring's
    /// oldest slot while preserving priority accounting (prioritized).
    fn add(&mut self, exp: Experience<S>);

    /// Draw `k` records without replacement. `cycle` is the current
    /// training cycle, used by the prioritized variant to anneal its
    /// importance-sampling exponent β; ignored by the uniform variant.
    /// Fails with [`crate::error::EngineError::InsufficientSamples`] if
    /// `k > size()`; returns an empty batch if `k == 0`.
    fn sample(&self, k: usize, cycle: usize, rng: &mut dyn RngCore) -> EngineResult<SampledBatch<S>>;

    fn size(&self) -> usize;

    fn clear(&mut self);

    /// Update priorities after computing TD errors for a previously
    /// sampled batch. A no-op on the uniform variant.
    fn update_priorities(&mut self, _indices: &[usize], _td_errors: &[f32]) {}
}
