//! Learning algorithms behind one shared contract. DQN is implemented;
//! policy-gradient variants are a separate type behind the same trait,
//! never a branch inside a single agent (spec §9 open question).

pub mod dqn;

pub use dqn::Dqn;

use rand::RngCore;

use crate::error::EngineResult;
use crate::metrics::PolicyUpdateResult;
use crate::replay::Experience;

/// A learning algorithm that consumes freshly generated experiences and
/// updates its online network.
///
/// `rng` backs the replay buffer's sampling draw; callers pass the seed
/// fabric's `replay_buffer` stream so that, at `worker_count == 1`,
/// sampling is reproducible from the master seed alone (spec §4.1/§5).
pub trait Algorithm<S: Clone> {
    fn update(
        &mut self,
        new_experiences: Vec<Experience<S>>,
        rng: &mut dyn RngCore,
    ) -> EngineResult<PolicyUpdateResult>;

    /// The number of gradient steps taken so far, used by the orchestrator
    /// and checkpoint manager for bookkeeping.
    fn step_counter(&self) -> u64;
}
