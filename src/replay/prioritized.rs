use rand::distributions::{Distribution, Uniform};
use rand::RngCore;

use crate::decay::{Decay, Linear};
use crate::ds::{RingBuffer, SumTree};
use crate::error::{EngineError, EngineResult};

use super::{Experience, ReplayBuffer, SampledBatch};

/// Priority floor for newly inserted records, so they are guaranteed to
/// be sampled at least once before their true TD-error-derived priority
/// is known (spec §3).
const EPS_INIT: f32 = 1e-2;

/// Added to `|td_error|` before raising to `alpha`, so a record with zero
/// TD error is never permanently unsampleable (spec §4.3).
const PRIORITY_EPS: f32 = 1e-6;

/// Prioritized experience replay (Schaul et al., 2015): samples records
/// proportional to `priority^alpha`, with importance-sampling weights
/// that correct for the resulting bias, annealed from `beta_0` to `1.0`.
pub struct PrioritizedReplayBuffer<S> {
    memory: RingBuffer<Experience<S>>,
    priorities: SumTree,
    alpha: f32,
    beta: Linear,
}

impl<S: Clone> PrioritizedReplayBuffer<S> {
    /// `num_cycles` sets up the beta annealing schedule: beta reaches
    /// `1.0` at cycle `num_cycles`, matching `decay::Linear`'s
    /// `vi, vf, rate` parameterization used elsewhere in this crate.
    pub fn new(capacity: usize, alpha: f32, beta_0: f32, num_cycles: usize) -> Self {
        let num_cycles = num_cycles.max(1) as f32;
        Self {
            memory: RingBuffer::new(capacity),
            priorities: SumTree::new(capacity),
            alpha,
            beta: Linear::new((beta_0 - 1.0) / num_cycles, beta_0, 1.0)
                .expect("beta_0 must be < 1.0"),
        }
    }
}

impl<S: Clone> ReplayBuffer<S> for PrioritizedReplayBuffer<S> {
    fn add(&mut self, exp: Experience<S>) {
        let ix = self.memory.push(exp);
        let max_priority = self.priorities.max().max(EPS_INIT);
        self.priorities.update(ix, max_priority);
    }

    fn sample(
        &self,
        k: usize,
        cycle: usize,
        rng: &mut dyn RngCore,
    ) -> EngineResult<SampledBatch<S>> {
        let n = self.memory.len();
        if k > n {
            log::debug!("prioritized replay: requested {k} samples but only {n} available");
            return Err(EngineError::InsufficientSamples {
                requested: k,
                available: n,
            });
        }
        if k == 0 {
            return Ok(SampledBatch {
                experiences: Vec::new(),
                weights: Vec::new(),
                indices: Vec::new(),
            });
        }

        let total = self.priorities.sum();
        let dist = Uniform::new(0.0, total);

        // Draw proportional to priority, rejecting duplicates so `sample`
        // returns k distinct records like the uniform variant (spec §8:
        // "sample(k) returns k distinct records"). A handful of retries is
        // enough in practice since `k <= n` is guaranteed by the check
        // above; if priority mass is extremely concentrated, fall through
        // to the first not-yet-seen leaf found by a linear scan from the
        // rejected draw.
        let mut seen = std::collections::HashSet::with_capacity(k);
        let mut experiences = Vec::with_capacity(k);
        let mut probs = Vec::with_capacity(k);
        let mut indices = Vec::with_capacity(k);
        for _ in 0..k {
            let mut chosen = None;
            for _ in 0..32 {
                let draw = dist.sample(rng);
                let (ix, val) = self.priorities.find(draw);
                let ix = ix.min(n - 1);
                if seen.insert(ix) {
                    chosen = Some((ix, val / total));
                    break;
                }
            }
            let (ix, prob) = chosen.unwrap_or_else(|| {
                let ix = (0..n)
                    .find(|i| !seen.contains(i))
                    .expect("k <= n guarantees an unseen index remains");
                seen.insert(ix);
                (ix, self.priorities.leaf_priority(ix) / total)
            });
            experiences.push(self.memory[ix].clone());
            probs.push(prob);
            indices.push(ix);
        }

        let beta = self.beta.evaluate(cycle as f32);
        let weights = compute_weights(n, beta, &probs);

        Ok(SampledBatch {
            experiences,
            weights,
            indices,
        })
    }

    fn size(&self) -> usize {
        self.memory.len()
    }

    fn clear(&mut self) {
        self.memory.clear();
        self.priorities = SumTree::new(self.memory.capacity());
    }

    fn update_priorities(&mut self, indices: &[usize], td_errors: &[f32]) {
        assert_eq!(
            indices.len(),
            td_errors.len(),
            "indices and td_errors must have the same length"
        );
        for (&ix, &td) in indices.iter().zip(td_errors) {
            let priority = (td.abs() + PRIORITY_EPS).powf(self.alpha);
            self.priorities.update(ix, priority);
        }
    }
}

fn compute_weights(n: usize, beta: f32, probs: &[f32]) -> Vec<f32> {
    let n = n as f32;
    let raw: Vec<f32> = probs.iter().map(|&p| (n * p).powf(-beta)).collect();
    let max = raw.iter().cloned().fold(f32::MIN, f32::max);
    raw.into_iter().map(|w| w / max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn exp(n: f64) -> Experience<f64> {
        Experience {
            state: n,
            legal_actions: vec![0, 1],
            action: 0,
            reward: n,
            next_state: Some(n + 1.0),
            done: false,
            next_legal_actions: vec![0, 1],
        }
    }

    #[test]
    fn new_records_get_priority_floor() {
        let mut buf: PrioritizedReplayBuffer<f64> = PrioritizedReplayBuffer::new(8, 1.0, 0.4, 10);
        for i in 0..8 {
            buf.add(exp(i as f64));
        }
        assert_eq!(buf.priorities.max(), EPS_INIT);
    }

    #[test]
    fn update_priorities_sets_abs_td_error_plus_eps() {
        let mut buf: PrioritizedReplayBuffer<f64> = PrioritizedReplayBuffer::new(4, 1.0, 0.4, 10);
        for i in 0..4 {
            buf.add(exp(i as f64));
        }
        buf.update_priorities(&[0, 1], &[2.0, -3.0]);
        assert!((buf.priorities.max() - (3.0 + PRIORITY_EPS)).abs() < 1e-4);
    }

    #[test]
    fn high_priority_record_sampled_far_more_than_uniform_share() {
        let mut buf: PrioritizedReplayBuffer<f64> = PrioritizedReplayBuffer::new(1000, 1.0, 0.4, 10);
        for i in 0..1000 {
            buf.add(exp(i as f64));
        }
        // Give index 0 a huge TD error, everything else tiny.
        let rest: Vec<usize> = (1..1000).collect();
        let td_rest = vec![0.01f32; 999];
        buf.update_priorities(&rest, &td_rest);
        buf.update_priorities(&[0], &[10.0]);

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut count_high = 0usize;
        let mut total = 0usize;
        for _ in 0..100 {
            let batch = buf.sample(32, 0, &mut rng).unwrap();
            total += batch.indices.len();
            count_high += batch.indices.iter().filter(|&&ix| ix == 0).count();
        }
        let empirical_freq = count_high as f64 / total as f64;
        let uniform_share = 1.0 / 1000.0;
        assert!(
            empirical_freq >= uniform_share * 10.0,
            "empirical_freq={empirical_freq} uniform_share={uniform_share}"
        );
    }

    #[test]
    fn sample_more_than_size_is_insufficient() {
        let mut buf: PrioritizedReplayBuffer<f64> = PrioritizedReplayBuffer::new(4, 1.0, 0.4, 10);
        buf.add(exp(1.0));
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(buf.sample(2, 0, &mut rng).is_err());
    }

    #[test]
    fn clear_resets_size_and_priorities() {
        let mut buf: PrioritizedReplayBuffer<f64> = PrioritizedReplayBuffer::new(4, 1.0, 0.4, 10);
        buf.add(exp(1.0));
        buf.clear();
        assert_eq!(buf.size(), 0);
        assert_eq!(buf.priorities.sum(), 0.0);
    }
}
