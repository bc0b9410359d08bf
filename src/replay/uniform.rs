use rand::RngCore;

use crate::ds::RingBuffer;
use crate::error::{EngineError, EngineResult};

use super::{Experience, ReplayBuffer, SampledBatch};

/// A bounded FIFO ring of experiences sampled uniformly at random.
pub struct UniformReplayBuffer<S> {
    memory: RingBuffer<Experience<S>>,
}

impl<S: Clone> UniformReplayBuffer<S> {
    pub fn new(capacity: usize) -> Self {
        Self {
            memory: RingBuffer::new(capacity),
        }
    }
}

impl<S: Clone> ReplayBuffer<S> for UniformReplayBuffer<S> {
    fn add(&mut self, exp: Experience<S>) {
        self.memory.push(exp);
    }

    fn sample(&self, k: usize, _cycle: usize, rng: &mut dyn RngCore) -> EngineResult<SampledBatch<S>> {
        let n = self.memory.len();
        if k > n {
            log::debug!("uniform replay: requested {k} samples but only {n} available");
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

        let indices = rand::seq::index::sample(rng, n, k).into_vec();
        let experiences = indices.iter().map(|&i| self.memory[i].clone()).collect();
        Ok(SampledBatch {
            experiences,
            weights: vec![1.0; k],
            indices,
        })
    }

    fn size(&self) -> usize {
        self.memory.len()
    }

    fn clear(&mut self) {
        self.memory.clear();
    }
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
    fn size_grows_up_to_capacity_and_then_stays() {
        let mut buf = UniformReplayBuffer::new(4);
        for i in 0..10 {
            buf.add(exp(i as f64));
        }
        assert_eq!(buf.size(), 4);
    }

    #[test]
    fn sample_returns_k_distinct_records() {
        let mut buf = UniformReplayBuffer::new(16);
        for i in 0..16 {
            buf.add(exp(i as f64));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let batch = buf.sample(8, 0, &mut rng).unwrap();
        assert_eq!(batch.experiences.len(), 8);
        let mut seen = std::collections::HashSet::new();
        for ix in &batch.indices {
            assert!(seen.insert(*ix), "indices must be distinct");
        }
    }

    #[test]
    fn sample_more_than_size_is_insufficient() {
        let mut buf = UniformReplayBuffer::new(4);
        buf.add(exp(1.0));
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        assert!(matches!(
            buf.sample(2, 0, &mut rng),
            Err(EngineError::InsufficientSamples {
                requested: 2,
                available: 1
            })
        ));
    }

    #[test]
    fn sample_zero_is_empty() {
        let buf: UniformReplayBuffer<f64> = UniformReplayBuffer::new(4);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let batch = buf.sample(0, 0, &mut rng).unwrap();
        assert!(batch.experiences.is_empty());
    }

    #[test]
    fn clear_resets_size() {
        let mut buf = UniformReplayBuffer::new(4);
        buf.add(exp(1.0));
        buf.clear();
        assert_eq!(buf.size(), 0);
    }

    #[test]
    fn newly_added_record_is_sampleable_immediately() {
        let mut buf = UniformReplayBuffer::new(1);
        buf.add(exp(42.0));
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let batch = buf.sample(1, 0, &mut rng).unwrap();
        assert_eq!(batch.experiences[0].state, 42.0);
    }
}
