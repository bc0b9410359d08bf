use rand::distributions::{Distribution, WeightedIndex};

use super::{ExplorationPolicy, NO_MOVE};

/// Boltzmann (softmax) exploration: sample from
/// `softmax(action_values[legal_actions] / temperature)`. As temperature
/// approaches zero, sampling approximates greedy selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Boltzmann {
    temperature: f32,
}

impl Boltzmann {
    pub fn new(temperature: f32) -> Self {
        assert!(temperature > 0.0, "temperature must be > 0");
        Self { temperature }
    }
}

impl ExplorationPolicy for Boltzmann {
    fn select(
        &self,
        legal_actions: &[usize],
        action_values: &[f32],
        rng: &mut dyn rand::RngCore,
    ) -> usize {
        if legal_actions.is_empty() {
            return NO_MOVE;
        }

        let scaled: Vec<f32> = legal_actions
            .iter()
            .map(|&a| action_values[a] / self.temperature)
            .collect();
        let max = scaled.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let weights: Vec<f32> = scaled.iter().map(|&x| (x - max).exp()).collect();

        let dist =
            WeightedIndex::new(&weights).expect("at least one legal action with finite weight");
        legal_actions[dist.sample(rng)]
    }

    fn set_rate(&mut self, rate: f32) {
        assert!(rate > 0.0, "temperature must be > 0");
        self.temperature = rate;
    }

    fn rate(&self) -> f32 {
        self.temperature
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn empty_legal_actions_returns_sentinel() {
        let policy = Boltzmann::new(1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(policy.select(&[], &[1.0], &mut rng), NO_MOVE);
    }

    #[test]
    fn low_temperature_approximates_greedy() {
        let policy = Boltzmann::new(1e-3);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let values = vec![0.1, 5.0, 0.2];
        let legal = vec![0, 1, 2];
        for _ in 0..50 {
            assert_eq!(policy.select(&legal, &values, &mut rng), 1);
        }
    }

    #[test]
    fn single_legal_action_is_always_selected() {
        let policy = Boltzmann::new(1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        assert_eq!(policy.select(&[3], &[0.0, 0.0, 0.0, 9.0], &mut rng), 3);
    }

    #[test]
    fn set_rate_updates_temperature() {
        let mut policy = Boltzmann::new(1.0);
        policy.set_rate(0.25);
        assert_eq!(policy.rate(), 0.25);
    }
}
