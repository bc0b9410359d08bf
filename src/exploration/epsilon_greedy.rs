use rand::Rng;

use super::{argmax_legal, ExplorationPolicy, NO_MOVE};

/// ε-greedy exploration: with probability ε draw uniformly from the legal
/// actions, otherwise exploit the argmax (lexicographic tie-break on
/// action index). The caller drives ε's decay schedule externally (see
/// `crate::decay`) and pushes it in via [`set_rate`](ExplorationPolicy::set_rate)
/// once per cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpsilonGreedy {
    epsilon: f32,
}

impl EpsilonGreedy {
    pub fn new(epsilon: f32) -> Self {
        Self { epsilon }
    }
}

impl ExplorationPolicy for EpsilonGreedy {
    fn select(
        &self,
        legal_actions: &[usize],
        action_values: &[f32],
        rng: &mut dyn rand::RngCore,
    ) -> usize {
        if legal_actions.is_empty() {
            return NO_MOVE;
        }
        if rng.gen::<f32>() < self.epsilon {
            legal_actions[rng.gen_range(0..legal_actions.len())]
        } else {
            argmax_legal(legal_actions, action_values)
        }
    }

    fn set_rate(&mut self, rate: f32) {
        self.epsilon = rate;
    }

    fn rate(&self) -> f32 {
        self.epsilon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn empty_legal_actions_returns_sentinel() {
        let policy = EpsilonGreedy::new(0.1);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(policy.select(&[], &[1.0, 2.0], &mut rng), NO_MOVE);
    }

    #[test]
    fn zero_epsilon_always_exploits() {
        let policy = EpsilonGreedy::new(0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let values = vec![0.1, 0.9, 0.4, 0.2];
        let legal = vec![0, 1, 2, 3];
        for _ in 0..20 {
            assert_eq!(policy.select(&legal, &values, &mut rng), 1);
        }
    }

    #[test]
    fn one_epsilon_always_explores_within_legal_set() {
        let policy = EpsilonGreedy::new(1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let values = vec![0.1, 0.9, 0.4, 0.2];
        let legal = vec![2, 3];
        for _ in 0..50 {
            let a = policy.select(&legal, &values, &mut rng);
            assert!(legal.contains(&a));
        }
    }

    #[test]
    fn set_rate_updates_epsilon() {
        let mut policy = EpsilonGreedy::new(0.5);
        policy.set_rate(0.05);
        assert_eq!(policy.rate(), 0.05);
    }

    #[test]
    fn tie_break_is_lowest_index() {
        let policy = EpsilonGreedy::new(0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let values = vec![1.0, 1.0, 1.0];
        let legal = vec![2, 0, 1];
        assert_eq!(policy.select(&legal, &values, &mut rng), 0);
    }
}
