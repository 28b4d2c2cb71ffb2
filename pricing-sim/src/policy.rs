//! Epsilon-greedy action selection with exponentially decaying exploration.

use rand::Rng;

use crate::qtable::QTable;

/// Exploration schedule `epsilon(t) = exp(-beta * t)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpsilonGreedy {
    beta: f64,
}

/// How an action was picked, for instrumentation and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Explore(usize),
    Exploit(usize),
}

impl Choice {
    pub fn action(self) -> usize {
        match self {
            Choice::Explore(a) | Choice::Exploit(a) => a,
        }
    }
}

impl EpsilonGreedy {
    pub fn new(beta: f64) -> Self {
        Self { beta }
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Exploration probability after `time` periods. `epsilon(0) == 1`.
    pub fn epsilon(&self, time: u64) -> f64 {
        (-self.beta * time as f64).exp()
    }

    /// Pick an action for `state` at period `time`.
    ///
    /// With probability `epsilon(time)` any grid index uniformly; otherwise a
    /// uniformly random index among all maximizers of the state's row.
    pub fn choose<R: Rng>(&self, rng: &mut R, q: &QTable, state: [usize; 2], time: u64) -> Choice {
        let roll: f64 = rng.random();
        if roll < self.epsilon(time) {
            Choice::Explore(rng.random_range(0..q.actions()))
        } else {
            Choice::Exploit(greedy_with_ties(rng, q.row(state)))
        }
    }
}

/// Argmax of `row`, breaking ties uniformly at random.
///
/// A fixed tie-break would favor low price indices while the tables are still
/// flat from the prior.
pub fn greedy_with_ties<R: Rng>(rng: &mut R, row: &[f64]) -> usize {
    let best = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let ties = row.iter().filter(|&&v| v == best).count();
    let pick = if ties > 1 { rng.random_range(0..ties) } else { 0 };
    row.iter()
        .enumerate()
        .filter(|&(_, &v)| v == best)
        .nth(pick)
        .map(|(a, _)| a)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn epsilon_schedule() {
        let policy = EpsilonGreedy::new(2e-5);
        assert_eq!(policy.epsilon(0), 1.0);
        assert!((policy.epsilon(50_000) - (-1.0f64).exp()).abs() < 1e-12);
        assert!(policy.epsilon(10_000_000) < 1e-80);
        let mut last = 1.0;
        for t in (0..2_000_000).step_by(100_000) {
            let eps = policy.epsilon(t);
            assert!(eps <= last);
            last = eps;
        }
        // No decay means permanent exploration.
        assert_eq!(EpsilonGreedy::new(0.0).epsilon(1_000_000), 1.0);
    }

    #[test]
    fn exploits_when_epsilon_vanishes() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut q = QTable::filled(5, 0.0);
        q.set([2, 3], 4, 1.0);
        let policy = EpsilonGreedy::new(1.0);
        for _ in 0..1_000 {
            let choice = policy.choose(&mut rng, &q, [2, 3], 1_000);
            assert_eq!(choice, Choice::Exploit(4));
        }
    }

    #[test]
    fn explores_uniformly_at_start() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut q = QTable::filled(4, 0.0);
        q.set([0, 0], 1, 10.0);
        let policy = EpsilonGreedy::new(1e-5);
        let trials = 20_000;
        let mut counts = [0usize; 4];
        for _ in 0..trials {
            match policy.choose(&mut rng, &q, [0, 0], 0) {
                Choice::Explore(a) => counts[a] += 1,
                Choice::Exploit(_) => panic!("epsilon(0) = 1 must always explore"),
            }
        }
        for (a, &c) in counts.iter().enumerate() {
            let freq = c as f64 / trials as f64;
            assert!((freq - 0.25).abs() < 0.02, "action {a} frequency {freq}");
        }
    }

    #[test]
    fn ties_broken_uniformly() {
        let mut rng = StdRng::seed_from_u64(42);
        let row = [1.0, 3.0, 0.5, 3.0, 3.0, 2.0];
        let trials = 30_000;
        let mut counts = [0usize; 6];
        for _ in 0..trials {
            counts[greedy_with_ties(&mut rng, &row)] += 1;
        }
        assert_eq!(counts[0] + counts[2] + counts[5], 0, "non-maximal action picked");
        for a in [1, 3, 4] {
            let freq = counts[a] as f64 / trials as f64;
            assert!((freq - 1.0 / 3.0).abs() < 0.02, "action {a} frequency {freq}");
        }
    }

    #[test]
    fn unique_max_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..100 {
            assert_eq!(greedy_with_ties(&mut rng, &[0.1, 0.7, 0.3]), 1);
        }
    }
}
