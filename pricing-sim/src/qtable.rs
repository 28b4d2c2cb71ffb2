//! Per-firm action-value tables over (joint state, own action).

use crate::grid::PriceGrid;
use crate::market::Market;

/// Dense Q-table for one firm.
///
/// Indexed by the joint state `[firm 0 index, firm 1 index]` of the previous
/// period and this firm's own action index. Stored flat, row-major, so each
/// state's action values are one contiguous slice.
#[derive(Debug, Clone, PartialEq)]
pub struct QTable {
    actions: usize,
    values: Vec<f64>,
}

impl QTable {
    /// Table over `actions` grid points with every entry set to `fill`.
    pub fn filled(actions: usize, fill: f64) -> Self {
        Self {
            actions,
            values: vec![fill; actions * actions * actions],
        }
    }

    /// Prior for `firm`: the discounted value of playing each price forever
    /// against a rival pricing uniformly at random,
    /// `sum_b profit(grid[a], grid[b]) / ((1 - delta) * M)`,
    /// broadcast to every joint state.
    pub fn with_prior(market: &Market, grid: &PriceGrid, firm: usize, delta: f64) -> Self {
        let m = grid.len();
        let scale = 1.0 / ((1.0 - delta) * m as f64);
        let prior: Vec<f64> = (0..m)
            .map(|own| {
                let total: f64 = (0..m)
                    .map(|rival| {
                        let mut prices = [grid.price_at(rival); 2];
                        prices[firm] = grid.price_at(own);
                        market.profits(prices)[firm]
                    })
                    .sum();
                total * scale
            })
            .collect();

        let mut values = Vec::with_capacity(m * m * m);
        for _ in 0..m * m {
            values.extend_from_slice(&prior);
        }
        Self { actions: m, values }
    }

    pub fn actions(&self) -> usize {
        self.actions
    }

    fn offset(&self, state: [usize; 2]) -> usize {
        debug_assert!(state[0] < self.actions && state[1] < self.actions);
        (state[0] * self.actions + state[1]) * self.actions
    }

    /// Action values of one joint state.
    pub fn row(&self, state: [usize; 2]) -> &[f64] {
        let start = self.offset(state);
        &self.values[start..start + self.actions]
    }

    fn row_mut(&mut self, state: [usize; 2]) -> &mut [f64] {
        let start = self.offset(state);
        &mut self.values[start..start + self.actions]
    }

    pub fn get(&self, state: [usize; 2], action: usize) -> f64 {
        self.row(state)[action]
    }

    pub fn set(&mut self, state: [usize; 2], action: usize, value: f64) {
        self.row_mut(state)[action] = value;
    }

    /// Largest action value in a state.
    pub fn max_value(&self, state: [usize; 2]) -> f64 {
        self.row(state)
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Every action attaining the row maximum, in index order.
    pub fn greedy_actions(&self, state: [usize; 2]) -> Vec<usize> {
        let row = self.row(state);
        let best = self.max_value(state);
        row.iter()
            .enumerate()
            .filter(|&(_, &v)| v == best)
            .map(|(a, _)| a)
            .collect()
    }

    /// One-step Q-learning update:
    ///
    /// `Q(s,a) += alpha * (r + delta * max_a' Q(s',a') - Q(s,a))`
    ///
    /// The continuation value is read before the write. Returns the TD error.
    pub fn update(
        &mut self,
        state: [usize; 2],
        action: usize,
        reward: f64,
        next_state: [usize; 2],
        alpha: f64,
        delta: f64,
    ) -> f64 {
        let continuation = self.max_value(next_state);
        let current = self.get(state, action);
        let td_error = reward + delta * continuation - current;
        self.set(state, action, current + alpha * td_error);
        td_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GridParams, MarketParams};
    use proptest::prelude::*;

    fn setup(size: usize) -> (Market, PriceGrid) {
        let market = Market::new(MarketParams::default()).unwrap();
        let grid = PriceGrid::new(&GridParams {
            size,
            ..Default::default()
        })
        .unwrap();
        (market, grid)
    }

    #[test]
    fn prior_is_discounted_mean_profit() {
        let (market, grid) = setup(3);
        let delta = 0.95;
        let q0 = QTable::with_prior(&market, &grid, 0, delta);
        let q1 = QTable::with_prior(&market, &grid, 1, delta);

        for own in 0..3 {
            let mut total = 0.0;
            for rival in 0..3 {
                total += market.profits([grid.price_at(own), grid.price_at(rival)])[0];
            }
            let expected = total / ((1.0 - delta) * 3.0);
            for s0 in 0..3 {
                for s1 in 0..3 {
                    assert!((q0.get([s0, s1], own) - expected).abs() < 1e-12);
                    // Symmetric market: the rival's prior matches.
                    assert!((q1.get([s0, s1], own) - expected).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn greedy_actions_lists_ties() {
        let mut q = QTable::filled(3, 0.0);
        q.set([1, 2], 0, 5.0);
        q.set([1, 2], 2, 5.0);
        assert_eq!(q.greedy_actions([1, 2]), vec![0, 2]);
        assert_eq!(q.greedy_actions([0, 0]), vec![0, 1, 2]);
        assert_eq!(q.max_value([1, 2]), 5.0);
    }

    #[test]
    fn rows_are_independent() {
        let mut q = QTable::filled(2, 1.0);
        q.set([0, 1], 1, 9.0);
        assert_eq!(q.row([0, 1]), &[1.0, 9.0]);
        assert_eq!(q.row([1, 0]), &[1.0, 1.0]);
        assert_eq!(q.row([1, 1]), &[1.0, 1.0]);
    }

    #[test]
    fn single_update_by_hand() {
        let mut q = QTable::filled(2, 0.0);
        q.set([1, 1], 0, 2.0);
        q.set([1, 1], 1, 4.0);
        q.set([0, 0], 1, 1.0);
        let td = q.update([0, 0], 1, 0.5, [1, 1], 0.1, 0.9);
        // target = 0.5 + 0.9 * 4 = 4.1, error = 3.1
        assert!((td - 3.1).abs() < 1e-12);
        assert!((q.get([0, 0], 1) - 1.31).abs() < 1e-12);
    }

    #[test]
    fn repeated_updates_reach_fixed_point() {
        let (alpha, delta, reward) = (0.2, 0.95, 1.0);

        // Self-loop: the fixed point solves Q = r + delta * Q.
        let mut q = QTable::filled(2, 0.0);
        q.set([0, 0], 1, -100.0);
        for _ in 0..5_000 {
            q.update([0, 0], 0, reward, [0, 0], alpha, delta);
        }
        assert!((q.get([0, 0], 0) - reward / (1.0 - delta)).abs() < 1e-9);
        assert_eq!(q.get([0, 0], 1), -100.0);

        // Transition into a frozen state: Q = r + delta * 5.
        let mut q = QTable::filled(2, 0.0);
        q.set([1, 1], 0, 3.0);
        q.set([1, 1], 1, 5.0);
        for _ in 0..5_000 {
            q.update([0, 1], 0, reward, [1, 1], alpha, delta);
        }
        assert!((q.get([0, 1], 0) - 5.75).abs() < 1e-9);
    }

    #[test]
    fn contraction_shrinks_error_each_step() {
        let (alpha, delta, reward) = (0.3, 0.9, 2.0);
        let fixed_point = reward / (1.0 - delta);
        let mut q = QTable::filled(2, 0.0);
        q.set([0, 0], 1, f64::MIN);
        let mut err = (q.get([0, 0], 0) - fixed_point).abs();
        for _ in 0..200 {
            q.update([0, 0], 0, reward, [0, 0], alpha, delta);
            let next_err = (q.get([0, 0], 0) - fixed_point).abs();
            assert!(next_err <= err * (1.0 - alpha * (1.0 - delta)) + 1e-12);
            err = next_err;
        }
    }

    proptest! {
        #[test]
        fn update_moves_toward_target(
            current in -1000.0f64..1000.0,
            continuation in -1000.0f64..1000.0,
            reward in -10.0f64..10.0,
            alpha in 0.01f64..1.0,
            delta in 0.0f64..0.99,
        ) {
            let mut q = QTable::filled(2, f64::MIN);
            q.set([0, 0], 0, current);
            q.set([1, 1], 0, continuation);
            q.update([0, 0], 0, reward, [1, 1], alpha, delta);
            let target = reward + delta * continuation;
            let updated = q.get([0, 0], 0);
            prop_assert!(updated >= current.min(target) - 1e-9);
            prop_assert!(updated <= current.max(target) + 1e-9);
        }
    }
}
