//! Logit demand for two differentiated firms and an outside good.
//!
//! Pure functions of the price pair. Shares are computed with the largest
//! utility shifted out of every exponent so the ratios stay finite for any
//! price pair the grid can produce.

use serde::{Deserialize, Serialize};

use crate::config::{GridParams, MarketParams};
use crate::error::Result;

const GOLDEN_RATIO_CONJ: f64 = 0.618_033_988_749_894_9;
const SEARCH_TOLERANCE: f64 = 1e-12;
const FIXED_POINT_TOLERANCE: f64 = 1e-7;
const FIXED_POINT_MAX_ITERS: usize = 1_000;

/// Validated logit market. Cheap to copy into every session.
#[derive(Debug, Clone, PartialEq)]
pub struct Market {
    params: MarketParams,
}

impl Market {
    pub fn new(params: MarketParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &MarketParams {
        &self.params
    }

    /// Utilities `(a_i - p_i) / mu` of both goods, plus the outside good's `a0 / mu`.
    fn utilities(&self, prices: [f64; 2]) -> ([f64; 2], f64) {
        let mu = self.params.mu;
        let u = [
            (self.params.quality[0] - prices[0]) / mu,
            (self.params.quality[1] - prices[1]) / mu,
        ];
        (u, self.params.outside_quality / mu)
    }

    /// Market shares of firm 0, firm 1, and the outside good.
    pub fn shares(&self, prices: [f64; 2]) -> [f64; 3] {
        let ([u0, u1], u_out) = self.utilities(prices);
        let shift = u0.max(u1).max(u_out);
        let e = [(u0 - shift).exp(), (u1 - shift).exp(), (u_out - shift).exp()];
        let total = e[0] + e[1] + e[2];
        [e[0] / total, e[1] / total, e[2] / total]
    }

    /// Demand share of each firm.
    pub fn demands(&self, prices: [f64; 2]) -> [f64; 2] {
        let [d0, d1, _] = self.shares(prices);
        [d0, d1]
    }

    /// Share of consumers choosing the outside good.
    pub fn outside_share(&self, prices: [f64; 2]) -> f64 {
        self.shares(prices)[2]
    }

    /// Per-period profit `(p_i - c_i) * d_i` of each firm.
    pub fn profits(&self, prices: [f64; 2]) -> [f64; 2] {
        let [d0, d1] = self.demands(prices);
        [
            (prices[0] - self.params.cost[0]) * d0,
            (prices[1] - self.params.cost[1]) * d1,
        ]
    }

    fn firm_profit(&self, firm: usize, own: f64, rival: f64) -> f64 {
        let mut prices = [rival; 2];
        prices[firm] = own;
        self.profits(prices)[firm]
    }

    // === BENCHMARKS ===

    /// Profit-maximizing price of `firm` against a fixed rival price.
    pub fn best_response(&self, firm: usize, rival_price: f64) -> f64 {
        let cost = self.params.cost[firm];
        let hi = cost.max(self.params.quality[firm]) + 20.0 * self.params.mu;
        golden_section_max(cost, hi, |p| self.firm_profit(firm, p, rival_price))
    }

    /// One-shot Nash equilibrium prices, by iterating simultaneous best responses.
    pub fn nash_prices(&self) -> [f64; 2] {
        let mut prices = [
            self.params.cost[0] + self.params.mu,
            self.params.cost[1] + self.params.mu,
        ];
        for _ in 0..FIXED_POINT_MAX_ITERS {
            let next = [
                self.best_response(0, prices[1]),
                self.best_response(1, prices[0]),
            ];
            let moved = (next[0] - prices[0]).abs().max((next[1] - prices[1]).abs());
            prices = next;
            if moved < FIXED_POINT_TOLERANCE {
                break;
            }
        }
        prices
    }

    /// Common price maximizing the firms' joint profit.
    pub fn monopoly_price(&self) -> f64 {
        let lo = self.params.cost[0].min(self.params.cost[1]);
        let hi = self.params.cost[0].max(self.params.cost[1])
            + self.params.quality[0].max(self.params.quality[1]).max(0.0)
            + 20.0 * self.params.mu;
        golden_section_max(lo, hi, |p| {
            let [a, b] = self.profits([p, p]);
            a + b
        })
    }
}

/// Maximize a unimodal function on `[lo, hi]`.
fn golden_section_max(mut lo: f64, mut hi: f64, f: impl Fn(f64) -> f64) -> f64 {
    let mut x1 = hi - GOLDEN_RATIO_CONJ * (hi - lo);
    let mut x2 = lo + GOLDEN_RATIO_CONJ * (hi - lo);
    let mut f1 = f(x1);
    let mut f2 = f(x2);
    while hi - lo > SEARCH_TOLERANCE {
        if f1 < f2 {
            lo = x1;
            x1 = x2;
            f1 = f2;
            x2 = lo + GOLDEN_RATIO_CONJ * (hi - lo);
            f2 = f(x2);
        } else {
            hi = x2;
            x2 = x1;
            f2 = f1;
            x1 = hi - GOLDEN_RATIO_CONJ * (hi - lo);
            f1 = f(x1);
        }
    }
    0.5 * (lo + hi)
}

// ============================================================================
// Benchmarks - Profit normalization
// ============================================================================

/// Per-firm profits at the configured Nash and monopoly prices.
///
/// Profit gain is 0 at the Nash profit and 1 at the monopoly profit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Benchmarks {
    pub nash_price: f64,
    pub monopoly_price: f64,
    pub nash_profit: f64,
    pub monopoly_profit: f64,
}

impl Benchmarks {
    pub fn new(market: &Market, grid: &GridParams) -> Self {
        let mean = |p: f64| {
            let [a, b] = market.profits([p, p]);
            0.5 * (a + b)
        };
        Self {
            nash_price: grid.nash_price,
            monopoly_price: grid.monopoly_price,
            nash_profit: mean(grid.nash_price),
            monopoly_profit: mean(grid.monopoly_price),
        }
    }

    pub fn profit_gain(&self, profit: f64) -> f64 {
        (profit - self.nash_profit) / (self.monopoly_profit - self.nash_profit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> Market {
        Market::new(MarketParams::default()).unwrap()
    }

    #[test]
    fn shares_sum_to_one() {
        let market = reference();
        for p in [1.0, 1.3, 1.47293, 1.7, 1.92498, 2.1, 5.0] {
            let [d0, d1, d_out] = market.shares([p, p]);
            let total = d0 + d1 + d_out;
            assert!((total - 1.0).abs() < 1e-12, "shares at {p} sum to {total}");
            assert!((d0 - d1).abs() < 1e-15, "symmetric prices should split evenly");
        }
    }

    #[test]
    fn matches_closed_form_demand() {
        let market = reference();
        let (p1, p2) = (1.5, 1.8);
        let e1 = ((2.0 - p1) / 0.25_f64).exp();
        let e2 = ((2.0 - p2) / 0.25_f64).exp();
        let e0 = (0.0 / 0.25_f64).exp();
        let expected = e1 / (e1 + e2 + e0);
        let [d1, _] = market.demands([p1, p2]);
        assert!((d1 - expected).abs() < 1e-12);
        let [pi1, _] = market.profits([p1, p2]);
        assert!((pi1 - (p1 - 1.0) * expected).abs() < 1e-12);
    }

    #[test]
    fn profit_vanishes_at_cost() {
        let market = reference();
        let [pi0, pi1] = market.profits([1.0, 1.0]);
        assert_eq!(pi0, 0.0);
        assert_eq!(pi1, 0.0);
    }

    #[test]
    fn extreme_prices_stay_finite() {
        let market = reference();
        let [d0, d1, d_out] = market.shares([-500.0, 500.0]);
        assert!(d0.is_finite() && d1.is_finite() && d_out.is_finite());
        assert!((d0 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn undercutting_raises_share() {
        let market = reference();
        let [low, high] = market.demands([1.5, 1.8]);
        assert!(low > high);
    }

    #[test]
    fn nash_price_matches_calibration() {
        let market = reference();
        let [p0, p1] = market.nash_prices();
        assert!((p0 - 1.47293).abs() < 1e-4, "nash price {p0}");
        assert!((p0 - p1).abs() < 1e-9);
        // No profitable unilateral deviation.
        let base = market.profits([p0, p1])[0];
        for dev in [p0 - 0.05, p0 + 0.05] {
            assert!(market.profits([dev, p1])[0] <= base + 1e-12);
        }
    }

    #[test]
    fn monopoly_price_matches_calibration() {
        let market = reference();
        let pm = market.monopoly_price();
        assert!((pm - 1.92498).abs() < 1e-4, "monopoly price {pm}");
    }

    #[test]
    fn benchmark_profits() {
        let market = reference();
        let bench = Benchmarks::new(&market, &GridParams::default());
        assert!((bench.nash_profit - 0.2229).abs() < 1e-3, "{}", bench.nash_profit);
        assert!((bench.monopoly_profit - 0.3375).abs() < 1e-3, "{}", bench.monopoly_profit);
        assert!(bench.profit_gain(bench.nash_profit).abs() < 1e-12);
        assert!((bench.profit_gain(bench.monopoly_profit) - 1.0).abs() < 1e-12);
    }
}
