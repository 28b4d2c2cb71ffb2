//! Discretized price space shared by both firms.
//!
//! Internally everything carries grid indices; prices are resolved only when
//! profits are computed or results are reported.

use crate::config::GridParams;
use crate::error::{Error, Result};

/// `n` evenly spaced points from `start` to `end` inclusive.
///
/// The last point is exactly `end`, so grid endpoints never drift.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            let mut points: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
            points[n - 1] = end;
            points
        }
    }
}

/// Ordered candidate prices. Immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceGrid {
    prices: Vec<f64>,
}

impl PriceGrid {
    /// Build the grid spanning `[pn - xi(pm - pn), pm + xi(pm - pn)]`.
    pub fn new(params: &GridParams) -> Result<Self> {
        params.validate()?;
        let span = params.monopoly_price - params.nash_price;
        let lo = params.nash_price - params.xi * span;
        let hi = params.monopoly_price + params.xi * span;
        Ok(Self {
            prices: linspace(lo, hi, params.size),
        })
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn prices(&self) -> &[f64] {
        &self.prices
    }

    /// Price at a grid index. Panics if `index >= len()`.
    pub fn price_at(&self, index: usize) -> f64 {
        self.prices[index]
    }

    /// Prices of a joint state.
    pub fn pair(&self, state: [usize; 2]) -> [f64; 2] {
        [self.prices[state[0]], self.prices[state[1]]]
    }

    /// Index of an exact grid member. Off-grid prices are an error, never rounded.
    pub fn index_of(&self, price: f64) -> Result<usize> {
        self.prices
            .iter()
            .position(|&p| p == price)
            .ok_or(Error::PriceNotOnGrid { price })
    }
}
