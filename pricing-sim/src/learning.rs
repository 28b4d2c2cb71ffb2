//! Repeated-game Q-learning session for two pricing firms.
//!
//! Each period both firms pick a price index from their own table conditioned
//! on last period's joint price pair, the pair becomes the next state, both
//! tables take one Bellman step, and the stability counter advances. A session
//! terminates when the counter reaches the stability threshold (converged) or
//! when the period budget runs out (hard-capped).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::{LearningParams, StabilityRule, validate_rates};
use crate::error::Result;
use crate::grid::PriceGrid;
use crate::market::Market;
use crate::policy::{Choice, EpsilonGreedy};
use crate::qtable::QTable;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The stability counter reached the threshold.
    Converged,
    /// The period budget ran out first.
    HardCapped,
}

impl Outcome {
    pub fn converged(self) -> bool {
        matches!(self, Outcome::Converged)
    }
}

/// One played period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    /// 1-based index of the period just played.
    pub period: u64,
    /// Joint state the firms conditioned on.
    pub state: [usize; 2],
    /// Joint action, which is also the next state.
    pub action: [usize; 2],
    pub prices: [f64; 2],
    pub profits: [f64; 2],
    pub explored: [bool; 2],
    pub epsilon: f64,
    /// Stability counter after this period.
    pub stay: u64,
}

/// Terminal summary of a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: Outcome,
    pub alpha: f64,
    pub beta: f64,
    pub final_state: [usize; 2],
    pub final_prices: [f64; 2],
    /// Per-period profits at the final joint price pair.
    pub final_profits: [f64; 2],
    pub periods: u64,
    /// Mean realized profit per firm over all periods played.
    pub mean_profits: [f64; 2],
}

impl RunReport {
    /// Mean of the two firms' profits at the final price pair.
    pub fn avg_final_profit(&self) -> f64 {
        0.5 * (self.final_profits[0] + self.final_profits[1])
    }
}

/// A single learning run: owns both tables, the RNG, and the counters.
///
/// Nothing is shared between sessions, so any number can run in parallel.
#[derive(Debug, Clone)]
pub struct Session {
    grid: PriceGrid,
    learning: LearningParams,
    alpha: f64,
    policy: EpsilonGreedy,
    tables: [QTable; 2],
    /// Profit pair for every joint action, row-major by `[firm 0, firm 1]` index.
    payoffs: Vec<[f64; 2]>,
    rng: StdRng,
    state: [usize; 2],
    /// State before `state`, for the two-cycle stability rule.
    previous: Option<[usize; 2]>,
    stay: u64,
    time: u64,
    profit_sums: [f64; 2],
}

impl Session {
    /// Fresh session with prior-initialized tables and a uniformly random
    /// initial joint state drawn from `seed`.
    pub fn new(
        market: &Market,
        grid: &PriceGrid,
        learning: &LearningParams,
        alpha: f64,
        beta: f64,
        seed: u64,
    ) -> Result<Self> {
        learning.validate()?;
        validate_rates(alpha, beta)?;

        let m = grid.len();
        let tables = [
            QTable::with_prior(market, grid, 0, learning.delta),
            QTable::with_prior(market, grid, 1, learning.delta),
        ];
        let payoffs = (0..m * m)
            .map(|i| market.profits(grid.pair([i / m, i % m])))
            .collect();

        let mut rng = StdRng::seed_from_u64(seed);
        let state = [rng.random_range(0..m), rng.random_range(0..m)];

        Ok(Self {
            grid: grid.clone(),
            learning: learning.clone(),
            alpha,
            policy: EpsilonGreedy::new(beta),
            tables,
            payoffs,
            rng,
            state,
            previous: None,
            stay: 0,
            time: 0,
            profit_sums: [0.0; 2],
        })
    }

    pub fn state(&self) -> [usize; 2] {
        self.state
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn stay(&self) -> u64 {
        self.stay
    }

    pub fn table(&self, firm: usize) -> &QTable {
        &self.tables[firm]
    }

    pub fn grid(&self) -> &PriceGrid {
        &self.grid
    }

    /// Terminal outcome, or `None` while the session should keep playing.
    pub fn status(&self) -> Option<Outcome> {
        if self.stay >= self.learning.stability_threshold {
            return Some(Outcome::Converged);
        }
        match self.learning.max_periods {
            Some(cap) if self.time >= cap => Some(Outcome::HardCapped),
            _ => None,
        }
    }

    fn payoff(&self, action: [usize; 2]) -> [f64; 2] {
        self.payoffs[action[0] * self.grid.len() + action[1]]
    }

    /// Play one period.
    pub fn step(&mut self) -> Step {
        let period = self.time + 1;
        let state = self.state;

        let choices = [
            self.policy
                .choose(&mut self.rng, &self.tables[0], state, period),
            self.policy
                .choose(&mut self.rng, &self.tables[1], state, period),
        ];
        let action = [choices[0].action(), choices[1].action()];
        let profits = self.payoff(action);

        // Both firms key on the same (state, next state); each uses its own reward.
        let (alpha, delta) = (self.alpha, self.learning.delta);
        self.tables[0].update(state, action[0], profits[0], action, alpha, delta);
        self.tables[1].update(state, action[1], profits[1], action, alpha, delta);

        let stable = match self.learning.stability_rule {
            StabilityRule::SameState => action == state,
            StabilityRule::TwoCycle => action == state || self.previous == Some(action),
        };
        self.stay = if stable { self.stay + 1 } else { 0 };

        self.previous = Some(state);
        self.state = action;
        self.time = period;
        self.profit_sums[0] += profits[0];
        self.profit_sums[1] += profits[1];

        let step = Step {
            period,
            state,
            action,
            prices: self.grid.pair(action),
            profits,
            explored: [
                matches!(choices[0], Choice::Explore(_)),
                matches!(choices[1], Choice::Explore(_)),
            ],
            epsilon: self.policy.epsilon(period),
            stay: self.stay,
        };

        #[cfg(feature = "instrument")]
        {
            let sampled = self
                .learning
                .record_every
                .is_some_and(|every| period % every == 0);
            if sampled {
                tracing::info!(
                    target: "period",
                    period = step.period,
                    state_1 = step.state[0] as u64,
                    state_2 = step.state[1] as u64,
                    action_1 = step.action[0] as u64,
                    action_2 = step.action[1] as u64,
                    price_1 = step.prices[0],
                    price_2 = step.prices[1],
                    profit_1 = step.profits[0],
                    profit_2 = step.profits[1],
                    explored_1 = step.explored[0],
                    explored_2 = step.explored[1],
                    epsilon = step.epsilon,
                    stay = step.stay,
                );
            }
        }

        step
    }

    /// Play until converged or hard-capped.
    pub fn run(&mut self) -> RunReport {
        let outcome = loop {
            if let Some(outcome) = self.status() {
                break outcome;
            }
            self.step();
        };
        let report = self.report(outcome);

        match outcome {
            Outcome::Converged => tracing::debug!(
                alpha = report.alpha,
                beta = report.beta,
                periods = report.periods,
                price_1 = report.final_prices[0],
                price_2 = report.final_prices[1],
                "session converged"
            ),
            Outcome::HardCapped => tracing::warn!(
                alpha = report.alpha,
                beta = report.beta,
                periods = report.periods,
                stay = self.stay,
                "session hit period cap before converging"
            ),
        }

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "run",
            alpha = report.alpha,
            beta = report.beta,
            converged = outcome.converged(),
            periods = report.periods,
            state_1 = report.final_state[0] as u64,
            state_2 = report.final_state[1] as u64,
            price_1 = report.final_prices[0],
            price_2 = report.final_prices[1],
            profit_1 = report.final_profits[0],
            profit_2 = report.final_profits[1],
            mean_profit_1 = report.mean_profits[0],
            mean_profit_2 = report.mean_profits[1],
        );

        report
    }

    fn report(&self, outcome: Outcome) -> RunReport {
        let periods = self.time;
        let mean_profits = if periods == 0 {
            [0.0; 2]
        } else {
            [
                self.profit_sums[0] / periods as f64,
                self.profit_sums[1] / periods as f64,
            ]
        };
        RunReport {
            outcome,
            alpha: self.alpha,
            beta: self.policy.beta(),
            final_state: self.state,
            final_prices: self.grid.pair(self.state),
            final_profits: self.payoff(self.state),
            periods,
            mean_profits,
        }
    }
}
