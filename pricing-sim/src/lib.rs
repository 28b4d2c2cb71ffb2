//! Algorithmic pricing in a repeated Bertrand duopoly.
//!
//! Two firms with logit demand learn prices on a discrete grid by tabular
//! Q-learning. A sweep runs independent sessions over a grid of learning
//! rates (alpha) and exploration decay rates (beta) and reports how far the
//! learned prices sit above the one-shot Nash benchmark.

pub mod config;
pub mod error;
pub mod experiment;
pub mod export;
pub mod grid;
pub mod learning;
pub mod market;
pub mod policy;
pub mod qtable;

pub use config::{GridParams, LearningParams, MarketParams, SimConfig, StabilityRule, SweepConfig};
pub use error::{Error, Result};
pub use experiment::{CellResult, Metric, SweepResults, run_seed, run_single, run_sweep};
pub use export::{export_results, results_frames};
pub use grid::PriceGrid;
pub use learning::{Outcome, RunReport, Session, Step};
pub use market::{Benchmarks, Market};
pub use policy::{Choice, EpsilonGreedy};
pub use qtable::QTable;

#[cfg(feature = "instrument")]
pub use instrument;
