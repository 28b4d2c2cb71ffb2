//! Sweep over (alpha, beta) cells.
//!
//! Every session in the sweep is independent: it builds its own tables and
//! RNG from a seed derived from the cell coordinates, so results do not depend
//! on how rayon schedules the work.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::SimConfig;
use crate::error::Result;
use crate::grid::PriceGrid;
use crate::learning::{RunReport, Session};
use crate::market::{Benchmarks, Market};

/// Aggregated result of one (alpha, beta) cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellResult {
    pub alpha: f64,
    pub beta: f64,
    /// Final price of each firm, averaged over repetitions.
    pub final_prices: [f64; 2],
    /// Per-firm profit at the final price pair, averaged over firms and repetitions.
    pub avg_profit: f64,
    pub profit_gain: f64,
    /// Periods played, averaged over repetitions.
    pub periods: f64,
    /// Share of repetitions that converged.
    pub convergence_rate: f64,
    /// True iff every repetition converged.
    pub converged: bool,
    pub runs: Vec<RunReport>,
}

impl CellResult {
    fn from_runs(alpha: f64, beta: f64, runs: Vec<RunReport>, benchmarks: &Benchmarks) -> Self {
        let avg_profit = mean_of(&runs, RunReport::avg_final_profit);
        let converged_runs = runs.iter().filter(|r| r.outcome.converged()).count();
        Self {
            alpha,
            beta,
            final_prices: [
                mean_of(&runs, |r| r.final_prices[0]),
                mean_of(&runs, |r| r.final_prices[1]),
            ],
            avg_profit,
            profit_gain: benchmarks.profit_gain(avg_profit),
            periods: mean_of(&runs, |r| r.periods as f64),
            convergence_rate: converged_runs as f64 / runs.len() as f64,
            converged: converged_runs == runs.len(),
            runs,
        }
    }
}

fn mean_of(runs: &[RunReport], f: impl Fn(&RunReport) -> f64) -> f64 {
    runs.iter().map(f).sum::<f64>() / runs.len() as f64
}

/// Per-cell quantities that can be laid out as an alpha-by-beta matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    ProfitGain,
    AvgProfit,
    Price1,
    Price2,
    Periods,
    ConvergenceRate,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::ProfitGain,
        Metric::AvgProfit,
        Metric::Price1,
        Metric::Price2,
        Metric::Periods,
        Metric::ConvergenceRate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::ProfitGain => "profit_gain",
            Metric::AvgProfit => "avg_profit",
            Metric::Price1 => "price_1",
            Metric::Price2 => "price_2",
            Metric::Periods => "periods",
            Metric::ConvergenceRate => "converged",
        }
    }

    pub fn of(self, cell: &CellResult) -> f64 {
        match self {
            Metric::ProfitGain => cell.profit_gain,
            Metric::AvgProfit => cell.avg_profit,
            Metric::Price1 => cell.final_prices[0],
            Metric::Price2 => cell.final_prices[1],
            Metric::Periods => cell.periods,
            Metric::ConvergenceRate => cell.convergence_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResults {
    pub alphas: Vec<f64>,
    pub betas: Vec<f64>,
    pub benchmarks: Benchmarks,
    /// Row-major: `cells[i * betas.len() + j]` is `(alphas[i], betas[j])`.
    pub cells: Vec<CellResult>,
}

impl SweepResults {
    pub fn cell(&self, alpha_idx: usize, beta_idx: usize) -> &CellResult {
        &self.cells[alpha_idx * self.betas.len() + beta_idx]
    }

    /// Rows are alphas, columns are betas.
    pub fn metric_matrix(&self, metric: Metric) -> Vec<Vec<f64>> {
        self.cells
            .chunks(self.betas.len())
            .map(|row| row.iter().map(|cell| metric.of(cell)).collect())
            .collect()
    }
}

/// Seed for one session, mixed from the sweep seed and the run's coordinates.
pub fn run_seed(seed: u64, alpha_idx: usize, beta_idx: usize, repetition: usize) -> u64 {
    let mut h = splitmix64(seed);
    for part in [alpha_idx, beta_idx, repetition] {
        h = splitmix64(h ^ part as u64);
    }
    h
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Run one session with the configured market, grid, and learning parameters.
pub fn run_single(config: &SimConfig, alpha: f64, beta: f64, seed: u64) -> Result<RunReport> {
    let market = Market::new(config.market.clone())?;
    let grid = PriceGrid::new(&config.grid)?;
    let mut session = Session::new(&market, &grid, &config.learning, alpha, beta, seed)?;
    Ok(session.run())
}

/// Run every (alpha, beta, repetition) of the sweep and aggregate per cell.
pub fn run_sweep(config: &SimConfig) -> Result<SweepResults> {
    config.validate()?;
    let sweep = &config.sweep;
    let market = Market::new(config.market.clone())?;
    let grid = PriceGrid::new(&config.grid)?;
    let benchmarks = Benchmarks::new(&market, &config.grid);

    let jobs: Vec<(usize, usize, usize)> = (0..sweep.alphas.len())
        .flat_map(|a| {
            (0..sweep.betas.len()).flat_map(move |b| (0..sweep.repetitions).map(move |r| (a, b, r)))
        })
        .collect();

    info!(
        cells = sweep.alphas.len() * sweep.betas.len(),
        sessions = jobs.len(),
        seed = sweep.seed,
        "starting sweep"
    );

    let play = |&(a, b, r): &(usize, usize, usize)| -> Result<RunReport> {
        let (alpha, beta) = (sweep.alphas[a], sweep.betas[b]);
        let seed = run_seed(sweep.seed, a, b, r);
        tracing::debug!(alpha, beta, repetition = r, seed, "session start");
        let mut session = Session::new(&market, &grid, &config.learning, alpha, beta, seed)?;
        Ok(session.run())
    };

    // Jobs are ordered by cell, and par_iter().collect() preserves order.
    let reports: Vec<RunReport> = match sweep.threads {
        Some(threads) => rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()?
            .install(|| jobs.par_iter().map(play).collect::<Result<_>>())?,
        None => jobs.par_iter().map(play).collect::<Result<_>>()?,
    };

    let mut cells = Vec::with_capacity(sweep.alphas.len() * sweep.betas.len());
    let mut reports = reports.into_iter();
    for &alpha in &sweep.alphas {
        for &beta in &sweep.betas {
            let runs: Vec<RunReport> = reports.by_ref().take(sweep.repetitions).collect();
            let cell = CellResult::from_runs(alpha, beta, runs, &benchmarks);

            info!(
                alpha,
                beta,
                profit_gain = cell.profit_gain,
                periods = cell.periods,
                converged = cell.converged,
                "cell finished"
            );

            #[cfg(feature = "instrument")]
            tracing::info!(
                target: "cell",
                alpha = cell.alpha,
                beta = cell.beta,
                price_1 = cell.final_prices[0],
                price_2 = cell.final_prices[1],
                avg_profit = cell.avg_profit,
                profit_gain = cell.profit_gain,
                periods = cell.periods,
                convergence_rate = cell.convergence_rate,
                converged = cell.converged,
            );

            cells.push(cell);
        }
    }

    let converged = cells.iter().filter(|c| c.converged).count();
    info!(cells = cells.len(), converged, "sweep finished");

    Ok(SweepResults {
        alphas: sweep.alphas.clone(),
        betas: sweep.betas.clone(),
        benchmarks,
        cells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GridParams, LearningParams, SweepConfig};
    use crate::learning::Outcome;

    fn tiny_config(threads: Option<usize>) -> SimConfig {
        SimConfig {
            grid: GridParams {
                size: 3,
                ..Default::default()
            },
            learning: LearningParams {
                stability_threshold: 50,
                max_periods: Some(2_000),
                ..Default::default()
            },
            sweep: SweepConfig {
                alphas: vec![0.1, 0.2],
                betas: vec![0.01, 0.05, 0.1],
                repetitions: 2,
                seed: 17,
                threads,
            },
            ..Default::default()
        }
    }

    #[test]
    fn seeds_differ_per_coordinate() {
        let seeds = [
            run_seed(1, 0, 0, 0),
            run_seed(1, 1, 0, 0),
            run_seed(1, 0, 1, 0),
            run_seed(1, 0, 0, 1),
            run_seed(2, 0, 0, 0),
        ];
        for i in 0..seeds.len() {
            for j in i + 1..seeds.len() {
                assert_ne!(seeds[i], seeds[j]);
            }
        }
        assert_eq!(run_seed(1, 2, 3, 4), run_seed(1, 2, 3, 4));
    }

    #[test]
    fn sweep_shape_and_order() {
        let results = run_sweep(&tiny_config(None)).unwrap();
        assert_eq!(results.cells.len(), 6);
        for (i, &alpha) in results.alphas.iter().enumerate() {
            for (j, &beta) in results.betas.iter().enumerate() {
                let cell = results.cell(i, j);
                assert_eq!(cell.alpha, alpha);
                assert_eq!(cell.beta, beta);
                assert_eq!(cell.runs.len(), 2);
            }
        }
        let gains = results.metric_matrix(Metric::ProfitGain);
        assert_eq!(gains.len(), 2);
        assert!(gains.iter().all(|row| row.len() == 3));
        assert_eq!(gains[1][2], results.cell(1, 2).profit_gain);
    }

    #[test]
    fn sweep_matches_single_runs() {
        let config = tiny_config(None);
        let results = run_sweep(&config).unwrap();
        let report = run_single(&config, 0.2, 0.05, run_seed(17, 1, 1, 1)).unwrap();
        assert_eq!(results.cell(1, 1).runs[1], report);
    }

    #[test]
    fn independent_of_thread_count() {
        let serial = run_sweep(&tiny_config(Some(1))).unwrap();
        let parallel = run_sweep(&tiny_config(Some(4))).unwrap();
        assert_eq!(serial, parallel);
    }

    #[test]
    fn cell_aggregation() {
        let market = Market::new(Default::default()).unwrap();
        let benchmarks = Benchmarks::new(&market, &GridParams::default());
        let report = |outcome, p: f64, periods| RunReport {
            outcome,
            alpha: 0.1,
            beta: 1e-5,
            final_state: [0, 0],
            final_prices: [p, p],
            final_profits: market.profits([p, p]),
            periods,
            mean_profits: [0.0; 2],
        };
        let cell = CellResult::from_runs(
            0.1,
            1e-5,
            vec![
                report(Outcome::Converged, 1.47293, 100),
                report(Outcome::HardCapped, 1.92498, 300),
            ],
            &benchmarks,
        );
        assert!(!cell.converged);
        assert_eq!(cell.convergence_rate, 0.5);
        assert_eq!(cell.periods, 200.0);
        assert!((cell.profit_gain - 0.5).abs() < 1e-12);
        assert!((cell.final_prices[0] - 0.5 * (1.47293 + 1.92498)).abs() < 1e-12);
    }

    #[test]
    fn invalid_config_rejected_before_running() {
        let mut config = tiny_config(None);
        config.learning.delta = 1.0;
        assert!(run_sweep(&config).is_err());
    }
}
