//! Tabular export of sweep results.
//!
//! Each metric becomes a rectangular frame (rows = alphas, one column per
//! beta) consumed by external plotting. Long-format `cells` and `runs` frames
//! and a JSON summary sit alongside.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::experiment::{Metric, SweepResults};
use crate::market::Benchmarks;

/// Column label for one beta value in the metric matrices.
pub fn beta_column(beta: f64) -> String {
    format!("beta={beta}")
}

fn metric_frame(results: &SweepResults, metric: Metric) -> PolarsResult<DataFrame> {
    let matrix = results.metric_matrix(metric);
    let mut columns = vec![Column::new("alpha".into(), &results.alphas)];
    for (j, &beta) in results.betas.iter().enumerate() {
        let values: Vec<f64> = matrix.iter().map(|row| row[j]).collect();
        columns.push(Column::new(beta_column(beta).into(), values));
    }
    DataFrame::new(columns)
}

fn cells_frame(results: &SweepResults) -> PolarsResult<DataFrame> {
    let cells = &results.cells;
    let f = |get: fn(&crate::experiment::CellResult) -> f64| -> Vec<f64> {
        cells.iter().map(get).collect()
    };
    DataFrame::new(vec![
        Column::new("alpha".into(), f(|c| c.alpha)),
        Column::new("beta".into(), f(|c| c.beta)),
        Column::new("price_1".into(), f(|c| c.final_prices[0])),
        Column::new("price_2".into(), f(|c| c.final_prices[1])),
        Column::new("avg_profit".into(), f(|c| c.avg_profit)),
        Column::new("profit_gain".into(), f(|c| c.profit_gain)),
        Column::new("periods".into(), f(|c| c.periods)),
        Column::new("convergence_rate".into(), f(|c| c.convergence_rate)),
        Column::new(
            "converged".into(),
            cells.iter().map(|c| c.converged).collect::<Vec<bool>>(),
        ),
    ])
}

fn runs_frame(results: &SweepResults) -> PolarsResult<DataFrame> {
    let mut alpha = Vec::new();
    let mut beta = Vec::new();
    let mut repetition = Vec::new();
    let mut converged = Vec::new();
    let mut periods = Vec::new();
    let mut state = [Vec::new(), Vec::new()];
    let mut price = [Vec::new(), Vec::new()];
    let mut profit = [Vec::new(), Vec::new()];
    let mut mean_profit = [Vec::new(), Vec::new()];

    for cell in &results.cells {
        for (r, run) in cell.runs.iter().enumerate() {
            alpha.push(run.alpha);
            beta.push(run.beta);
            repetition.push(r as u64);
            converged.push(run.outcome.converged());
            periods.push(run.periods);
            for firm in 0..2 {
                state[firm].push(run.final_state[firm] as u64);
                price[firm].push(run.final_prices[firm]);
                profit[firm].push(run.final_profits[firm]);
                mean_profit[firm].push(run.mean_profits[firm]);
            }
        }
    }

    let [state_1, state_2] = state;
    let [price_1, price_2] = price;
    let [profit_1, profit_2] = profit;
    let [mean_profit_1, mean_profit_2] = mean_profit;
    DataFrame::new(vec![
        Column::new("alpha".into(), alpha),
        Column::new("beta".into(), beta),
        Column::new("repetition".into(), repetition),
        Column::new("converged".into(), converged),
        Column::new("periods".into(), periods),
        Column::new("state_1".into(), state_1),
        Column::new("state_2".into(), state_2),
        Column::new("price_1".into(), price_1),
        Column::new("price_2".into(), price_2),
        Column::new("profit_1".into(), profit_1),
        Column::new("profit_2".into(), profit_2),
        Column::new("mean_profit_1".into(), mean_profit_1),
        Column::new("mean_profit_2".into(), mean_profit_2),
    ])
}

/// Every exported frame, keyed by file stem.
pub fn results_frames(results: &SweepResults) -> Result<BTreeMap<String, DataFrame>> {
    let mut frames = BTreeMap::new();
    for metric in Metric::ALL {
        frames.insert(metric.name().to_string(), metric_frame(results, metric)?);
    }
    frames.insert(
        "alphas".to_string(),
        DataFrame::new(vec![Column::new("alpha".into(), &results.alphas)])?,
    );
    frames.insert(
        "betas".to_string(),
        DataFrame::new(vec![Column::new("beta".into(), &results.betas)])?,
    );
    frames.insert("cells".to_string(), cells_frame(results)?);
    frames.insert("runs".to_string(), runs_frame(results)?);
    Ok(frames)
}

#[derive(Debug, Serialize)]
struct Summary<'a> {
    benchmarks: &'a Benchmarks,
    alphas: &'a [f64],
    betas: &'a [f64],
    cells: usize,
    converged_cells: usize,
}

/// Write every frame as `{dir}/{name}.csv` plus `{dir}/summary.json`.
/// Returns the written paths.
pub fn export_results(results: &SweepResults, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .map_err(|e| Error::io(format!("create {}", dir.display()), e))?;

    let mut written = Vec::new();
    for (name, mut df) in results_frames(results)? {
        let path = dir.join(format!("{name}.csv"));
        let file = File::create(&path)
            .map_err(|e| Error::io(format!("create {}", path.display()), e))?;
        CsvWriter::new(BufWriter::new(file))
            .include_header(true)
            .finish(&mut df)?;
        written.push(path);
    }

    let summary = Summary {
        benchmarks: &results.benchmarks,
        alphas: &results.alphas,
        betas: &results.betas,
        cells: results.cells.len(),
        converged_cells: results.cells.iter().filter(|c| c.converged).count(),
    };
    let path = dir.join("summary.json");
    let file =
        File::create(&path).map_err(|e| Error::io(format!("create {}", path.display()), e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &summary)?;
    written.push(path);

    tracing::info!(files = written.len(), dir = %dir.display(), "exported results");
    Ok(written)
}
