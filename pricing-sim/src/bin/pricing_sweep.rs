//! Run an (alpha, beta) sweep and write the result tables.
//!
//! ```text
//! pricing-sweep --config sweep.toml --out results
//! pricing-sweep --alphas 0.05,0.15 --betas 1e-6,1e-5 --repetitions 4
//! RUST_LOG=pricing_sim=debug pricing-sweep --trace traces
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use pricing_sim::{SimConfig, export_results, run_sweep};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pricing-sweep")]
#[command(about = "Q-learning pricing duopoly: sweep learning and exploration rates")]
#[command(version)]
struct Args {
    /// TOML config file; defaults are used for anything it leaves out
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory for the result tables
    #[arg(long, default_value = "results")]
    out: PathBuf,

    /// Learning rates to sweep, comma separated
    #[arg(long, value_delimiter = ',')]
    alphas: Option<Vec<f64>>,

    /// Exploration decay rates to sweep, comma separated
    #[arg(long, value_delimiter = ',')]
    betas: Option<Vec<f64>>,

    #[arg(long)]
    seed: Option<u64>,

    /// Sessions per (alpha, beta) cell
    #[arg(long)]
    repetitions: Option<usize>,

    /// Worker threads (default: all cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Period cap per session
    #[arg(long)]
    max_periods: Option<u64>,

    /// Consecutive stable periods required to declare convergence
    #[arg(long)]
    stability_threshold: Option<u64>,

    /// Record one session of the first cell period by period into this directory
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Sampling interval for --trace, in periods
    #[arg(long, default_value = "1000")]
    record_every: u64,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<SimConfig> {
        let mut config = match &self.config {
            Some(path) => SimConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => SimConfig::default(),
        };

        if let Some(alphas) = &self.alphas {
            config.sweep.alphas = alphas.clone();
        }
        if let Some(betas) = &self.betas {
            config.sweep.betas = betas.clone();
        }
        if let Some(seed) = self.seed {
            config.sweep.seed = seed;
        }
        if let Some(repetitions) = self.repetitions {
            config.sweep.repetitions = repetitions;
        }
        if self.threads.is_some() {
            config.sweep.threads = self.threads;
        }
        if self.max_periods.is_some() {
            config.learning.max_periods = self.max_periods;
        }
        if let Some(threshold) = self.stability_threshold {
            config.learning.stability_threshold = threshold;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(feature = "instrument")]
fn trace_first_cell(config: &SimConfig, dir: PathBuf, record_every: u64) -> anyhow::Result<()> {
    use pricing_sim::instrument::{Format, ScopedRecorder};

    let mut config = config.clone();
    config.learning.record_every = Some(record_every);
    let (alpha, beta) = (config.sweep.alphas[0], config.sweep.betas[0]);
    let seed = pricing_sim::run_seed(config.sweep.seed, 0, 0, 0);

    tracing::info!(alpha, beta, seed, dir = %dir.display(), "tracing one session");
    let report = {
        let _recorder = ScopedRecorder::with_targets(&dir, Format::Csv, &["period", "run"]);
        pricing_sim::run_single(&config, alpha, beta, seed)?
    };
    tracing::info!(
        converged = report.outcome.converged(),
        periods = report.periods,
        price_1 = report.final_prices[0],
        price_2 = report.final_prices[1],
        "traced session finished"
    );
    Ok(())
}

#[cfg(not(feature = "instrument"))]
fn trace_first_cell(_config: &SimConfig, _dir: PathBuf, _record_every: u64) -> anyhow::Result<()> {
    anyhow::bail!("--trace requires the `instrument` feature")
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.load_config()?;

    if let Some(dir) = args.trace.clone() {
        anyhow::ensure!(args.record_every > 0, "--record-every must be positive");
        trace_first_cell(&config, dir, args.record_every)?;
    }

    let results = run_sweep(&config)?;
    let written = export_results(&results, &args.out)
        .with_context(|| format!("writing results to {}", args.out.display()))?;

    let summary = &results.benchmarks;
    tracing::info!(
        files = written.len(),
        nash_profit = summary.nash_profit,
        monopoly_profit = summary.monopoly_profit,
        "done"
    );
    Ok(())
}
