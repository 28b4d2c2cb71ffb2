//! Experiment configuration.
//!
//! Every struct carries the reference calibration as its `Default`, so a TOML
//! file only needs to name the values it changes:
//!
//! ```toml
//! [learning]
//! stability_threshold = 50_000
//!
//! [sweep]
//! alphas = [0.05, 0.1, 0.15]
//! betas = [4e-6, 1e-5]
//! seed = 7
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::grid::linspace;

// ============================================================================
// Market - Logit demand calibration
// ============================================================================

/// Parameters of the two-firm logit demand system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketParams {
    /// Product quality index `a_i` per firm.
    pub quality: [f64; 2],
    /// Marginal cost `c_i` per firm.
    pub cost: [f64; 2],
    /// Quality of the outside good (`a0`).
    pub outside_quality: f64,
    /// Logit scale (horizontal differentiation), must be positive.
    pub mu: f64,
}

impl Default for MarketParams {
    fn default() -> Self {
        Self {
            quality: [2.0, 2.0],
            cost: [1.0, 1.0],
            outside_quality: 0.0,
            mu: 0.25,
        }
    }
}

impl MarketParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.mu.is_finite() && self.mu > 0.0) {
            return Err(Error::invalid("mu", self.mu, "logit scale must be positive and finite"));
        }
        for (name, values) in [("quality", self.quality), ("cost", self.cost)] {
            if values.iter().any(|v| !v.is_finite()) {
                return Err(Error::invalid(name, format!("{values:?}"), "must be finite"));
            }
        }
        if !self.outside_quality.is_finite() {
            return Err(Error::invalid(
                "outside_quality",
                self.outside_quality,
                "must be finite",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Grid - Discretized action space
// ============================================================================

/// Price grid around the one-shot Nash and monopoly benchmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridParams {
    /// Symmetric one-shot Nash price (`pn`).
    pub nash_price: f64,
    /// Symmetric joint-profit maximizing price (`pm`).
    pub monopoly_price: f64,
    /// How far past each benchmark the grid extends, as a fraction of `pm - pn`.
    pub xi: f64,
    /// Number of grid points (`M`).
    pub size: usize,
}

impl Default for GridParams {
    fn default() -> Self {
        Self {
            nash_price: 1.47293,
            monopoly_price: 1.92498,
            xi: 0.1,
            size: 15,
        }
    }
}

impl GridParams {
    pub fn validate(&self) -> Result<()> {
        if self.size < 2 {
            return Err(Error::invalid("size", self.size, "grid needs at least two prices"));
        }
        if !(self.nash_price.is_finite() && self.monopoly_price.is_finite()) {
            return Err(Error::invalid(
                "nash_price",
                self.nash_price,
                "benchmark prices must be finite",
            ));
        }
        if self.monopoly_price <= self.nash_price {
            return Err(Error::invalid(
                "monopoly_price",
                self.monopoly_price,
                "must exceed the Nash price",
            ));
        }
        if !(self.xi.is_finite() && self.xi >= 0.0) {
            return Err(Error::invalid("xi", self.xi, "spread must be non-negative"));
        }
        Ok(())
    }
}

// ============================================================================
// Learning - Discounting and termination
// ============================================================================

/// When a period counts toward the stability counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityRule {
    /// The new joint state equals the previous one.
    #[default]
    SameState,
    /// The new joint state equals the previous one or the one two periods back,
    /// so a stable alternation between two joint states also counts.
    TwoCycle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningParams {
    /// Discount factor, in `[0, 1)`.
    pub delta: f64,
    /// Consecutive stable periods required to declare convergence.
    pub stability_threshold: u64,
    /// Hard cap on elapsed periods. `None` runs until convergence.
    pub max_periods: Option<u64>,
    pub stability_rule: StabilityRule,
    /// Emit a `period` data event every N periods (instrument feature).
    pub record_every: Option<u64>,
}

impl Default for LearningParams {
    fn default() -> Self {
        Self {
            delta: 0.95,
            stability_threshold: 100_000,
            max_periods: Some(10_000_000),
            stability_rule: StabilityRule::SameState,
            record_every: None,
        }
    }
}

impl LearningParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.delta) {
            return Err(Error::invalid("delta", self.delta, "discount factor must lie in [0, 1)"));
        }
        if self.stability_threshold == 0 {
            return Err(Error::invalid(
                "stability_threshold",
                self.stability_threshold,
                "must be at least one period",
            ));
        }
        if self.record_every == Some(0) {
            return Err(Error::invalid("record_every", 0, "sampling interval must be positive"));
        }
        Ok(())
    }
}

/// Validate a single learning-rate / exploration-decay pair.
pub fn validate_rates(alpha: f64, beta: f64) -> Result<()> {
    if !(alpha > 0.0 && alpha <= 1.0) {
        return Err(Error::invalid("alpha", alpha, "learning rate must lie in (0, 1]"));
    }
    if !(beta.is_finite() && beta >= 0.0) {
        return Err(Error::invalid("beta", beta, "exploration decay must be non-negative"));
    }
    Ok(())
}

// ============================================================================
// Sweep - The (alpha, beta) experiment grid
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Learning rates, one result row each.
    pub alphas: Vec<f64>,
    /// Exploration decay rates, one result column each.
    pub betas: Vec<f64>,
    /// Independent sessions per cell; cell metrics are their means.
    pub repetitions: usize,
    pub seed: u64,
    /// Size of a dedicated worker pool. `None` uses the global rayon pool.
    pub threads: Option<usize>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            alphas: linspace(0.025, 0.25, 10),
            betas: linspace(1e-6, 2e-5, 10),
            repetitions: 1,
            seed: 0,
            threads: None,
        }
    }
}

impl SweepConfig {
    pub fn validate(&self) -> Result<()> {
        if self.alphas.is_empty() {
            return Err(Error::invalid("alphas", "[]", "sweep needs at least one learning rate"));
        }
        if self.betas.is_empty() {
            return Err(Error::invalid("betas", "[]", "sweep needs at least one decay rate"));
        }
        for &alpha in &self.alphas {
            for &beta in &self.betas {
                validate_rates(alpha, beta)?;
            }
        }
        for (name, values) in [("alphas", &self.alphas), ("betas", &self.betas)] {
            if let Some(dup) = first_duplicate(values) {
                return Err(Error::invalid(name, dup, "sweep axis values must be distinct"));
            }
        }
        if self.repetitions == 0 {
            return Err(Error::invalid("repetitions", 0, "must run each cell at least once"));
        }
        if self.threads == Some(0) {
            return Err(Error::invalid("threads", 0, "worker pool cannot be empty"));
        }
        Ok(())
    }
}

fn first_duplicate(values: &[f64]) -> Option<f64> {
    values
        .iter()
        .enumerate()
        .find(|&(i, v)| values[..i].contains(v))
        .map(|(_, &v)| v)
}

// ============================================================================
// SimConfig - Top level
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub market: MarketParams,
    pub grid: GridParams,
    pub learning: LearningParams,
    pub sweep: SweepConfig,
}

impl SimConfig {
    /// Load a configuration from a TOML file. Missing sections keep defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("read config {}", path.display()), e))?;
        let config: SimConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.market.validate()?;
        self.grid.validate()?;
        self.learning.validate()?;
        self.sweep.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SimConfig::default().validate().unwrap();
    }

    #[test]
    fn default_sweep_axes() {
        let sweep = SweepConfig::default();
        assert_eq!(sweep.alphas.len(), 10);
        assert!((sweep.alphas[0] - 0.025).abs() < 1e-12);
        assert!((sweep.alphas[9] - 0.25).abs() < 1e-12);
        assert_eq!(sweep.betas.len(), 10);
        assert!((sweep.betas[9] - 2e-5).abs() < 1e-18);
    }

    #[test]
    fn rejects_bad_market() {
        let market = MarketParams {
            mu: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            market.validate(),
            Err(Error::InvalidParameter { name: "mu", .. })
        ));
    }

    #[test]
    fn rejects_bad_grid() {
        for grid in [
            GridParams {
                size: 0,
                ..Default::default()
            },
            GridParams {
                size: 1,
                ..Default::default()
            },
            GridParams {
                monopoly_price: 1.0,
                ..Default::default()
            },
            GridParams {
                xi: -0.1,
                ..Default::default()
            },
        ] {
            assert!(grid.validate().is_err(), "{grid:?} should be rejected");
        }
    }

    #[test]
    fn rejects_bad_delta() {
        for delta in [-0.1, 1.0, 1.5, f64::NAN] {
            let learning = LearningParams {
                delta,
                ..Default::default()
            };
            assert!(learning.validate().is_err(), "delta {delta} should be rejected");
        }
        let learning = LearningParams {
            delta: 0.0,
            ..Default::default()
        };
        assert!(learning.validate().is_ok());
    }

    #[test]
    fn rejects_bad_rates() {
        assert!(validate_rates(0.0, 1e-5).is_err());
        assert!(validate_rates(1.5, 1e-5).is_err());
        assert!(validate_rates(0.1, -1.0).is_err());
        assert!(validate_rates(1.0, 0.0).is_ok());
    }

    #[test]
    fn rejects_empty_sweep() {
        let sweep = SweepConfig {
            alphas: vec![],
            ..Default::default()
        };
        assert!(sweep.validate().is_err());
        let sweep = SweepConfig {
            repetitions: 0,
            ..Default::default()
        };
        assert!(sweep.validate().is_err());
        let sweep = SweepConfig {
            betas: vec![1e-5, 2e-5, 1e-5],
            ..Default::default()
        };
        assert!(matches!(
            sweep.validate(),
            Err(Error::InvalidParameter { name: "betas", .. })
        ));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: SimConfig = toml::from_str(
            r#"
            [grid]
            size = 3

            [learning]
            stability_rule = "two_cycle"
            max_periods = 1000

            [sweep]
            alphas = [0.1]
            betas = [1e-4]
            seed = 9
            "#,
        )
        .unwrap();
        assert_eq!(config.grid.size, 3);
        assert_eq!(config.grid.xi, 0.1);
        assert_eq!(config.learning.stability_rule, StabilityRule::TwoCycle);
        assert_eq!(config.learning.max_periods, Some(1000));
        assert_eq!(config.learning.delta, 0.95);
        assert_eq!(config.market, MarketParams::default());
        assert_eq!(config.sweep.seed, 9);
        assert_eq!(config.sweep.repetitions, 1);
    }

    #[test]
    fn from_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[learning]\ndelta = 1.0\n").unwrap();
        assert!(matches!(
            SimConfig::from_file(&path),
            Err(Error::InvalidParameter { name: "delta", .. })
        ));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(SimConfig::from_file(&missing), Err(Error::Io { .. })));
    }
}
