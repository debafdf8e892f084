//! Sequential model-based minimization with an ask/tell interface.

use std::sync::Arc;

use argmin::core::{CostFunction, Error as ArgminError, Executor, State};
use argmin::solver::neldermead::NelderMead;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::gp::{GaussianProcess, expected_improvement};
use crate::config::{Dimension, OptimizerConfig};
use crate::error::{Error, Result};

/// Observation noise added to the standardized targets.
const NOISE: f64 = 1e-6;
/// Spread of the local candidates drawn around the incumbent.
const LOCAL_SPREAD: f64 = 0.05;
const SIMPLEX_STEP: f64 = 0.05;

/// One scored point in physical units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub point: Vec<f64>,
    pub value: f64,
}

/// Settings of the acquisition search.
#[derive(Debug, Clone, Copy)]
pub struct AcquisitionSettings {
    pub samples: usize,
    pub refine_starts: usize,
    pub refine_iters: u64,
    pub xi: f64,
}

impl From<&OptimizerConfig> for AcquisitionSettings {
    fn from(cfg: &OptimizerConfig) -> Self {
        Self {
            samples: cfg.acquisition_samples.max(1),
            refine_starts: cfg.refine_starts,
            refine_iters: cfg.refine_iters,
            xi: cfg.xi,
        }
    }
}

/// Gaussian-process Bayesian optimizer over a box.
///
/// Proposals come from, in order: the configured start point, uniform
/// random draws until the initial budget is spent, then the maximizer of
/// Expected Improvement on a surrogate fitted to every observation.
pub struct BayesOptimizer {
    space: Vec<Dimension>,
    pending: Vec<Vec<f64>>,
    random_remaining: usize,
    settings: AcquisitionSettings,
    rng: StdRng,
    observations: Vec<Observation>,
}

impl BayesOptimizer {
    pub fn new(space: Vec<Dimension>, n_initial_points: usize, seed: u64) -> Self {
        Self {
            space,
            pending: Vec::new(),
            random_remaining: n_initial_points,
            settings: AcquisitionSettings {
                samples: 2000,
                refine_starts: 5,
                refine_iters: 200,
                xi: 0.01,
            },
            rng: StdRng::seed_from_u64(seed),
            observations: Vec::new(),
        }
    }

    pub fn from_config(cfg: &OptimizerConfig) -> Self {
        let mut optimizer = Self::new(cfg.space.clone(), cfg.n_initial_points, cfg.seed)
            .with_settings(AcquisitionSettings::from(cfg));
        if !cfg.x0.is_empty() {
            optimizer = optimizer.with_start(cfg.x0.clone());
        }
        optimizer
    }

    /// Evaluate `x0` before any random point.
    pub fn with_start(mut self, x0: Vec<f64>) -> Self {
        self.pending.push(x0);
        self
    }

    pub fn with_settings(mut self, settings: AcquisitionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Seed with earlier observations and draw `random_points` fresh
    /// random proposals before trusting the surrogate again.
    pub fn resume(&mut self, observations: Vec<Observation>, random_points: usize) {
        self.pending.clear();
        self.observations.extend(observations);
        self.random_remaining = random_points;
    }

    pub fn space(&self) -> &[Dimension] {
        &self.space
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn best(&self) -> Option<&Observation> {
        self.observations
            .iter()
            .filter(|o| !o.value.is_nan())
            .min_by(|a, b| a.value.total_cmp(&b.value))
    }

    /// Next point to evaluate, in physical units.
    pub fn ask(&mut self) -> Result<Vec<f64>> {
        if let Some(x0) = self.pending.pop() {
            return Ok(x0);
        }
        if self.random_remaining > 0 || self.observations.len() < 2 {
            self.random_remaining = self.random_remaining.saturating_sub(1);
            let unit = self.random_unit();
            return Ok(self.to_physical(&unit));
        }

        let unit = self.maximize_acquisition()?;
        Ok(self.to_physical(&unit))
    }

    pub fn tell(&mut self, point: Vec<f64>, value: f64) {
        self.observations.push(Observation { point, value });
    }

    // ===== SURROGATE =====

    fn to_unit(&self, point: &[f64]) -> Vec<f64> {
        self.space
            .iter()
            .zip(point)
            .map(|(d, &v)| ((v - d.low) / (d.high - d.low)).clamp(0.0, 1.0))
            .collect()
    }

    fn to_physical(&self, unit: &[f64]) -> Vec<f64> {
        self.space
            .iter()
            .zip(unit)
            .map(|(d, &u)| d.low + u.clamp(0.0, 1.0) * (d.high - d.low))
            .collect()
    }

    fn random_unit(&mut self) -> Vec<f64> {
        (0..self.space.len()).map(|_| self.rng.gen_range(0.0..1.0)).collect()
    }

    /// Log-compress then standardize, so penalty values do not flatten
    /// the surrogate.
    fn transformed_targets(&self) -> Vec<f64> {
        let compressed: Vec<f64> = self
            .observations
            .iter()
            .map(|o| o.value.signum() * o.value.abs().ln_1p())
            .collect();
        let n = compressed.len() as f64;
        let mean = compressed.iter().sum::<f64>() / n;
        let var = compressed.iter().map(|y| (y - mean) * (y - mean)).sum::<f64>() / n;
        let std = if var > 1e-24 { var.sqrt() } else { 1.0 };
        compressed.iter().map(|y| (y - mean) / std).collect()
    }

    fn maximize_acquisition(&mut self) -> Result<Vec<f64>> {
        let x: Vec<Vec<f64>> = self.observations.iter().map(|o| self.to_unit(&o.point)).collect();
        let y = self.transformed_targets();
        let gp = Arc::new(GaussianProcess::fit(&x, &y, NOISE)?);
        let best_y = y.iter().copied().fold(f64::INFINITY, f64::min);
        let incumbent = y
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| x[i].clone())
            .unwrap_or_else(|| vec![0.5; self.space.len()]);

        let mut candidates: Vec<Vec<f64>> =
            (0..self.settings.samples).map(|_| self.random_unit()).collect();
        for _ in 0..self.settings.samples / 4 {
            let local = incumbent
                .iter()
                .map(|&u| {
                    let step: f64 = self.rng.sample(StandardNormal);
                    (u + LOCAL_SPREAD * step).clamp(0.0, 1.0)
                })
                .collect();
            candidates.push(local);
        }

        let xi = self.settings.xi;
        let mut scored: Vec<(f64, Vec<f64>)> = candidates
            .into_par_iter()
            .map(|c| {
                let (mean, std) = gp.predict(&c);
                (expected_improvement(mean, std, best_y, xi), c)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(self.settings.refine_starts.max(1));

        let iters = self.settings.refine_iters;
        let refined: Vec<(f64, Vec<f64>)> = scored
            .par_iter()
            .map(|(ei, start)| {
                let cost = AcquisitionCost {
                    gp: Arc::clone(&gp),
                    best: best_y,
                    xi,
                };
                refine(&cost, start, iters).unwrap_or_else(|e| {
                    debug!("acquisition refinement failed: {}", e);
                    (*ei, start.clone())
                })
            })
            .collect();

        let (ei, point) = refined
            .into_iter()
            .chain(scored)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .ok_or_else(|| Error::Optimizer("no acquisition candidates".into()))?;

        if x.iter().any(|seen| distance(seen, &point) < 1e-9) {
            debug!("acquisition optimum already sampled; drawing a random point");
            return Ok(self.random_unit());
        }
        debug!(
            "EI {:.3e} at {:?} (length scale {})",
            ei,
            point,
            gp.length_scale()
        );
        Ok(point)
    }
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
}

/// Negative Expected Improvement, with a quadratic wall outside the cube.
#[derive(Clone)]
struct AcquisitionCost {
    gp: Arc<GaussianProcess>,
    best: f64,
    xi: f64,
}

impl AcquisitionCost {
    fn expected_improvement(&self, unit: &[f64]) -> f64 {
        let (mean, std) = self.gp.predict(unit);
        expected_improvement(mean, std, self.best, self.xi)
    }
}

impl CostFunction for AcquisitionCost {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> std::result::Result<Self::Output, ArgminError> {
        let clamped: Vec<f64> = p.iter().map(|u| u.clamp(0.0, 1.0)).collect();
        let outside: f64 = p.iter().zip(&clamped).map(|(a, b)| (a - b) * (a - b)).sum();
        Ok(-self.expected_improvement(&clamped) + 1e3 * outside)
    }
}

/// Nelder-Mead from `start`; returns the improvement and the clamped point.
fn refine(cost: &AcquisitionCost, start: &[f64], iters: u64) -> Result<(f64, Vec<f64>)> {
    let mut simplex = vec![start.to_vec()];
    for i in 0..start.len() {
        let mut vertex = start.to_vec();
        vertex[i] += if vertex[i] + SIMPLEX_STEP <= 1.0 {
            SIMPLEX_STEP
        } else {
            -SIMPLEX_STEP
        };
        simplex.push(vertex);
    }

    let solver = NelderMead::new(simplex)
        .with_sd_tolerance(1e-10)
        .map_err(|e| Error::Optimizer(e.to_string()))?;
    let res = Executor::new(cost.clone(), solver)
        .configure(|state| state.max_iters(iters))
        .run()
        .map_err(|e| Error::Optimizer(e.to_string()))?;

    let best = res
        .state()
        .get_best_param()
        .ok_or_else(|| Error::Optimizer("refinement produced no point".into()))?;
    let point: Vec<f64> = best.iter().map(|u| u.clamp(0.0, 1.0)).collect();
    Ok((cost.expected_improvement(&point), point))
}
