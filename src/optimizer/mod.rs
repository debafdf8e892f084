//! Bayesian search over the amplifier design space.

mod bayes;
mod checkpoint;
mod gp;
mod problem;

pub use bayes::{AcquisitionSettings, BayesOptimizer, Observation};
pub use checkpoint::{AuditLog, Checkpoint};
pub use gp::{GaussianProcess, expected_improvement};
pub use problem::{AmplifierObjective, Objective, penalize, score};

use std::path::PathBuf;

use log::info;

use crate::config::{Context, OptimizerConfig};
use crate::error::{Error, Result};

/// Outcome of one search.
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub names: Vec<String>,
    pub best: Observation,
    /// Evaluations performed by this run.
    pub evaluations: usize,
    /// Observations including any resumed from a checkpoint.
    pub total_observations: usize,
}

/// Ask/evaluate/tell loop with an audit line and a checkpoint per call.
pub struct OptimizerLoop<O: Objective> {
    objective: O,
    config: OptimizerConfig,
    checkpoint_path: PathBuf,
    audit: AuditLog,
}

impl<O: Objective> OptimizerLoop<O> {
    pub fn new(
        objective: O,
        config: OptimizerConfig,
        checkpoint_path: impl Into<PathBuf>,
        audit_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            objective,
            config,
            checkpoint_path: checkpoint_path.into(),
            audit: AuditLog::new(audit_path),
        }
    }

    pub fn from_context(objective: O, ctx: &Context) -> Self {
        Self::new(
            objective,
            ctx.config.optimizer.clone(),
            ctx.checkpoint_path(),
            ctx.audit_log_path(),
        )
    }

    pub fn objective(&self) -> &O {
        &self.objective
    }

    pub fn run(&self, resume: bool) -> Result<OptimizationOutcome> {
        let cfg = &self.config;
        let names = self.objective.names();
        let mut optimizer = BayesOptimizer::from_config(cfg);

        let mut checkpoint = if resume {
            let checkpoint = Checkpoint::load(&self.checkpoint_path)?;
            checkpoint.check_names(&names)?;
            info!(
                "Resuming from {} with {} observations",
                self.checkpoint_path.display(),
                checkpoint.observations.len()
            );
            optimizer.resume(checkpoint.observations.clone(), cfg.resume_initial_points);
            checkpoint
        } else {
            Checkpoint::new(names.clone())
        };

        info!(
            "Optimizing {} over {} calls ({} random starts)",
            names.join(", "),
            cfg.n_calls,
            if resume { cfg.resume_initial_points } else { cfg.n_initial_points }
        );

        for call in 1..=cfg.n_calls {
            let point = optimizer.ask()?;
            let value = match self.objective.evaluate(&point) {
                Err(Error::Cancelled(mode)) => return Err(Error::Cancelled(mode)),
                result => penalize(result, cfg.penalty),
            };

            self.audit.append(&point, value)?;
            optimizer.tell(point.clone(), value);
            checkpoint.observations.push(Observation { point, value });
            checkpoint.save(&self.checkpoint_path)?;

            let best = optimizer.best().map_or(value, |o| o.value);
            info!("[{}/{}] {:.6e} (best {:.6e})", call, cfg.n_calls, value, best);
        }

        let best = optimizer
            .best()
            .cloned()
            .ok_or_else(|| Error::Optimizer("no observations".into()))?;
        for (name, value) in names.iter().zip(&best.point) {
            info!("  {} = {:e}", name, value);
        }

        Ok(OptimizationOutcome {
            names,
            best,
            evaluations: cfg.n_calls,
            total_observations: checkpoint.observations.len(),
        })
    }
}
