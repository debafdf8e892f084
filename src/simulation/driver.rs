use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use super::netlist::{materialize, write_netlist};
use super::runner::{CancelToken, SimulationJob, SimulatorBackend, is_nonempty};
use crate::config::Context;
use crate::error::{Error, Result};
use crate::types::{AnalysisMode, ParameterVector};

/// Files belonging to one run of one analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifacts {
    pub mode: AnalysisMode,
    pub stem: String,
    pub netlist: PathBuf,
    pub raw: PathBuf,
    pub log: PathBuf,
}

impl Artifacts {
    fn job(&self) -> SimulationJob {
        SimulationJob {
            mode: self.mode,
            netlist: self.netlist.clone(),
            raw: self.raw.clone(),
            log: self.log.clone(),
        }
    }

    /// Outputs the mode's results are read from.
    pub fn expected(&self) -> Vec<&PathBuf> {
        match self.mode {
            AnalysisMode::OperatingPoint => vec![&self.raw, &self.log],
            AnalysisMode::Measure => vec![&self.log],
            _ => vec![&self.raw],
        }
    }

    /// Fail unless every expected output exists and is non-empty.
    pub fn verify(&self) -> Result<()> {
        for path in self.expected() {
            if !is_nonempty(path) {
                return Err(Error::MissingArtifact {
                    mode: self.mode,
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }

    /// Delete every file of this run (`<stem>.*`).
    pub fn remove(&self) -> Result<usize> {
        let dir = self.netlist.parent().map(PathBuf::from).unwrap_or_default();
        remove_stem(&dir, &self.stem)
    }
}

fn remove_stem(dir: &std::path::Path, stem: &str) -> Result<usize> {
    let pattern = format!(
        "{}/{}.*",
        glob::Pattern::escape(&dir.to_string_lossy()),
        glob::Pattern::escape(stem)
    );

    let entries = glob::glob(&pattern).map_err(|e| Error::Config(e.to_string()))?;
    let mut removed = 0;
    for entry in entries.flatten() {
        if entry.is_file() {
            fs::remove_file(&entry)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Materializes netlists and runs the simulator for one mode at a time.
#[derive(Clone)]
pub struct Driver {
    ctx: Arc<Context>,
    backend: Arc<dyn SimulatorBackend>,
    cancel: CancelToken,
}

impl Driver {
    pub fn new(ctx: Arc<Context>, backend: Arc<dyn SimulatorBackend>) -> Self {
        Self {
            ctx,
            backend,
            cancel: CancelToken::never(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn artifacts(&self, mode: AnalysisMode, stem: &str) -> Artifacts {
        let dir = &self.ctx.simulations_dir;
        Artifacts {
            mode,
            stem: stem.to_string(),
            netlist: dir.join(format!("{}.net", stem)),
            raw: dir.join(format!("{}.raw", stem)),
            log: dir.join(format!("{}.log", stem)),
        }
    }

    /// Artifacts of an earlier pipeline run, without simulating.
    pub fn existing(&self, mode: AnalysisMode) -> Result<Artifacts> {
        let artifacts = self.artifacts(mode, &self.ctx.pipeline_stem(mode));
        artifacts.verify()?;
        Ok(artifacts)
    }

    /// Simulate under the stable pipeline stem, e.g. `closed_loop_tran`.
    pub fn run(&self, mode: AnalysisMode, parameters: &ParameterVector) -> Result<Artifacts> {
        self.run_as(&self.ctx.pipeline_stem(mode), mode, parameters)
    }

    /// Simulate under a caller-chosen stem.
    pub fn run_as(
        &self,
        stem: &str,
        mode: AnalysisMode,
        parameters: &ParameterVector,
    ) -> Result<Artifacts> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled(mode));
        }
        fs::create_dir_all(&self.ctx.simulations_dir)?;
        let artifacts = self.artifacts(mode, stem);

        let stale = remove_stem(&self.ctx.simulations_dir, stem)?;
        if stale > 0 {
            debug!("removed {} stale files for {}", stale, stem);
        }

        let template = self.ctx.template_path(mode);
        let directives = self.ctx.config.analysis.directives(mode);
        let netlist = materialize(&template, parameters, directives)?;
        write_netlist(&artifacts.netlist, &netlist)?;

        info!("Simulating {} ({})", mode, stem);
        self.simulate_with_retry(&artifacts)?;
        artifacts.verify()?;
        Ok(artifacts)
    }

    fn simulate_with_retry(&self, artifacts: &Artifacts) -> Result<()> {
        let sim = &self.ctx.config.simulator;
        let job = artifacts.job();
        let mut attempt = 0;

        loop {
            match self.backend.simulate(&job, &self.cancel) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < sim.retries => {
                    let backoff = Duration::from_millis(sim.retry_backoff_ms.saturating_mul(1 << attempt.min(16)));
                    attempt += 1;
                    warn!(
                        "{}; retrying in {:?} (attempt {}/{})",
                        e, backoff, attempt, sim.retries
                    );
                    if self.cancel.wait(backoff) {
                        return Err(Error::Cancelled(artifacts.mode));
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
