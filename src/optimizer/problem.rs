use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use crate::config::Dimension;
use crate::error::{Error, Result};
use crate::pipeline::noise_summary;
use crate::results::oplog::{parse_measurements, read_log};
use crate::simulation::Driver;
use crate::types::{AnalysisMode, MetricsRecord, ParameterVector, Target};

/// Scalar objective over a point of the search space.
pub trait Objective {
    /// Dimension names, in point order.
    fn names(&self) -> Vec<String>;

    /// Score one point; lower is better.
    fn evaluate(&self, point: &[f64]) -> Result<f64>;
}

/// Map a failed or non-finite evaluation to the fixed penalty.
pub fn penalize(result: Result<f64>, penalty: f64) -> f64 {
    match result {
        Ok(value) if value.is_finite() => value,
        Ok(value) => {
            warn!("objective returned {}; scoring {:e}", value, penalty);
            penalty
        }
        Err(e) => {
            warn!("candidate failed ({}); scoring {:e}", e, penalty);
            penalty
        }
    }
}

/// Weighted sum of target costs over a record.
pub fn score(targets: &[Target], record: &MetricsRecord) -> Result<f64> {
    let mut total = 0.0;
    for target in targets {
        total += target.compute_cost(record.require(&target.metric)?);
    }
    Ok(total)
}

static SESSIONS: AtomicUsize = AtomicUsize::new(0);

/// Stem prefix unique to one objective across processes and sessions.
fn session_tag() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let seq = SESSIONS.fetch_add(1, Ordering::SeqCst);
    format!("{:x}p{}s{}", secs, std::process::id(), seq)
}

/// Scores a candidate with the measurement testbench and a noise run only.
pub struct AmplifierObjective {
    driver: Driver,
    base: ParameterVector,
    space: Vec<Dimension>,
    targets: Vec<Target>,
    measures: Vec<String>,
    keep_artifacts: bool,
    tag: String,
    runs: AtomicUsize,
}

impl AmplifierObjective {
    pub fn new(driver: Driver) -> Result<Self> {
        let ctx = driver.context();
        let base = ctx.reference_parameters()?;
        let cfg = &ctx.config.optimizer;
        Ok(Self {
            base,
            space: cfg.space.clone(),
            targets: cfg.targets.clone(),
            measures: cfg.measures.clone(),
            keep_artifacts: cfg.keep_artifacts,
            tag: session_tag(),
            runs: AtomicUsize::new(0),
            driver,
        })
    }

    /// Prefix of this objective's candidate stems.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Reference vector with the searched dimensions replaced by `point`.
    pub fn parameters(&self, point: &[f64]) -> Result<ParameterVector> {
        if point.len() != self.space.len() {
            return Err(Error::Config(format!(
                "point has {} values for {} dimensions",
                point.len(),
                self.space.len()
            )));
        }
        self.base.with_values(
            self.space
                .iter()
                .zip(point)
                .map(|(d, &v)| (d.name.as_str(), v)),
        )
    }

    /// Run both testbenches for `point` and collect the measures plus `SNR`.
    pub fn measure(&self, point: &[f64]) -> Result<MetricsRecord> {
        let parameters = self.parameters(point)?;
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        let ctx = self.driver.context();
        let project = &ctx.config.project;

        let measure_stem = format!("{}_{}_c{:05}", project.measure_circuit, self.tag, run);
        let noise_stem = format!(
            "{}_{}_{}_c{:05}",
            project.circuit,
            AnalysisMode::Noise.suffix(),
            self.tag,
            run
        );

        let result = self.simulate(&parameters, &measure_stem, &noise_stem);

        if !self.keep_artifacts {
            for (mode, stem) in [
                (AnalysisMode::Measure, &measure_stem),
                (AnalysisMode::Noise, &noise_stem),
            ] {
                if let Err(e) = self.driver.artifacts(mode, stem).remove() {
                    debug!("could not remove {} artifacts: {}", stem, e);
                }
            }
        }
        result
    }

    fn simulate(
        &self,
        parameters: &ParameterVector,
        measure_stem: &str,
        noise_stem: &str,
    ) -> Result<MetricsRecord> {
        let ctx = self.driver.context();
        let mut record = MetricsRecord::new();

        let artifacts = self
            .driver
            .run_as(measure_stem, AnalysisMode::Measure, parameters)?;
        let measurements = parse_measurements(&read_log(&artifacts.log)?);
        for name in &self.measures {
            record.insert(name.clone(), measurements.require(name)?);
        }

        let artifacts = self.driver.run_as(noise_stem, AnalysisMode::Noise, parameters)?;
        record.extend(noise_summary(ctx, &artifacts)?.record());
        Ok(record)
    }
}

impl Objective for AmplifierObjective {
    fn names(&self) -> Vec<String> {
        self.space.iter().map(|d| d.name.clone()).collect()
    }

    fn evaluate(&self, point: &[f64]) -> Result<f64> {
        let record = self.measure(point)?;
        let value = score(&self.targets, &record)?;
        debug!(
            "{} -> {:.6e}",
            record
                .iter()
                .map(|(k, v)| format!("{}={:.6}", k, v))
                .collect::<Vec<_>>()
                .join(" "),
            value
        );
        Ok(value)
    }
}
