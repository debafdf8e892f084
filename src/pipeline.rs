//! Full characterization of one design vector across every analysis.

use indexmap::IndexMap;
use log::{info, warn};

use crate::config::Context;
use crate::error::{Error, Result};
use crate::expression::CompiledExpression;
use crate::metrics::{self, NoiseSummary};
use crate::results::oplog::{self, OperatingPointTable};
use crate::results::rawfile::{self, RawFile};
use crate::simulation::{Artifacts, Driver};
use crate::types::{AnalysisMode, LoadCondition, MetricsRecord, ParameterVector};

/// Everything one evaluation produced.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub parameters: ParameterVector,
    pub record: MetricsRecord,
    pub operating_point: OperatingPointTable,
    /// Schematic label to node voltage (V).
    pub node_voltages: IndexMap<String, f64>,
    /// Schematic label to drain current magnitude (uA).
    pub device_currents: IndexMap<String, f64>,
    pub artifacts: Vec<Artifacts>,
}

impl Evaluation {
    pub fn artifact(&self, mode: AnalysisMode) -> Option<&Artifacts> {
        self.artifacts.iter().find(|a| a.mode == mode)
    }
}

pub struct Pipeline {
    driver: Driver,
    derived: Vec<(String, CompiledExpression)>,
}

impl Pipeline {
    pub fn new(driver: Driver) -> Result<Self> {
        let names: Vec<String> = ParameterVector::NAMES.iter().map(|s| s.to_string()).collect();
        let derived = driver
            .context()
            .config
            .derived
            .iter()
            .map(|(name, expr)| Ok((name.clone(), CompiledExpression::new(expr, &names)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { driver, derived })
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    fn ctx(&self) -> &Context {
        self.driver.context()
    }

    /// Run (or, with `simulate = false`, re-read) every analysis in order.
    /// The first failing stage aborts the evaluation.
    pub fn evaluate(&self, parameters: &ParameterVector, simulate: bool) -> Result<Evaluation> {
        info!("Evaluating [{}] (simulate = {})", parameters, simulate);
        let context = |mode: AnalysisMode| {
            move |e: Error| Error::Evaluation {
                mode,
                parameters: parameters.to_string(),
                source: Box::new(e),
            }
        };

        let mut record = MetricsRecord::new();
        let mut all_artifacts = Vec::with_capacity(AnalysisMode::PIPELINE.len());

        let values = self.derived_inputs(parameters);
        for (name, expr) in &self.derived {
            let value = expr.evaluate(&values).map_err(|e| Error::Derived {
                name: name.clone(),
                parameters: parameters.to_string(),
                source: Box::new(e),
            })?;
            record.insert(name.clone(), value);
        }

        // Operating point
        let mode = AnalysisMode::OperatingPoint;
        info!("Operating point");
        let artifacts = self.artifacts(mode, parameters, simulate).map_err(context(mode))?;
        let (operating_point, node_voltages, device_currents) =
            self.operating_point(&artifacts).map_err(context(mode))?;
        all_artifacts.push(artifacts);

        // Transient
        let mode = AnalysisMode::Transient;
        info!("Transient");
        let artifacts = self.artifacts(mode, parameters, simulate).map_err(context(mode))?;
        record.extend(self.transient(&artifacts).map_err(context(mode))?);
        all_artifacts.push(artifacts);

        // AC closed loop
        let mode = AnalysisMode::AcClosed;
        info!("AC closed");
        let artifacts = self.artifacts(mode, parameters, simulate).map_err(context(mode))?;
        record.extend(self.ac_closed(&artifacts).map_err(context(mode))?);
        all_artifacts.push(artifacts);

        // AC open loop, both feedback loads
        info!("AC open");
        for load in [LoadCondition::Unloaded, LoadCondition::Loaded] {
            let mode = AnalysisMode::AcOpen(load);
            let artifacts = self.artifacts(mode, parameters, simulate).map_err(context(mode))?;
            record.extend(self.ac_open(&artifacts, load).map_err(context(mode))?);
            all_artifacts.push(artifacts);
        }

        // Noise, then the figure of merit built from every stage
        let mode = AnalysisMode::Noise;
        info!("Noise");
        let artifacts = self.artifacts(mode, parameters, simulate).map_err(context(mode))?;
        let noise = noise_summary(self.ctx(), &artifacts).map_err(context(mode))?;
        record.extend(noise.record());
        record.extend(self.figure_of_merit(&record).map_err(context(mode))?);
        all_artifacts.push(artifacts);

        for (name, value) in record.iter() {
            if !value.is_finite() {
                warn!("{} is not finite ({})", name, value);
            }
        }

        Ok(Evaluation {
            parameters: parameters.clone(),
            record,
            operating_point,
            node_voltages,
            device_currents,
            artifacts: all_artifacts,
        })
    }

    fn derived_inputs(&self, parameters: &ParameterVector) -> Vec<f64> {
        ParameterVector::NAMES
            .iter()
            .map(|n| parameters.get(n).unwrap_or(0.0))
            .collect()
    }

    fn artifacts(
        &self,
        mode: AnalysisMode,
        parameters: &ParameterVector,
        simulate: bool,
    ) -> Result<Artifacts> {
        if simulate {
            self.driver.run(mode, parameters)
        } else {
            self.driver.existing(mode)
        }
    }

    fn operating_point(
        &self,
        artifacts: &Artifacts,
    ) -> Result<(OperatingPointTable, IndexMap<String, f64>, IndexMap<String, f64>)> {
        let report = &self.ctx().config.report;

        let text = oplog::read_log(&artifacts.log)?;
        let table = oplog::parse_operating_points(&text).map_err(|e| match e {
            Error::Parse { message, .. } => Error::parse(&artifacts.log, message),
            other => other,
        })?;

        let raw = rawfile::read(&artifacts.raw)?;
        let mut voltages = IndexMap::new();
        for (label, node) in &report.voltage_annotations {
            match raw.real(&format!("V({})", node)) {
                Ok(samples) if !samples.is_empty() => {
                    voltages.insert(label.clone(), samples[0]);
                }
                _ => warn!("no operating point voltage for {} (node {})", label, node),
            }
        }

        let mut currents = IndexMap::new();
        for (label, device) in &report.current_annotations {
            match table.value(device, "Id:") {
                Some(id) => {
                    currents.insert(label.clone(), (id * 1e6).abs());
                }
                None => warn!("no drain current for {} (device {})", label, device),
            }
        }

        let unsaturated: Vec<String> = table
            .saturation()
            .into_iter()
            .filter(|c| !c.saturated)
            .map(|c| c.device)
            .collect();
        if !unsaturated.is_empty() {
            info!("Devices out of saturation: {}", unsaturated.join(", "));
        }

        Ok((table, voltages, currents))
    }

    fn transient(&self, artifacts: &Artifacts) -> Result<MetricsRecord> {
        let ctx = self.ctx();
        let signals = &ctx.config.signals;
        let raw = rawfile::read(&artifacts.raw)?;

        let (t, vm) = raw.series(&signals.virtual_ground_minus)?;
        let t_us: Vec<f64> = t.iter().map(|t| t * 1e6).collect();
        let vm = vm.real();
        let vp = raw.real(&signals.virtual_ground_plus)?;

        let settling = metrics::virtual_ground_settling(&t_us, &vp, &vm, &ctx.config.settling)?;
        let current = metrics::supply_current_ua(&raw.real(&signals.supply_current)?)?;

        let mut record = settling.record();
        record.insert("I", current);
        record.insert("P", metrics::power_uw(current, ctx.config.power.supply_voltage));
        Ok(record)
    }

    fn ac_closed(&self, artifacts: &Artifacts) -> Result<MetricsRecord> {
        let raw = rawfile::read(&artifacts.raw)?;
        let (f, vo) = raw.series(&self.ctx().config.signals.output)?;
        let bandwidth = metrics::closed_loop_bandwidth(&f, &vo.complex())?;
        info!("Closed-loop peak gain {:.2} dB", bandwidth.peak_db);
        Ok(bandwidth.record())
    }

    fn ac_open(&self, artifacts: &Artifacts, load: LoadCondition) -> Result<MetricsRecord> {
        let signals = &self.ctx().config.signals;
        let raw = rawfile::read(&artifacts.raw)?;
        let (f, vip) = raw.series(&signals.loop_gain)?;
        let vip = vip.complex();
        let margins = metrics::open_loop_margins(&f, &vip)?;
        info!(
            "{} loop: unity gain {:.3} MHz, PM {:.2} deg, GM {:.2} dB",
            load.as_str(),
            margins.unity_gain_hz * 1e-6,
            margins.phase_margin_deg(),
            margins.gain_margin_db
        );

        match load {
            LoadCondition::Unloaded => {
                let mut record = MetricsRecord::new();
                for (name, value) in margins.record().iter() {
                    record.insert(format!("{}_unloaded", name), value);
                }
                Ok(record)
            }
            LoadCondition::Loaded => {
                let vo = raw.complex(&signals.output)?;
                let closed = metrics::closed_loop_from_open(&vo, &vip)?;
                let rebuilt = metrics::closed_loop_bandwidth(&f, &closed)?;

                let mut record = margins.record();
                record.insert("BW_cl_fo", rebuilt.f_3db * 1e-6);
                Ok(record)
            }
        }
    }

    fn figure_of_merit(&self, record: &MetricsRecord) -> Result<MetricsRecord> {
        let fom = metrics::figure_of_merit(
            record.require("P")?,
            record.require("tau_cl_tran")?,
            record.require("SNR")?,
        );
        Ok(fom.record())
    }
}

/// Integrated output noise of a noise run.
pub fn noise_summary(ctx: &Context, artifacts: &Artifacts) -> Result<NoiseSummary> {
    let raw: RawFile = rawfile::read(&artifacts.raw)?;
    let (f, density) = raw.series(&ctx.config.signals.output_noise)?;
    metrics::integrate(&f, &density.real(), ctx.config.noise.signal_amplitude)
}
