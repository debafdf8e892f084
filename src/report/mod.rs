//! Report artifacts: tables, annotated schematics, trace exports and the
//! compiled document.

pub mod latex;
pub mod template;

pub use latex::{LatexBuild, archive_name, input_values_block};
pub use template::{PlaceholderStyle, numeric, render};

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use walkdir::WalkDir;

use crate::config::Context;
use crate::error::Result;
use crate::metrics::series::{magnitude_db, unwrapped_phase};
use crate::pipeline::Evaluation;
use crate::results::rawfile::{self, TraceData};
use crate::types::AnalysisMode;

const VOLTAGE_TEMPLATE: &str = "_voltage_template.svg";
const CURRENT_TEMPLATE: &str = "_current_template.svg";

/// Files produced by [`ReportAssembler::assemble`].
#[derive(Debug, Clone, Default)]
pub struct ReportOutputs {
    pub files: Vec<PathBuf>,
    pub pdf: Option<PathBuf>,
    pub archived: Option<PathBuf>,
}

pub struct ReportAssembler<'a> {
    ctx: &'a Context,
}

impl<'a> ReportAssembler<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    pub fn assemble(&self, evaluation: &Evaluation) -> Result<ReportOutputs> {
        self.ctx.ensure_dirs()?;
        let mut outputs = ReportOutputs::default();

        outputs.files.push(self.write_input_values(evaluation)?);
        outputs.files.extend(self.write_result_table(evaluation)?);
        outputs.files.extend(self.write_operating_point(evaluation)?);
        outputs.files.extend(self.annotate_schematics(evaluation)?);
        outputs.files.extend(self.write_traces(evaluation)?);
        outputs.files.push(self.write_metrics(evaluation)?);

        let report = &self.ctx.config.report;
        if report.compile {
            let build = LatexBuild {
                latex: &report.latex,
                ghostscript: &report.ghostscript,
            };
            outputs.pdf = build.compile(&self.ctx.root, &self.ctx.config.project.report_name)?;
        }

        if let Some(pdf) = &outputs.pdf {
            let archived = self.ctx.root.join(archive_name(&evaluation.parameters)?);
            fs::copy(pdf, &archived)?;
            info!("Report copied to {}", archived.display());
            outputs.archived = Some(archived);
        }

        Ok(outputs)
    }

    fn write_input_values(&self, evaluation: &Evaluation) -> Result<PathBuf> {
        let path = self.ctx.figures_dir.join("input_values.tex");
        fs::write(&path, input_values_block(&evaluation.parameters)?)?;
        Ok(path)
    }

    /// `{table}_template.tex` with `__name__` cells filled from the record.
    fn write_result_table(&self, evaluation: &Evaluation) -> Result<Option<PathBuf>> {
        let table = &self.ctx.config.report.table;
        let template = self.ctx.figures_dir.join(format!("{}_template.tex", table));
        if !template.exists() {
            warn!("no result table template at {}", template.display());
            return Ok(None);
        }

        let values = numeric(evaluation.record.iter(), 3, "");
        let text = render(&fs::read_to_string(&template)?, PlaceholderStyle::Delimited, &values);
        let path = self.ctx.figures_dir.join(format!("{}.tex", table));
        fs::write(&path, text)?;
        Ok(Some(path))
    }

    /// Full table as CSV plus the LaTeX table split after ten devices.
    fn write_operating_point(&self, evaluation: &Evaluation) -> Result<Vec<PathBuf>> {
        let circuit = &self.ctx.config.project.circuit;
        let dir = &self.ctx.processing_dir;
        let summary = evaluation.operating_point.summary();
        let split = summary.devices.len().min(10);

        let outputs = [
            (dir.join(format!("{}.csv", circuit)), summary.to_csv()),
            (dir.join(format!("{}_op1.tex", circuit)), summary.to_latex(0..split)),
            (
                dir.join(format!("{}_op2.tex", circuit)),
                summary.to_latex(split..summary.devices.len()),
            ),
        ];
        let mut paths = Vec::with_capacity(outputs.len());
        for (path, contents) in outputs {
            fs::write(&path, contents)?;
            paths.push(path);
        }
        Ok(paths)
    }

    /// Fill every `*_voltage_template.svg` and `*_current_template.svg` in
    /// the figures directory.
    fn annotate_schematics(&self, evaluation: &Evaluation) -> Result<Vec<PathBuf>> {
        let voltages = numeric(
            evaluation.node_voltages.iter().map(|(k, v)| (k.as_str(), *v)),
            2,
            "V",
        );
        let currents = numeric(
            evaluation.device_currents.iter().map(|(k, v)| (k.as_str(), *v)),
            1,
            "uA",
        );

        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.ctx.figures_dir)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let Some(file_name) = entry.file_name().to_str() else {
                continue;
            };
            let (base, style, values) = if let Some(base) = file_name.strip_suffix(VOLTAGE_TEMPLATE) {
                (format!("{}_voltage", base), PlaceholderStyle::Suffixed("_V"), &voltages)
            } else if let Some(base) = file_name.strip_suffix(CURRENT_TEMPLATE) {
                (format!("{}_current", base), PlaceholderStyle::Suffixed("_uA"), &currents)
            } else {
                continue;
            };

            let text = render(&fs::read_to_string(entry.path())?, style, values);
            let path = self.ctx.figures_dir.join(format!("{}.svg", base));
            fs::write(&path, text)?;
            paths.push(path);
        }

        let schematic = &self.ctx.config.project.schematic;
        if !paths.iter().any(|p| starts_with_name(p, schematic)) {
            warn!("no annotated schematic for {}", schematic);
        }
        Ok(paths)
    }

    /// One CSV per waveform analysis for external plotting.
    fn write_traces(&self, evaluation: &Evaluation) -> Result<Vec<PathBuf>> {
        let signals = &self.ctx.config.signals;
        let mut paths = Vec::new();

        for artifacts in &evaluation.artifacts {
            let names: Vec<&str> = match artifacts.mode {
                AnalysisMode::Transient => {
                    let mut names = vec![
                        signals.virtual_ground_minus.as_str(),
                        signals.virtual_ground_plus.as_str(),
                        signals.supply_current.as_str(),
                    ];
                    names.extend(signals.transient_exports.iter().map(String::as_str));
                    names
                }
                AnalysisMode::AcClosed => vec![signals.output.as_str()],
                AnalysisMode::AcOpen(_) => vec![signals.loop_gain.as_str(), signals.output.as_str()],
                AnalysisMode::Noise => vec![signals.output_noise.as_str()],
                AnalysisMode::OperatingPoint | AnalysisMode::Measure => continue,
            };

            let raw = rawfile::read(&artifacts.raw)?;
            let mut header = vec!["axis".to_string()];
            let mut columns: Vec<Vec<f64>> = Vec::new();
            let mut axis = Vec::new();

            for name in names {
                let Ok((x, data)) = raw.series(name) else {
                    warn!("{} has no trace {}", artifacts.raw.display(), name);
                    continue;
                };
                if axis.is_empty() {
                    axis = x;
                } else if x.len() != axis.len() {
                    warn!("{} length differs from the axis; skipped", name);
                    continue;
                }
                match data {
                    TraceData::Real(samples) => {
                        header.push(name.to_string());
                        columns.push(samples.clone());
                    }
                    TraceData::Complex(samples) => {
                        header.push(format!("{} dB", name));
                        columns.push(magnitude_db(samples));
                        header.push(format!("{} phase", name));
                        columns.push(unwrapped_phase(samples).iter().map(|p| p.to_degrees()).collect());
                    }
                }
            }
            if columns.is_empty() {
                continue;
            }

            let mut text = header.join(",");
            text.push('\n');
            for (i, x) in axis.iter().enumerate() {
                text.push_str(&x.to_string());
                for column in &columns {
                    text.push(',');
                    text.push_str(&column[i].to_string());
                }
                text.push('\n');
            }

            let path = self.ctx.processing_dir.join(format!("{}.csv", artifacts.stem));
            fs::write(&path, text)?;
            paths.push(path);
        }
        Ok(paths)
    }

    fn write_metrics(&self, evaluation: &Evaluation) -> Result<PathBuf> {
        let path = self
            .ctx
            .processing_dir
            .join(format!("{}_metrics.json", self.ctx.config.project.circuit));
        fs::write(&path, serde_json::to_string_pretty(evaluation.record.as_map())?)?;
        Ok(path)
    }
}

fn starts_with_name(path: &Path, name: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(name))
}
