//! TOML configuration and the resolved per-process [`Context`].
//!
//! Every field has a default reproducing the reference amplifier flow, so an
//! empty file is a valid configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{AnalysisMode, ParameterVector, Target, TargetMode};

// ===== CONFIG SECTIONS =====

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub simulator: SimulatorConfig,
    /// Values of the design variables, in base units.
    pub parameters: IndexMap<String, f64>,
    pub analysis: AnalysisConfig,
    pub signals: SignalConfig,
    pub settling: SettlingConfig,
    pub noise: NoiseConfig,
    pub power: PowerConfig,
    /// Report quantities computed from the design vector.
    pub derived: IndexMap<String, String>,
    pub optimizer: OptimizerConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub root: PathBuf,
    pub circuits_dir: PathBuf,
    pub simulations_dir: PathBuf,
    pub processing_dir: PathBuf,
    pub figures_dir: PathBuf,
    /// Base name of the closed-loop testbench.
    pub circuit: String,
    /// Testbench with `.meas` statements used to score candidates.
    pub measure_circuit: String,
    pub schematic: String,
    pub report_name: String,
    pub netlist_extension: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            circuits_dir: PathBuf::from("Circuits"),
            simulations_dir: PathBuf::from("Simulations"),
            processing_dir: PathBuf::from("Processing"),
            figures_dir: PathBuf::from("Figures"),
            circuit: "closed_loop".to_string(),
            measure_circuit: "ML".to_string(),
            schematic: "op_amp".to_string(),
            report_name: "report".to_string(),
            netlist_extension: "net".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub executable: String,
    /// Argument template; `{netlist}`, `{raw}` and `{log}` are substituted.
    pub args: Vec<String>,
    pub timeout_secs: f64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            executable: "ngspice".to_string(),
            args: ["-b", "-r", "{raw}", "-o", "{log}", "{netlist}"]
                .map(String::from)
                .to_vec(),
            timeout_secs: 60.0,
            retries: 0,
            retry_backoff_ms: 500,
        }
    }
}

impl SimulatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.0))
    }
}

/// Analysis directives appended to each mode's netlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub op: Vec<String>,
    pub tran: Vec<String>,
    pub ac: Vec<String>,
    pub noise: Vec<String>,
    /// Empty keeps the measurement testbench's own directives.
    pub meas: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            op: vec![".op".to_string()],
            tran: vec![
                ".tran 0 100u 0 0.005u".to_string(),
                ".save V(vop) V(n001) V(n005) V(von) V(n006) V(n002) I(vdd)".to_string(),
                ".options plotwinsize=0".to_string(),
            ],
            ac: vec![".ac dec 10 1 100G".to_string()],
            noise: vec![".noise V(Vo) Vi dec 100 10k 100G".to_string()],
            meas: Vec::new(),
        }
    }
}

impl AnalysisConfig {
    pub fn directives(&self, mode: AnalysisMode) -> &[String] {
        match mode {
            AnalysisMode::OperatingPoint => &self.op,
            AnalysisMode::Transient => &self.tran,
            AnalysisMode::AcClosed | AnalysisMode::AcOpen(_) => &self.ac,
            AnalysisMode::Noise => &self.noise,
            AnalysisMode::Measure => &self.meas,
        }
    }
}

/// Trace names as they appear in the waveform dumps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub virtual_ground_minus: String,
    pub virtual_ground_plus: String,
    pub supply_current: String,
    pub output: String,
    pub loop_gain: String,
    pub output_noise: String,
    /// Extra transient traces exported for plotting.
    pub transient_exports: Vec<String>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            virtual_ground_minus: "V(n001)".to_string(),
            virtual_ground_plus: "V(n005)".to_string(),
            supply_current: "I(vdd)".to_string(),
            output: "V(Vo)".to_string(),
            loop_gain: "V(Vinp)".to_string(),
            output_noise: "V(onoise)".to_string(),
            transient_exports: ["V(n006)", "V(n002)", "V(vop)", "V(von)"]
                .map(String::from)
                .to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlingConfig {
    /// Input step amplitude the accuracy is referred to (V).
    pub step: f64,
    pub epsilon: f64,
    /// One neper above the lower threshold.
    pub upper_threshold_db: f64,
    pub lower_threshold_db: f64,
    pub target_db: f64,
    /// Stimulus edge time (us).
    pub offset_us: f64,
}

impl Default for SettlingConfig {
    fn default() -> Self {
        Self {
            step: 1.2,
            epsilon: 1e-9,
            upper_threshold_db: 48.69,
            lower_threshold_db: 40.0,
            target_db: 57.0,
            offset_us: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Reference signal amplitude for the SNR (V).
    pub signal_amplitude: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            signal_amplitude: 0.8485,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub supply_voltage: f64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            supply_voltage: 1.8,
        }
    }
}

/// One searched dimension of the design space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub low: f64,
    pub high: f64,
}

impl Dimension {
    pub fn new(name: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            low,
            high,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub space: Vec<Dimension>,
    pub x0: Vec<f64>,
    pub targets: Vec<Target>,
    /// Measurements read from the measurement testbench log.
    pub measures: Vec<String>,
    pub n_calls: usize,
    pub n_initial_points: usize,
    pub resume_initial_points: usize,
    pub penalty: f64,
    pub seed: u64,
    pub acquisition_samples: usize,
    pub refine_starts: usize,
    pub refine_iters: u64,
    /// Exploration margin of Expected Improvement.
    pub xi: f64,
    pub checkpoint: PathBuf,
    pub audit_log: PathBuf,
    pub keep_artifacts: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            space: vec![
                Dimension::new("Ibmain", 565.25e-6, 575e-6),
                Dimension::new("R34", 90.0, 100.0),
                Dimension::new("Rmp", 0.5, 2.0),
                Dimension::new("Sa_b", 15.0, 19.0),
                Dimension::new("Sa", 0.8, 1.15),
                Dimension::new("Cin", 25e-12, 35e-12),
            ],
            x0: vec![572.25e-6, 95.0, 0.9, 17.0, 0.985, 32.18e-12],
            targets: vec![
                Target::new("a1", 57.3, 0.1, TargetMode::Target, 1e4),
                Target::new("current", 0.0, 10.0, TargetMode::Min, 1.0),
                Target::new("SNR", 83.65, 0.1, TargetMode::Target, 1e4),
            ],
            measures: ["a0", "a1", "current"].map(String::from).to_vec(),
            n_calls: 2000,
            n_initial_points: 20,
            resume_initial_points: 40,
            penalty: 1e30,
            seed: 0,
            acquisition_samples: 2000,
            refine_starts: 5,
            refine_iters: 200,
            xi: 0.01,
            checkpoint: PathBuf::from("result.json"),
            audit_log: PathBuf::from("optimization_log.csv"),
            keep_artifacts: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub compile: bool,
    pub latex: String,
    pub ghostscript: String,
    /// Result table template base name inside the figures directory.
    pub table: String,
    /// Schematic label to operating-point node.
    pub voltage_annotations: IndexMap<String, String>,
    /// Schematic label to device instance.
    pub current_annotations: IndexMap<String, String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        let voltage_annotations = [
            ("Vbp", "x1:vbp"),
            ("Vsp", "x1:vsp"),
            ("Vcp", "x1:vcp"),
            ("Vcn", "x1:vcn"),
            ("Vsn", "x1:vsn"),
            ("Vbn", "x1:vbn"),
            ("Vdd", "n003"),
            ("Vi+", "n005"),
            ("Vi-", "n001"),
            ("Vo-", "vop"),
            ("Vo+", "von"),
            ("Vgn2", "x1:vcn"),
            ("Vsi", "x1:vsi"),
            ("Vssi", "x1:vssi"),
            ("Vbcm", "x1:vbcm"),
            ("Vpml", "x1:vpml"),
            ("Vpmr", "x1:vpmr"),
            ("Vpg", "x1:vpg"),
            ("Vnml", "x1:vnml"),
            ("Vnmr", "x1:vnmr"),
        ];
        let current_annotations = ["n3", "n4", "p3", "p1", "n2", "n5", "n7"]
            .map(|d| (d.to_string(), format!("m:x1:{}", d)));

        Self {
            compile: true,
            latex: "pdflatex".to_string(),
            ghostscript: "gs".to_string(),
            table: "result_table".to_string(),
            voltage_annotations: voltage_annotations
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            current_annotations: current_annotations.into_iter().collect(),
        }
    }
}

fn default_derived() -> IndexMap<String, String> {
    [
        ("Cin", "Cin*1e12"),
        ("Cfb", "Cin/8*1e12"),
        ("Ccm", "Cin/8*1e12"),
        ("Cload", "Cin*1e12"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_parameters() -> IndexMap<String, f64> {
    ParameterVector::NAMES
        .iter()
        .zip([4.8, 6.2, 2.5, 5.0, 3.0, 200e-6, 1e-8, 1.0])
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

impl Config {
    /// Fill sections an input file left empty and check cross references.
    fn normalize(mut self) -> Result<Self> {
        if self.parameters.is_empty() {
            self.parameters = default_parameters();
        }
        if self.derived.is_empty() {
            self.derived = default_derived();
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        for name in self.parameters.keys() {
            if !ParameterVector::NAMES.contains(&name.as_str()) {
                return Err(Error::UnknownParameter(name.clone()));
            }
        }

        let opt = &self.optimizer;
        for dim in &opt.space {
            if !ParameterVector::NAMES.contains(&dim.name.as_str()) {
                return Err(Error::UnknownParameter(dim.name.clone()));
            }
            if dim.low >= dim.high || dim.low.is_nan() || dim.high.is_nan() {
                return Err(Error::Config(format!(
                    "dimension '{}' has empty range [{}, {}]",
                    dim.name, dim.low, dim.high
                )));
            }
        }
        if !opt.x0.is_empty() {
            if opt.x0.len() != opt.space.len() {
                return Err(Error::Config(format!(
                    "x0 has {} values for {} dimensions",
                    opt.x0.len(),
                    opt.space.len()
                )));
            }
            for (dim, &v) in opt.space.iter().zip(&opt.x0) {
                if !dim.contains(v) {
                    return Err(Error::ParameterOutOfBounds {
                        name: dim.name.clone(),
                        value: v,
                        min: dim.low,
                        max: dim.high,
                    });
                }
            }
        }
        if opt.n_initial_points == 0 {
            return Err(Error::Config("n_initial_points must be at least 1".into()));
        }
        if self.simulator.timeout_secs <= 0.0 {
            return Err(Error::Config("simulator timeout must be positive".into()));
        }
        Ok(())
    }
}

pub fn parse_config(path: impl AsRef<Path>) -> Result<Config> {
    let contents = fs::read_to_string(path)?;
    parse_config_str(&contents)
}

pub fn parse_config_str(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents)?;
    config.normalize()
}

// ===== CONTEXT =====

/// Configuration plus resolved directories, built once per process and
/// passed to every component.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: Config,
    pub root: PathBuf,
    pub circuits_dir: PathBuf,
    pub simulations_dir: PathBuf,
    pub processing_dir: PathBuf,
    pub figures_dir: PathBuf,
}

impl Context {
    /// Resolve the project directories against `config.project.root`.
    pub fn new(config: Config) -> Result<Self> {
        let config = config.normalize()?;
        let root = config.project.root.clone();
        let join = |dir: &Path| root.join(dir);

        Ok(Self {
            circuits_dir: join(&config.project.circuits_dir),
            simulations_dir: join(&config.project.simulations_dir),
            processing_dir: join(&config.project.processing_dir),
            figures_dir: join(&config.project.figures_dir),
            root,
            config,
        })
    }

    /// Load a config file; a relative project root is taken relative to
    /// the file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = parse_config(path)?;
        if config.project.root.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.project.root = base.join(&config.project.root);
        }
        Self::new(config)
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.simulations_dir,
            &self.processing_dir,
            &self.figures_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Name of the template circuit a mode simulates.
    pub fn circuit_name(&self, mode: AnalysisMode) -> String {
        let project = &self.config.project;
        match mode {
            AnalysisMode::AcOpen(load) => format!("{}_{}", project.circuit, load.as_str()),
            AnalysisMode::Measure => project.measure_circuit.clone(),
            _ => project.circuit.clone(),
        }
    }

    pub fn template_path(&self, mode: AnalysisMode) -> PathBuf {
        self.circuits_dir.join(format!(
            "{}.{}",
            self.circuit_name(mode),
            self.config.project.netlist_extension
        ))
    }

    /// Stable run stem for pipeline runs, e.g. `closed_loop_loaded_ac`.
    pub fn pipeline_stem(&self, mode: AnalysisMode) -> String {
        format!("{}_{}", self.config.project.circuit, mode.suffix())
    }

    /// Design vector from the `[parameters]` section.
    pub fn reference_parameters(&self) -> Result<ParameterVector> {
        let base = ParameterVector::amplifier(4.8, 6.2, 2.5, 5.0, 3.0, 200e-6, 1e-8, 1.0)?;
        base.with_values(self.config.parameters.iter().map(|(k, v)| (k.as_str(), *v)))
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.root.join(&self.config.optimizer.checkpoint)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.root.join(&self.config.optimizer.audit_log)
    }

    pub fn report_tex(&self) -> PathBuf {
        self.root.join(format!("{}.tex", self.config.project.report_name))
    }
}
