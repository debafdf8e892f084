//! Synthetic amplifier project: netlist templates, simulator outputs with
//! known closed-form metrics, and stub simulator backends.

#![allow(dead_code)]

use std::f64::consts::PI;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use ampchar::config::{Context, parse_config_str};
use ampchar::simulation::{CancelToken, SimulationJob, SimulatorBackend};
use ampchar::{AnalysisMode, Error, LoadCondition, ParameterVector, Result};
use num_complex::Complex64;
use tempfile::TempDir;

/// Closed-loop settling time constant of the synthetic transient, us.
pub const TAU_US: f64 = 0.1;
/// Closed-loop pole of the synthetic AC response, Hz.
pub const CLOSED_LOOP_POLE: f64 = 10e6;
pub const SUPPLY_CURRENT: f64 = -572e-6;
/// Flat output noise density, V/sqrt(Hz).
pub const NOISE_DENSITY: f64 = 3e-8;
pub const NOISE_BAND: (f64, f64) = (1e3, 1e8);

pub const DOCUMENTED_KEYS: [&str; 20] = [
    "Cin", "Cfb", "Ccm", "Cload", "T_48dB", "T_40dB", "T_settle", "tau_cl_tran", "I", "P",
    "BW_cl", "tau_cl", "BW_ol", "PM", "GM", "BW_cl_fo", "SNR", "V_int", "FOM_lin", "FOM_dB",
];

pub struct Project {
    pub dir: TempDir,
    pub ctx: Arc<Context>,
}

pub fn reference() -> ParameterVector {
    ParameterVector::amplifier(4.8, 6.2, 2.5, 5.0, 3.0, 200e-6, 1e-8, 1.0).unwrap()
}

/// Temporary project tree with netlist and report templates.
pub fn project() -> Project {
    let dir = tempfile::tempdir().unwrap();
    let mut config = parse_config_str("").unwrap();
    config.project.root = dir.path().to_path_buf();
    config.report.compile = false;
    config.simulator.timeout_secs = 5.0;

    let ctx = Context::new(config).unwrap();
    ctx.ensure_dirs().unwrap();
    fs::create_dir_all(&ctx.circuits_dir).unwrap();

    let netlist = "* closed loop amplifier\n.param Ibmain=100u Cin=1p\nXamp vip vin vop von op_amp\nR1 vop 0 {R34}\n.tran 1n 5u\n.end\n";
    for mode in [
        AnalysisMode::OperatingPoint,
        AnalysisMode::AcOpen(LoadCondition::Unloaded),
        AnalysisMode::AcOpen(LoadCondition::Loaded),
        AnalysisMode::Measure,
    ] {
        fs::write(ctx.template_path(mode), netlist).unwrap();
    }

    fs::write(
        ctx.figures_dir.join("result_table_template.tex"),
        "BW & __BW_cl__ \\\\\nSNR & __SNR__ \\\\\nFOM & __FOM_dB__ \\\\\n",
    )
    .unwrap();
    fs::write(
        ctx.figures_dir.join("op_amp_voltage_template.svg"),
        "<svg><text>Vbp_V</text><text>Vi+_V</text><text>Vi-_V</text></svg>",
    )
    .unwrap();
    fs::write(
        ctx.figures_dir.join("op_amp_current_template.svg"),
        "<svg><text>n3_uA</text><text>p1_uA</text></svg>",
    )
    .unwrap();

    Project {
        dir,
        ctx: Arc::new(ctx),
    }
}

// ===== RAW FILES =====

pub enum Column {
    Real(Vec<f64>),
    Complex(Vec<Complex64>),
}

pub fn write_raw(path: &Path, plotname: &str, axis_name: &str, axis: &[f64], traces: &[(&str, Column)]) {
    let complex = traces.iter().any(|(_, c)| matches!(c, Column::Complex(_)));
    let mut text = String::new();
    writeln!(text, "Title: synthetic").unwrap();
    writeln!(text, "Date: Thu Jan  1 00:00:00 2026").unwrap();
    writeln!(text, "Plotname: {}", plotname).unwrap();
    writeln!(text, "Flags: {}", if complex { "complex" } else { "real" }).unwrap();
    writeln!(text, "No. Variables: {}", traces.len() + 1).unwrap();
    writeln!(text, "No. Points: {}", axis.len()).unwrap();
    writeln!(text, "Variables:").unwrap();
    writeln!(text, "\t0\t{}\t{}", axis_name, axis_name).unwrap();
    for (i, (name, _)) in traces.iter().enumerate() {
        writeln!(text, "\t{}\t{}\tvoltage", i + 1, name).unwrap();
    }
    writeln!(text, "Values:").unwrap();

    let value = |re: f64, im: f64| {
        if complex {
            format!("{:e},{:e}", re, im)
        } else {
            format!("{:e}", re)
        }
    };
    for (i, x) in axis.iter().enumerate() {
        writeln!(text, "{}\t{}", i, value(*x, 0.0)).unwrap();
        for (_, column) in traces {
            let v = match column {
                Column::Real(v) => value(v[i], 0.0),
                Column::Complex(v) => value(v[i].re, v[i].im),
            };
            writeln!(text, "\t{}", v).unwrap();
        }
        writeln!(text).unwrap();
    }
    fs::write(path, text).unwrap();
}

pub fn log_sweep(start: f64, stop: f64, per_decade: usize) -> Vec<f64> {
    let n = ((stop / start).log10() * per_decade as f64).round() as usize;
    (0..=n)
        .map(|i| start * 10f64.powf(i as f64 / per_decade as f64))
        .collect()
}

const OP_LOG: &str = "Circuit: * closed loop amplifier

Semiconductor Device Operating Points:

                        --- BSIM3 MOSFETS ---
Name:       m:x1:n3     m:x1:n4     m:x1:p1
Model:        nmos        nmos        pmos
Id:       4.126e-05   4.126e-05  -8.252e-05
Vgs:      6.500e-01   6.500e-01  -7.000e-01
Vds:      9.000e-01   4.000e-01  -9.000e-01
Vth:      4.500e-01   4.500e-01  -5.000e-01

Date: Thu Jan  1 00:00:00 2026
Total elapsed time: 0.100 seconds.
";

/// Write the outputs `mode` would produce.
pub fn write_outputs(mode: AnalysisMode, raw: &Path, log: &Path) {
    match mode {
        AnalysisMode::OperatingPoint => {
            write_raw(
                raw,
                "Operating Point",
                "v(n003)",
                &[1.8],
                &[
                    ("V(x1:vbp)", Column::Real(vec![1.05])),
                    ("V(n005)", Column::Real(vec![0.9])),
                    ("V(n001)", Column::Real(vec![0.9])),
                ],
            );
            fs::write(log, OP_LOG).unwrap();
        }
        AnalysisMode::Transient => {
            let dt = TAU_US / 200.0;
            let n = ((1.0 + 20.0 * TAU_US) / dt) as usize;
            let t_us: Vec<f64> = (0..n).map(|i| i as f64 * dt).collect();
            let vm = vec![0.9; n];
            let vp: Vec<f64> = t_us
                .iter()
                .map(|&t| 0.9 + 1.2 * (-(t - 1.0).max(0.0) / TAU_US).exp())
                .collect();
            let time: Vec<f64> = t_us.iter().map(|t| t * 1e-6).collect();
            write_raw(
                raw,
                "Transient Analysis",
                "time",
                &time,
                &[
                    ("V(n001)", Column::Real(vm)),
                    ("V(n005)", Column::Real(vp)),
                    ("I(Vdd)", Column::Real(vec![SUPPLY_CURRENT; n])),
                ],
            );
        }
        AnalysisMode::AcClosed => {
            let f = log_sweep(1e3, 1e10, 50);
            let vo = f
                .iter()
                .map(|&f| Complex64::new(8.0, 0.0) / Complex64::new(1.0, f / CLOSED_LOOP_POLE))
                .collect();
            write_raw(raw, "AC Analysis", "frequency", &f, &[("V(Vo)", Column::Complex(vo))]);
        }
        AnalysisMode::AcOpen(_) => {
            let f = log_sweep(1.0, 1e11, 50);
            let vip: Vec<Complex64> = f
                .iter()
                .map(|&f| {
                    Complex64::new(1e3, 0.0)
                        / (Complex64::new(1.0, f / 1e4) * Complex64::new(1.0, f / 1e8))
                })
                .collect();
            let vo = vip.iter().map(|v| v * 2.0).collect();
            write_raw(
                raw,
                "AC Analysis",
                "frequency",
                &f,
                &[("V(Vinp)", Column::Complex(vip)), ("V(Vo)", Column::Complex(vo))],
            );
        }
        AnalysisMode::Noise => {
            let f = log_sweep(NOISE_BAND.0, NOISE_BAND.1, 50);
            let density = vec![NOISE_DENSITY; f.len()];
            write_raw(
                raw,
                "Noise Spectral Density Curves",
                "frequency",
                &f,
                &[("onoise_spectrum", Column::Real(density))],
            );
        }
        AnalysisMode::Measure => {
            fs::write(
                log,
                "Circuit: * ML\n\na0: MAX(v(vo))=1.62 FROM 0 TO 5e-06\na1=5.73e+01\ncurrent = -5.7e-04\n",
            )
            .unwrap();
        }
    }
}

/// Outputs of every pipeline stage under their stable stems.
pub fn populate_pipeline(project: &Project) {
    let ctx = &project.ctx;
    for mode in AnalysisMode::PIPELINE {
        let stem = ctx.pipeline_stem(mode);
        let dir = &ctx.simulations_dir;
        write_outputs(
            mode,
            &dir.join(format!("{}.raw", stem)),
            &dir.join(format!("{}.log", stem)),
        );
    }
}

// ===== BACKENDS =====

/// Writes synthetic outputs and records every job it ran.
#[derive(Default)]
pub struct SyntheticBackend {
    pub jobs: Mutex<Vec<SimulationJob>>,
}

impl SyntheticBackend {
    pub fn modes(&self) -> Vec<AnalysisMode> {
        self.jobs.lock().unwrap().iter().map(|j| j.mode).collect()
    }
}

impl SimulatorBackend for SyntheticBackend {
    fn simulate(&self, job: &SimulationJob, _cancel: &CancelToken) -> Result<()> {
        assert!(job.netlist.exists(), "netlist written before simulating");
        write_outputs(job.mode, &job.raw, &job.log);
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }
}

/// Always times out.
#[derive(Default)]
pub struct TimeoutBackend {
    pub calls: Mutex<usize>,
}

impl SimulatorBackend for TimeoutBackend {
    fn simulate(&self, job: &SimulationJob, _cancel: &CancelToken) -> Result<()> {
        *self.calls.lock().unwrap() += 1;
        Err(Error::SimulatorTimeout {
            mode: job.mode,
            timeout: std::time::Duration::from_secs(5),
        })
    }
}

/// Synthetic outputs for the first `allowed` jobs, then reports cancellation.
pub struct CancellingBackend {
    pub allowed: usize,
    pub calls: Mutex<usize>,
}

impl CancellingBackend {
    pub fn after(allowed: usize) -> Self {
        Self {
            allowed,
            calls: Mutex::new(0),
        }
    }
}

impl SimulatorBackend for CancellingBackend {
    fn simulate(&self, job: &SimulationJob, _cancel: &CancelToken) -> Result<()> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        if *calls > self.allowed {
            return Err(Error::Cancelled(job.mode));
        }
        write_outputs(job.mode, &job.raw, &job.log);
        Ok(())
    }
}

/// Expected SNR of the flat synthetic noise.
pub fn expected_snr() -> f64 {
    let rms = NOISE_DENSITY * (NOISE_BAND.1 - NOISE_BAND.0).sqrt();
    20.0 * (0.8485 / rms).log10()
}

pub fn expected_tau_cl() -> f64 {
    1e6 / (2.0 * PI * CLOSED_LOOP_POLE)
}
