use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::units::format_spice;

// ===== ENUMS =====

/// Feedback network attached to the open-loop AC testbench.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadCondition {
    Unloaded,
    Loaded,
}

impl LoadCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
        }
    }
}

/// One simulator analysis of the characterization flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnalysisMode {
    OperatingPoint,
    Transient,
    AcClosed,
    AcOpen(LoadCondition),
    Noise,
    /// Transient probe circuit carrying its own `.meas` statements.
    Measure,
}

impl AnalysisMode {
    /// Fixed evaluation order of the full pipeline.
    pub const PIPELINE: [AnalysisMode; 6] = [
        Self::OperatingPoint,
        Self::Transient,
        Self::AcClosed,
        Self::AcOpen(LoadCondition::Unloaded),
        Self::AcOpen(LoadCondition::Loaded),
        Self::Noise,
    ];

    /// Suffix used in run and artifact file names.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::OperatingPoint => "op",
            Self::Transient => "tran",
            Self::AcClosed => "ac",
            Self::AcOpen(LoadCondition::Unloaded) => "unloaded_ac",
            Self::AcOpen(LoadCondition::Loaded) => "loaded_ac",
            Self::Noise => "noise",
            Self::Measure => "meas",
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatingPoint => write!(f, "operating point"),
            Self::Transient => write!(f, "transient"),
            Self::AcClosed => write!(f, "AC closed loop"),
            Self::AcOpen(load) => write!(f, "AC open loop ({})", load.as_str()),
            Self::Noise => write!(f, "noise"),
            Self::Measure => write!(f, "measurement transient"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    Ohm,
    Ampere,
    Farad,
    Dimensionless,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Ohm => "Ohm",
            Self::Ampere => "A",
            Self::Farad => "F",
            Self::Dimensionless => "",
        }
    }

    /// Multiplier into the unit shown in reports (uA, pF).
    pub fn display_scale(self) -> f64 {
        match self {
            Self::Ampere => 1e6,
            Self::Farad => 1e12,
            Self::Ohm | Self::Dimensionless => 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetMode {
    Min,
    Max,
    Target,
}

// ===== CORE DATA TYPES =====

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    pub min_val: f64,
    pub max_val: f64,
    pub unit: Unit,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: f64, min_val: f64, max_val: f64, unit: Unit) -> Self {
        Self {
            name: name.into(),
            value,
            min_val,
            max_val,
            unit,
        }
    }

    pub fn is_within_bounds(&self) -> bool {
        self.value >= self.min_val && self.value <= self.max_val
    }

    fn check_bounds(&self) -> Result<()> {
        if self.is_within_bounds() {
            Ok(())
        } else {
            Err(Error::ParameterOutOfBounds {
                name: self.name.clone(),
                value: self.value,
                min: self.min_val,
                max: self.max_val,
            })
        }
    }
}

/// Fixed-order set of circuit design variables for one evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterVector {
    params: Vec<Parameter>,
}

impl ParameterVector {
    /// Names of the amplifier design variables, in netlist order.
    pub const NAMES: [&'static str; 8] = ["Rbn", "Rbp", "Sa", "Rmp", "R34", "Ibmain", "Cin", "Sa_b"];

    pub fn new(params: Vec<Parameter>) -> Result<Self> {
        for param in &params {
            param.check_bounds()?;
        }
        Ok(Self { params })
    }

    /// Amplifier vector with physical bounds for each variable.
    #[allow(clippy::too_many_arguments)]
    pub fn amplifier(
        rbn: f64,
        rbp: f64,
        sa: f64,
        rmp: f64,
        r34: f64,
        ibmain: f64,
        cin: f64,
        sa_b: f64,
    ) -> Result<Self> {
        Self::new(vec![
            Parameter::new("Rbn", rbn, 1e-3, 1e3, Unit::Ohm),
            Parameter::new("Rbp", rbp, 1e-3, 1e3, Unit::Ohm),
            Parameter::new("Sa", sa, 1e-3, 1e4, Unit::Dimensionless),
            Parameter::new("Rmp", rmp, 1e-3, 1e3, Unit::Ohm),
            Parameter::new("R34", r34, 1e-3, 1e3, Unit::Ohm),
            Parameter::new("Ibmain", ibmain, 1e-9, 1e-1, Unit::Ampere),
            Parameter::new("Cin", cin, 1e-15, 1e-6, Unit::Farad),
            Parameter::new("Sa_b", sa_b, 1e-3, 1e4, Unit::Dimensionless),
        ])
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.value).collect()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.params.iter().find(|p| p.name == name).map(|p| p.value)
    }

    pub fn require(&self, name: &str) -> Result<f64> {
        self.get(name).ok_or_else(|| Error::UnknownParameter(name.to_string()))
    }

    /// Copy of this vector with some values replaced.
    pub fn with_values<'a, I>(&self, overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut params = self.params.clone();
        for (name, value) in overrides {
            let param = params
                .iter_mut()
                .find(|p| p.name == name)
                .ok_or_else(|| Error::UnknownParameter(name.to_string()))?;
            param.value = value;
        }
        Self::new(params)
    }

    /// Round every value to `decimals` places in its display unit.
    pub fn rounded(&self, decimals: i32) -> Result<Self> {
        let factor = 10f64.powi(decimals);
        let params = self
            .params
            .iter()
            .map(|p| {
                let scale = p.unit.display_scale();
                let mut p = p.clone();
                p.value = (p.value * scale * factor).round() / factor / scale;
                p
            })
            .collect();
        Self::new(params)
    }

    /// `.param` assignments for a netlist.
    pub fn to_spice_assignments(&self) -> Vec<String> {
        self.params
            .iter()
            .map(|p| format!("{}={}", p.name, format_spice(p.value)))
            .collect()
    }
}

impl fmt::Display for ParameterVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{}={}", p.name, format_spice(p.value)))
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

/// A scored requirement on one metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub metric: String,
    pub value: f64,
    pub weight: f64,
    pub mode: TargetMode,
    /// Multiplier applied to the deviation before weighting.
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl Target {
    pub fn new(metric: impl Into<String>, value: f64, weight: f64, mode: TargetMode, scale: f64) -> Self {
        Self {
            metric: metric.into(),
            value,
            weight,
            mode,
            scale,
        }
    }

    /// `Target` is a squared deviation; `Min`/`Max` are one-sided linear
    /// penalties on the magnitude.
    pub fn compute_cost(&self, achieved: f64) -> f64 {
        match self.mode {
            TargetMode::Min => self.weight * (achieved.abs() - self.value).max(0.0) * self.scale,
            TargetMode::Max => self.weight * (self.value - achieved).max(0.0) * self.scale,
            TargetMode::Target => {
                let error = (achieved - self.value) * self.scale;
                self.weight * error * error
            }
        }
    }
}

/// Named scalar results for one parameter vector.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    values: IndexMap<String, f64>,
}

impl MetricsRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn require(&self, name: &str) -> Result<f64> {
        self.get(name).ok_or_else(|| Error::MissingMetric(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn extend(&mut self, other: MetricsRecord) {
        self.values.extend(other.values);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_map(&self) -> &IndexMap<String, f64> {
        &self.values
    }
}
