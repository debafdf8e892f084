//! Error types shared by every stage of the characterization flow.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::AnalysisMode;

/// Result type for characterization operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The simulator did not exit within the allotted window.
    #[error("simulator timed out after {timeout:?} running {mode}")]
    SimulatorTimeout { mode: AnalysisMode, timeout: Duration },

    /// The simulator exited with a failure status.
    #[error("simulator failed running {mode} ({status}): {stderr}")]
    SimulatorFailed {
        mode: AnalysisMode,
        status: String,
        stderr: String,
    },

    /// The simulator executable could not be started.
    #[error("simulator '{executable}' could not be started: {reason}")]
    SimulatorNotFound { executable: String, reason: String },

    /// The wait on an external process was cancelled.
    #[error("simulation of {0} was cancelled")]
    Cancelled(AnalysisMode),

    /// An expected output file is absent or empty.
    #[error("expected artifact missing for {mode}: {}", path.display())]
    MissingArtifact { mode: AnalysisMode, path: PathBuf },

    /// Simulator output did not have the expected structure.
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// A named trace is not present in a waveform dump.
    #[error("trace '{name}' not found in {}", path.display())]
    TraceNotFound { name: String, path: PathBuf },

    /// A metric needed downstream was never produced.
    #[error("metric '{0}' is missing")]
    MissingMetric(String),

    #[error("parameter '{name}' = {value} outside [{min}, {max}]")]
    ParameterOutOfBounds {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("expression error: {0}")]
    Expression(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// The surrogate model or acquisition search could not proceed.
    #[error("optimizer error: {0}")]
    Optimizer(String),

    /// A pipeline stage failed; carries enough context to reproduce it.
    #[error("evaluation failed during {mode} for [{parameters}]: {source}")]
    Evaluation {
        mode: AnalysisMode,
        parameters: String,
        #[source]
        source: Box<Error>,
    },

    /// A derived input quantity could not be computed; nothing was simulated.
    #[error("derived quantity {name} failed for [{parameters}]: {source}")]
    Derived {
        name: String,
        parameters: String,
        #[source]
        source: Box<Error>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True for failures a retry may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SimulatorTimeout { .. })
    }
}
