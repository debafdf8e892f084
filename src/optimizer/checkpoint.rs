//! Search state persisted between runs.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::bayes::Observation;
use crate::error::{Error, Result};

/// Every observation so far, keyed by dimension name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub names: Vec<String>,
    pub observations: Vec<Observation>,
}

impl Checkpoint {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names,
            observations: Vec::new(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write to a sibling temporary file, then rename over `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Refuse to resume a search over different dimensions.
    pub fn check_names(&self, names: &[String]) -> Result<()> {
        if self.names != names {
            return Err(Error::Config(format!(
                "checkpoint dimensions [{}] do not match the search space [{}]",
                self.names.join(", "),
                names.join(", ")
            )));
        }
        Ok(())
    }

    pub fn best(&self) -> Option<&Observation> {
        self.observations
            .iter()
            .min_by(|a, b| a.value.total_cmp(&b.value))
    }
}

/// Append-only `timestamp, p1, ..., pn, score` lines.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, point: &[f64], value: f64) -> Result<()> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let mut fields = vec![format!("{:.3}", timestamp)];
        fields.extend(point.iter().map(|v| v.to_string()));
        fields.push(value.to_string());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", fields.join(", "))?;
        Ok(())
    }
}
