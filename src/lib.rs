//! Simulator-driven characterization of a fully differential amplifier:
//! netlist materialization, SPICE result parsing, metric extraction, a
//! Bayesian design search and report assembly.

pub mod cli;
pub mod config;
pub mod error;
pub mod expression;
pub mod metrics;
pub mod optimizer;
pub mod pipeline;
pub mod report;
pub mod results;
pub mod simulation;
pub mod types;
pub mod units;

pub use config::{Config, Context, parse_config};
pub use error::{Error, Result};
pub use pipeline::{Evaluation, Pipeline};
pub use types::{AnalysisMode, LoadCondition, MetricsRecord, Parameter, ParameterVector, Target, TargetMode};
