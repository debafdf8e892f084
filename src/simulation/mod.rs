//! Netlist materialization and simulator invocation.

pub mod driver;
pub mod netlist;
pub mod runner;

pub use driver::{Artifacts, Driver};
pub use runner::{CancelHandle, CancelToken, NgspiceRunner, SimulationJob, SimulatorBackend};
