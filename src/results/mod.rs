//! Readers for simulator output artifacts.

pub mod oplog;
pub mod rawfile;

pub use oplog::{Measurements, OperatingPointTable, parse_measurements, parse_operating_points};
pub use rawfile::{RawFile, Trace, TraceData, Waveforms};
