//! Pure metric extraction from simulator traces. Every threshold search is a
//! nearest-sample `argmin`; nothing is interpolated.

pub mod ac;
pub mod fom;
pub mod noise;
pub mod series;
pub mod transient;

pub use ac::{ClosedLoopBandwidth, OpenLoopMargins, closed_loop_bandwidth, closed_loop_from_open, open_loop_margins};
pub use fom::{FigureOfMerit, figure_of_merit, power_uw};
pub use noise::{NoiseSummary, integrate};
pub use transient::{SettlingTimes, supply_current_ua, virtual_ground_settling};

use crate::error::{Error, Result};

fn check_lengths(what: &str, axis: usize, samples: usize) -> Result<()> {
    if axis == 0 {
        return Err(Error::MissingMetric(format!("{}: no samples", what)));
    }
    if axis != samples {
        return Err(Error::MissingMetric(format!(
            "{}: {} axis points but {} samples",
            what, axis, samples
        )));
    }
    Ok(())
}
