//! Small-signal frequency-response metrics.

use std::f64::consts::PI;

use num_complex::Complex64;

use super::check_lengths;
use super::series::{magnitude_db, max_value, nearest_index, unwrapped_phase};
use crate::error::{Error, Result};
use crate::types::MetricsRecord;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosedLoopBandwidth {
    pub peak_db: f64,
    pub f_3db: f64,
    /// `1 / (2π f_3dB)` in us.
    pub tau_us: f64,
}

impl ClosedLoopBandwidth {
    /// `BW_cl` (MHz) and `tau_cl` (us).
    pub fn record(&self) -> MetricsRecord {
        let mut record = MetricsRecord::new();
        record.insert("BW_cl", self.f_3db * 1e-6);
        record.insert("tau_cl", self.tau_us);
        record
    }
}

/// Nearest sample to `peak - 3 dB` over the whole sweep.
pub fn closed_loop_bandwidth(f: &[f64], response: &[Complex64]) -> Result<ClosedLoopBandwidth> {
    check_lengths("closed-loop response", f.len(), response.len())?;
    let db = magnitude_db(response);
    let peak_db =
        max_value(&db).ok_or_else(|| Error::MissingMetric("closed-loop peak gain".into()))?;
    let idx = nearest_index(&db, peak_db - 3.0)
        .ok_or_else(|| Error::MissingMetric("3 dB bandwidth".into()))?;

    let f_3db = f[idx];
    Ok(ClosedLoopBandwidth {
        peak_db,
        f_3db,
        tau_us: 1e6 / (2.0 * PI * f_3db),
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenLoopMargins {
    /// Frequency nearest to 0 dB loop gain.
    pub unity_gain_hz: f64,
    /// Phase at unity gain plus π, radians.
    pub phase_margin: f64,
    /// Negative loop gain (dB) where the phase is nearest to -π/2.
    pub gain_margin_db: f64,
    pub gain_margin_hz: f64,
}

impl OpenLoopMargins {
    pub fn phase_margin_deg(&self) -> f64 {
        self.phase_margin.to_degrees()
    }

    /// `BW_ol` (MHz), `PM` (degrees) and `GM` (dB).
    pub fn record(&self) -> MetricsRecord {
        let mut record = MetricsRecord::new();
        record.insert("BW_ol", self.unity_gain_hz * 1e-6);
        record.insert("PM", self.phase_margin_deg());
        record.insert("GM", self.gain_margin_db);
        record
    }
}

pub fn open_loop_margins(f: &[f64], loop_gain: &[Complex64]) -> Result<OpenLoopMargins> {
    check_lengths("loop gain", f.len(), loop_gain.len())?;
    let db = magnitude_db(loop_gain);
    let phase = unwrapped_phase(loop_gain);

    let zero = nearest_index(&db, 0.0)
        .ok_or_else(|| Error::MissingMetric("unity-gain frequency".into()))?;
    let crossing = nearest_index(&phase, -PI / 2.0)
        .ok_or_else(|| Error::MissingMetric("gain margin".into()))?;

    Ok(OpenLoopMargins {
        unity_gain_hz: f[zero],
        phase_margin: phase[zero] + PI,
        gain_margin_db: -db[crossing],
        gain_margin_hz: f[crossing],
    })
}

/// Closed-loop gain rebuilt from a loop-gain injection measurement:
/// `A_CL = Vip / (1 + Vip) * (Vo / Vip - 1)`.
pub fn closed_loop_from_open(vo: &[Complex64], vip: &[Complex64]) -> Result<Vec<Complex64>> {
    check_lengths("open-loop traces", vo.len(), vip.len())?;
    Ok(vo
        .iter()
        .zip(vip)
        .map(|(&vo, &vip)| vip / (1.0 + vip) * (vo / vip - 1.0))
        .collect())
}
