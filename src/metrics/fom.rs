//! Noise-power-speed figure of merit.

use std::f64::consts::PI;

use crate::types::MetricsRecord;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FigureOfMerit {
    pub linear: f64,
    pub db: f64,
}

impl FigureOfMerit {
    /// `FOM_lin` (scaled by 1e18) and `FOM_dB`.
    pub fn record(&self) -> MetricsRecord {
        let mut record = MetricsRecord::new();
        record.insert("FOM_lin", self.linear * 1e18);
        record.insert("FOM_dB", self.db);
        record
    }
}

/// Supply power in uW from a current in uA.
pub fn power_uw(current_ua: f64, supply_voltage: f64) -> f64 {
    current_ua * supply_voltage
}

/// `2π P τ / (10^(SNR/20))²` with P in uW and τ in us.
pub fn figure_of_merit(power_uw: f64, tau_us: f64, snr_db: f64) -> FigureOfMerit {
    let signal = 10f64.powf(snr_db / 20.0);
    let linear = 2.0 * PI * power_uw * 1e-6 * tau_us * 1e-6 / (signal * signal);
    FigureOfMerit {
        linear,
        db: -10.0 * linear.log10(),
    }
}
