//! Settling behavior of the virtual ground and supply current.

use super::check_lengths;
use super::series::nearest_index;
use crate::config::SettlingConfig;
use crate::error::{Error, Result};
use crate::types::MetricsRecord;

/// Threshold crossing times in us, measured from the stimulus edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettlingTimes {
    pub t_upper: f64,
    pub t_lower: f64,
    pub t_settle: f64,
    /// `t_upper - t_lower`; the thresholds are one neper apart.
    pub tau: f64,
}

impl SettlingTimes {
    pub fn record(&self) -> MetricsRecord {
        let mut record = MetricsRecord::new();
        record.insert("T_48dB", self.t_upper);
        record.insert("T_40dB", self.t_lower);
        record.insert("T_settle", self.t_settle);
        record.insert("tau_cl_tran", self.tau);
        record
    }
}

/// `20 log10(step / (|vp - vm| + eps))` per sample.
pub fn accuracy_db(vp: &[f64], vm: &[f64], step: f64, epsilon: f64) -> Vec<f64> {
    vp.iter()
        .zip(vm)
        .map(|(p, m)| 20.0 * (step / ((p - m).abs() + epsilon)).log10())
        .collect()
}

pub fn virtual_ground_settling(
    t_us: &[f64],
    vp: &[f64],
    vm: &[f64],
    cfg: &SettlingConfig,
) -> Result<SettlingTimes> {
    check_lengths("virtual ground (+)", t_us.len(), vp.len())?;
    check_lengths("virtual ground (-)", t_us.len(), vm.len())?;

    let accuracy = accuracy_db(vp, vm, cfg.step, cfg.epsilon);
    let crossing = |threshold: f64| -> Result<f64> {
        nearest_index(&accuracy, threshold)
            .map(|i| t_us[i] - cfg.offset_us)
            .ok_or_else(|| Error::MissingMetric(format!("settling time at {} dB", threshold)))
    };

    let t_upper = crossing(cfg.upper_threshold_db)?;
    let t_lower = crossing(cfg.lower_threshold_db)?;
    let t_settle = crossing(cfg.target_db)?;

    Ok(SettlingTimes {
        t_upper,
        t_lower,
        t_settle,
        tau: t_upper - t_lower,
    })
}

/// Final supply current magnitude in uA.
pub fn supply_current_ua(current: &[f64]) -> Result<f64> {
    current
        .last()
        .map(|i| (i * 1e6).abs())
        .ok_or_else(|| Error::MissingMetric("supply current".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Error decays as `step · e^-(t - offset)/τ` after the edge.
    fn exponential(tau: f64, cfg: &SettlingConfig) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let dt = tau / 2000.0;
        let n = ((cfg.offset_us + 20.0 * tau) / dt) as usize;
        let t: Vec<f64> = (0..n).map(|i| i as f64 * dt).collect();
        let err: Vec<f64> = t
            .iter()
            .map(|&t| {
                let elapsed = (t - cfg.offset_us).max(0.0);
                cfg.step * (-elapsed / tau).exp()
            })
            .collect();
        let vm = vec![0.9; t.len()];
        let vp = err.iter().map(|e| 0.9 + e).collect();
        (t, vp, vm)
    }

    #[test]
    fn recovers_time_constant() {
        let cfg = SettlingConfig::default();
        for tau in [0.05, 0.3, 1.0] {
            let (t, vp, vm) = exponential(tau, &cfg);
            let times = virtual_ground_settling(&t, &vp, &vm, &cfg).unwrap();
            assert_relative_eq!(times.tau, tau, max_relative = 0.01);
            assert!(times.t_lower < times.t_upper && times.t_upper < times.t_settle);
            // 40 dB of a pure exponential is ln(100) time constants
            assert_relative_eq!(times.t_lower, tau * 100f64.ln(), max_relative = 0.01);
        }
    }

    #[test]
    fn record_uses_reporting_names() {
        let times = SettlingTimes {
            t_upper: 2.0,
            t_lower: 1.5,
            t_settle: 3.0,
            tau: 0.5,
        };
        let record = times.record();
        let keys: Vec<&str> = record.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["T_48dB", "T_40dB", "T_settle", "tau_cl_tran"]);
    }

    #[test]
    fn supply_current_uses_last_sample() {
        assert_relative_eq!(supply_current_ua(&[-1e-4, -5.7e-4]).unwrap(), 570.0, epsilon = 1e-9);
        assert!(supply_current_ua(&[]).is_err());
    }
}
