//! Integrated output noise.

use super::check_lengths;
use super::series::trapezoid;
use crate::error::Result;
use crate::types::MetricsRecord;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseSummary {
    /// Integrated RMS noise, V.
    pub rms: f64,
    pub snr_db: f64,
}

impl NoiseSummary {
    /// `SNR` (dB) and `V_int` (uV rms).
    pub fn record(&self) -> MetricsRecord {
        let mut record = MetricsRecord::new();
        record.insert("SNR", self.snr_db);
        record.insert("V_int", self.rms * 1e6);
        record
    }
}

/// `rms = sqrt(|∫ density² df|)`, `SNR = |20 log10(amplitude / rms)|`.
pub fn integrate(f: &[f64], density: &[f64], amplitude: f64) -> Result<NoiseSummary> {
    check_lengths("noise density", f.len(), density.len())?;
    let squared: Vec<f64> = density.iter().map(|n| n * n).collect();
    let rms = trapezoid(&squared, f).abs().sqrt();

    Ok(NoiseSummary {
        rms,
        snr_db: (20.0 * (amplitude / rms).log10()).abs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn constant_density_integrates_to_n_sqrt_b() {
        let (n, b) = (3e-8, 1e6);
        let f: Vec<f64> = (0..=1000).map(|i| i as f64 * b / 1000.0).collect();
        let density = vec![n; f.len()];
        let summary = integrate(&f, &density, 0.8485).unwrap();

        assert_relative_eq!(summary.rms, n * b.sqrt(), max_relative = 1e-12);
        assert_relative_eq!(summary.snr_db, 20.0 * (0.8485 / (n * b.sqrt())).log10(), max_relative = 1e-12);
        assert_relative_eq!(summary.record().get("V_int").unwrap(), 30.0, max_relative = 1e-9);
    }

    #[test]
    fn descending_axis_gives_same_rms() {
        let f: Vec<f64> = (0..=100).rev().map(|i| i as f64 * 10.0).collect();
        let density = vec![1e-6; f.len()];
        let summary = integrate(&f, &density, 1.0).unwrap();
        assert_relative_eq!(summary.rms, 1e-6 * 1000f64.sqrt(), max_relative = 1e-12);
    }
}
