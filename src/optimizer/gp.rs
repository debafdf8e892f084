//! Gaussian-process surrogate on the unit cube.

use crate::error::{Error, Result};

/// Length scales tried when fitting; the best by marginal likelihood wins.
const LENGTH_SCALES: [f64; 8] = [0.05, 0.1, 0.2, 0.3, 0.5, 0.8, 1.2, 2.0];
const JITTER: f64 = 1e-8;

/// Matern 5/2 covariance with unit signal variance.
#[inline]
pub fn matern52(a: &[f64], b: &[f64], length_scale: f64) -> f64 {
    let r = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
        / length_scale;
    let s = 5f64.sqrt() * r;
    (1.0 + s + s * s / 3.0) * (-s).exp()
}

/// Lower-triangular Cholesky factor, or `None` if `k` is not positive definite.
fn cholesky(k: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = k.len();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|p| l[i][p] * l[j][p]).sum();
            if i == j {
                let d = k[i][i] - sum;
                if d <= 0.0 || !d.is_finite() {
                    return None;
                }
                l[i][j] = d.sqrt();
            } else {
                l[i][j] = (k[i][j] - sum) / l[j][j];
            }
        }
    }
    Some(l)
}

/// Solve `L x = b`.
fn forward(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let mut x = vec![0.0; b.len()];
    for i in 0..b.len() {
        let sum: f64 = (0..i).map(|j| l[i][j] * x[j]).sum();
        x[i] = (b[i] - sum) / l[i][i];
    }
    x
}

/// Solve `Lᵀ x = b`.
fn backward(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let sum: f64 = (i + 1..n).map(|j| l[j][i] * x[j]).sum();
        x[i] = (b[i] - sum) / l[i][i];
    }
    x
}

#[derive(Debug, Clone)]
pub struct GaussianProcess {
    x: Vec<Vec<f64>>,
    chol: Vec<Vec<f64>>,
    alpha: Vec<f64>,
    length_scale: f64,
}

impl GaussianProcess {
    /// Fit to standardized targets `y` at unit-cube inputs `x`.
    pub fn fit(x: &[Vec<f64>], y: &[f64], noise: f64) -> Result<Self> {
        if x.is_empty() || x.len() != y.len() {
            return Err(Error::Optimizer(format!(
                "cannot fit surrogate to {} inputs and {} outputs",
                x.len(),
                y.len()
            )));
        }

        let mut best: Option<(f64, Self)> = None;
        for &length_scale in &LENGTH_SCALES {
            let Some((gp, likelihood)) = Self::fit_with(x, y, noise, length_scale) else {
                continue;
            };
            if best.as_ref().is_none_or(|(l, _)| likelihood > *l) {
                best = Some((likelihood, gp));
            }
        }

        best.map(|(_, gp)| gp)
            .ok_or_else(|| Error::Optimizer("covariance matrix is not positive definite".into()))
    }

    fn fit_with(x: &[Vec<f64>], y: &[f64], noise: f64, length_scale: f64) -> Option<(Self, f64)> {
        let n = x.len();
        let mut k = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..=i {
                let v = matern52(&x[i], &x[j], length_scale);
                k[i][j] = v;
                k[j][i] = v;
            }
            k[i][i] += noise + JITTER;
        }

        let chol = cholesky(&k)?;
        let alpha = backward(&chol, &forward(&chol, y));

        // log p(y) = -½ yᵀα - Σ log Lᵢᵢ - n/2 log 2π
        let fit: f64 = y.iter().zip(&alpha).map(|(a, b)| a * b).sum();
        let log_det: f64 = (0..n).map(|i| chol[i][i].ln()).sum();
        let likelihood =
            -0.5 * fit - log_det - 0.5 * n as f64 * (2.0 * std::f64::consts::PI).ln();
        if !likelihood.is_finite() {
            return None;
        }

        Some((
            Self {
                x: x.to_vec(),
                chol,
                alpha,
                length_scale,
            },
            likelihood,
        ))
    }

    pub fn length_scale(&self) -> f64 {
        self.length_scale
    }

    /// Posterior mean and standard deviation at `point`.
    pub fn predict(&self, point: &[f64]) -> (f64, f64) {
        let k: Vec<f64> = self
            .x
            .iter()
            .map(|xi| matern52(xi, point, self.length_scale))
            .collect();
        let mean = k.iter().zip(&self.alpha).map(|(a, b)| a * b).sum();
        let v = forward(&self.chol, &k);
        let variance = 1.0 - v.iter().map(|x| x * x).sum::<f64>();
        (mean, variance.max(0.0).sqrt())
    }
}

/// Error function, Abramowitz & Stegun 7.1.26 (|err| < 1.5e-7).
pub fn erf(x: f64) -> f64 {
    let t = 1.0 / (1.0 + 0.3275911 * x.abs());
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    let y = 1.0 - poly * (-x * x).exp();
    if x >= 0.0 { y } else { -y }
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Expected improvement below `best` for a minimization problem.
pub fn expected_improvement(mean: f64, std: f64, best: f64, xi: f64) -> f64 {
    let improvement = best - mean - xi;
    if std <= 1e-12 {
        return improvement.max(0.0);
    }
    let z = improvement / std;
    improvement * normal_cdf(z) + std * normal_pdf(z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn samples() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..8).map(|i| vec![i as f64 / 7.0]).collect();
        let y = x.iter().map(|p| (6.0 * p[0]).sin()).collect();
        (x, y)
    }

    #[test]
    fn interpolates_training_points() {
        let (x, y) = samples();
        let gp = GaussianProcess::fit(&x, &y, 1e-10).unwrap();
        for (xi, yi) in x.iter().zip(&y) {
            let (mean, std) = gp.predict(xi);
            assert_relative_eq!(mean, *yi, epsilon = 1e-3);
            assert!(std < 1e-2);
        }
    }

    #[test]
    fn uncertainty_grows_away_from_data() {
        let x = vec![vec![0.0, 0.0], vec![0.1, 0.0]];
        let gp = GaussianProcess::fit(&x, &[0.0, 1.0], 1e-6).unwrap();
        let (_, near) = gp.predict(&[0.05, 0.0]);
        let (_, far) = gp.predict(&[1.0, 1.0]);
        assert!(far > near);
        assert!(far <= 1.0);
    }

    #[test]
    fn expected_improvement_prefers_low_mean_and_high_spread() {
        let best = 0.0;
        assert!(expected_improvement(-1.0, 0.1, best, 0.0) > expected_improvement(1.0, 0.1, best, 0.0));
        assert!(expected_improvement(1.0, 2.0, best, 0.0) > expected_improvement(1.0, 0.1, best, 0.0));
        assert_eq!(expected_improvement(1.0, 0.0, best, 0.0), 0.0);
    }

    #[test]
    fn erf_matches_reference_values() {
        assert_relative_eq!(erf(0.0), 0.0, epsilon = 1e-7);
        assert_relative_eq!(erf(1.0), 0.8427007929, epsilon = 2e-7);
        assert_relative_eq!(erf(-0.5), -0.5204998778, epsilon = 2e-7);
    }

    #[test]
    fn rejects_mismatched_inputs() {
        assert!(GaussianProcess::fit(&[vec![0.0]], &[], 1e-6).is_err());
    }
}
