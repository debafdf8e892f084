//! Sampled-series helpers shared by the extractors.

use std::f64::consts::PI;

use num_complex::Complex64;

/// `20 log10 |v|` per sample.
pub fn magnitude_db(values: &[Complex64]) -> Vec<f64> {
    values.iter().map(|v| 20.0 * v.norm().log10()).collect()
}

/// Wrapped phase in radians.
pub fn phase(values: &[Complex64]) -> Vec<f64> {
    values.iter().map(|v| v.arg()).collect()
}

/// Remove 2π jumps between consecutive samples (NumPy `unwrap`).
pub fn unwrap_phase(phase: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(phase.len());
    let Some(&first) = phase.first() else {
        return out;
    };
    out.push(first);

    let mut correction = 0.0;
    for pair in phase.windows(2) {
        let dd = pair[1] - pair[0];
        let mut ddmod = (dd + PI).rem_euclid(2.0 * PI) - PI;
        if ddmod == -PI && dd > 0.0 {
            ddmod = PI;
        }
        if dd.abs() >= PI {
            correction += ddmod - dd;
        }
        out.push(pair[1] + correction);
    }
    out
}

/// Unwrapped phase of complex samples.
pub fn unwrapped_phase(values: &[Complex64]) -> Vec<f64> {
    unwrap_phase(&phase(values))
}

/// Index of the sample nearest to `target`; the first one on ties.
/// NaN samples are skipped.
pub fn nearest_index(values: &[f64], target: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, v) in values.iter().enumerate() {
        let distance = (v - target).abs();
        if distance.is_nan() {
            continue;
        }
        match best {
            Some((_, d)) if distance >= d => {}
            _ => best = Some((i, distance)),
        }
    }
    best.map(|(i, _)| i)
}

/// Largest non-NaN sample.
pub fn max_value(values: &[f64]) -> Option<f64> {
    values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
}

/// Trapezoidal integral of `y` over `x`.
pub fn trapezoid(y: &[f64], x: &[f64]) -> f64 {
    y.windows(2)
        .zip(x.windows(2))
        .map(|(y, x)| 0.5 * (y[0] + y[1]) * (x[1] - x[0]))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn unwrap_is_idempotent_on_continuous_phase() {
        let continuous: Vec<f64> = (0..200).map(|i| -0.05 * i as f64).collect();
        let once = unwrap_phase(&continuous);
        for (a, b) in once.iter().zip(&continuous) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
        assert_eq!(unwrap_phase(&once), once);
    }

    #[test]
    fn unwrap_removes_wraps() {
        // A steadily falling phase, wrapped into (-π, π]
        let truth: Vec<f64> = (0..100).map(|i| -0.2 * i as f64).collect();
        let wrapped: Vec<f64> = truth
            .iter()
            .map(|p| Complex64::from_polar(1.0, *p).arg())
            .collect();
        let unwrapped = unwrap_phase(&wrapped);
        for (a, b) in unwrapped.iter().zip(&truth) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn nearest_prefers_first_on_ties() {
        assert_eq!(nearest_index(&[3.0, 1.0, 5.0, 1.0], 1.0), Some(1));
        assert_eq!(nearest_index(&[0.0, 2.0], 1.0), Some(0));
        assert_eq!(nearest_index(&[f64::NAN, 4.0], 0.0), Some(1));
        assert_eq!(nearest_index(&[], 0.0), None);
    }

    #[test]
    fn trapezoid_is_exact_for_lines() {
        let x = [0.0, 1.0, 3.0, 4.0];
        let y: Vec<f64> = x.iter().map(|x| 2.0 * x + 1.0).collect();
        assert_relative_eq!(trapezoid(&y, &x), 20.0);
    }

    #[test]
    fn magnitude_in_db() {
        let db = magnitude_db(&[Complex64::new(10.0, 0.0), Complex64::new(0.0, 0.1)]);
        assert_relative_eq!(db[0], 20.0);
        assert_relative_eq!(db[1], -20.0);
        assert_eq!(max_value(&db), Some(20.0));
    }
}
