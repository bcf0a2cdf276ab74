//! Statistics Kernel: pure functions over a window of readings. No
//! allocation beyond a sorted copy for the quantiles; no I/O.

use serversentry_core::Statistics;

/// Mean, variance/std-dev, median, quartiles and IQR over `xs`.
///
/// Empty input returns `Statistics::empty()` (`valid = false`). All
/// arithmetic is double precision per the numeric semantics in §4.3.
pub fn summary(xs: &[f64]) -> Statistics {
    let n = xs.len();
    if n == 0 {
        return Statistics::empty();
    }

    let sum: f64 = xs.iter().sum();
    let mean = sum / n as f64;
    let sum_sq: f64 = xs.iter().map(|x| x * x).sum();
    let variance = (sum_sq / n as f64) - mean * mean;
    let std_dev = variance.max(0.0).sqrt();

    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let median = median_of_sorted(&sorted);
    let q1 = quantile_of_sorted(&sorted, 0.25);
    let q3 = quantile_of_sorted(&sorted, 0.75);

    Statistics {
        count: n,
        mean,
        std_dev,
        median,
        q1,
        q3,
        min: sorted[0],
        max: sorted[n - 1],
        iqr: q3 - q1,
        valid: true,
    }
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// 1-indexed position `floor(p * n) + 1`, clamped to `[1, n]`, converted
/// back to the 0-indexed slice.
fn quantile_of_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    let position = ((p * n as f64).floor() as i64 + 1).clamp(1, n as i64);
    sorted[(position - 1) as usize]
}

/// Least-squares slope and correlation over indices `1..=n`. Correlation
/// is 0 when either series has zero variance (undefined slope direction).
pub fn linear_regression(ys: &[f64]) -> (f64, f64) {
    let n = ys.len();
    if n < 2 {
        return (0.0, 0.0);
    }
    let xs: Vec<f64> = (1..=n).map(|i| i as f64).collect();

    let x_mean = xs.iter().sum::<f64>() / n as f64;
    let y_mean = ys.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = xs[i] - x_mean;
        let dy = ys[i] - y_mean;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return (0.0, 0.0);
    }

    let slope = cov / var_x;
    let correlation = cov / (var_x.sqrt() * var_y.sqrt());
    (slope, correlation)
}

/// A sentinel meaning "not applicable" — returned when `std_dev` is zero
/// and a z-score cannot be computed.
pub const Z_SCORE_NOT_APPLICABLE: f64 = f64::NAN;

/// `(x - mean) / std_dev`, or [`Z_SCORE_NOT_APPLICABLE`] if `std_dev <= 0`.
pub fn z_score(x: f64, mean: f64, std_dev: f64) -> f64 {
    if std_dev > 0.0 {
        (x - mean) / std_dev
    } else {
        Z_SCORE_NOT_APPLICABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_invalid() {
        let s = summary(&[]);
        assert!(!s.valid);
        assert_eq!(s.count, 0);
    }

    #[test]
    fn summary_matches_hand_computation() {
        let xs = [48.0, 51.0, 49.0, 50.0, 52.0, 50.0, 49.0, 51.0, 48.0, 52.0];
        let s = summary(&xs);
        assert_eq!(s.count, 10);
        assert!((s.mean - 50.0).abs() < 1e-9);
        assert!(s.std_dev > 1.3 && s.std_dev < 1.5);
    }

    #[test]
    fn constant_series_has_zero_std_dev() {
        let xs = vec![50.0; 12];
        let s = summary(&xs);
        assert_eq!(s.std_dev, 0.0);
        assert_eq!(s.iqr, 0.0);
    }

    #[test]
    fn linear_regression_detects_perfect_upward_trend() {
        let ys = [10.0, 12.0, 14.0, 16.0, 18.0, 20.0, 22.0, 24.0, 26.0, 28.0];
        let (slope, corr) = linear_regression(&ys);
        assert!((slope - 2.0).abs() < 1e-9);
        assert!((corr - 1.0).abs() < 1e-9);
    }

    #[test]
    fn linear_regression_zero_variance_x_never_happens_but_short_input_is_flat() {
        assert_eq!(linear_regression(&[1.0]), (0.0, 0.0));
        assert_eq!(linear_regression(&[]), (0.0, 0.0));
    }

    #[test]
    fn z_score_is_sentinel_when_std_dev_zero() {
        assert!(z_score(85.0, 50.0, 0.0).is_nan());
    }

    #[test]
    fn z_score_matches_expected_magnitude() {
        let z = z_score(85.0, 50.0, 1.4);
        assert!(z > 20.0);
    }
}
