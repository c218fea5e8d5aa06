use super::types::PercentileBand;

/// Linear-interpolated percentile of an already ascending slice; `p` in 0..=100.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        sorted[lower]
    } else {
        let w = rank - lower as f64;
        sorted[lower] * (1.0 - w) + sorted[upper] * w
    }
}

/// Sorts `values` in place and returns the requested percentile.
pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(values, p)
}

pub fn percentile_band(values: &mut [f64]) -> PercentileBand {
    values.sort_by(|a, b| a.total_cmp(b));
    PercentileBand {
        p5: percentile_sorted(values, 5.0),
        p25: percentile_sorted(values, 25.0),
        p50: percentile_sorted(values, 50.0),
        p75: percentile_sorted(values, 75.0),
        p95: percentile_sorted(values, 95.0),
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by `n`).
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Geometric mean of periodic returns, e.g. `[0.1, -0.1]` -> about -0.005.
pub fn geometric_mean_return(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let log_sum: f64 = returns.iter().map(|r| (1.0 + r).max(1e-12).ln()).sum();
    (log_sum / returns.len() as f64).exp() - 1.0
}
