//! Small descriptive statistics shared by the scorers

/// Arithmetic mean (0.0 for an empty slice)
pub fn mean<T: Copy + Into<f64>>(values: &[T]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| v.into()).sum::<f64>() / values.len() as f64
}

/// Population variance, two-pass (0.0 for an empty slice)
pub fn variance<T: Copy + Into<f64>>(values: &[T]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values
        .iter()
        .map(|&v| {
            let d = v.into() - m;
            d * d
        })
        .sum::<f64>()
        / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator)
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    (variance(values) * n / (n - 1.0)).sqrt()
}

/// Median of a slice; NaNs sort last
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
