//! Small order statistics shared by the normalizer and the stacker.

/// Scale from the median absolute deviation to a Gaussian sigma.
pub const MAD_TO_SIGMA: f64 = 1.482_602_218_505_602;

/// Median of `values`; the two central values are averaged for even counts.
/// Reorders `values`. `None` when empty.
pub fn median(values: &mut [f64]) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    values.sort_unstable_by(f64::total_cmp);
    if n % 2 == 1 {
        Some(values[n / 2])
    } else {
        Some(0.5 * (values[n / 2 - 1] + values[n / 2]))
    }
}

/// Median absolute deviation around `centre`.
pub fn median_abs_deviation(values: &[f64], centre: f64) -> Option<f64> {
    let mut deviations: Vec<f64> = values.iter().map(|v| (v - centre).abs()).collect();
    median(&mut deviations)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population standard deviation (ddof = 0).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}
