//! Shared statistics helpers
//!
//! Stateless pure functions used by both the detector and the projector.
//! Standard deviations are population (divide by n), matching the interval
//! and amount statistics the detector stores.

/// Arithmetic mean; 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation; 0 for an empty slice.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Percentile via linear interpolation between order statistics.
///
/// `p` is in `[0, 1]`. Returns 0 for an empty slice.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let k = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = k.floor() as usize;
    let hi = k.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (sorted[hi] - sorted[lo]) * (k - lo as f64)
    }
}

/// Most frequent value, with first-seen tie-break.
pub fn most_common(values: &[u32]) -> Option<u32> {
    let mut best: Option<(u32, usize)> = None;
    for &candidate in values {
        let count = values.iter().filter(|&&v| v == candidate).count();
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((candidate, count)),
        }
    }
    best.map(|(v, _)| v)
}

/// Clamp to `[lo, hi]`.
pub fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    x.max(lo).min(hi)
}
