// src/pooling.rs
//
// Spatial collapse of per-block values into one number.

/// Total order, so a stray NaN sorts last instead of breaking the sort.
pub fn sort_ascending(values: &mut [f64]) {
    values.sort_by(f64::total_cmp);
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation via `sqrt(E[x²] - E[x]²)`, clamped at zero.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let ex = values.iter().sum::<f64>() / n;
    let ex2 = values.iter().map(|v| v * v).sum::<f64>() / n;
    (ex2 - ex * ex).max(0.0).sqrt()
}

/// Number of values in a `fraction` tail; never less than one.
fn tail_len(len: usize, fraction: f64) -> usize {
    ((len as f64 * fraction) as usize).clamp(1, len.max(1))
}

/// Mean of the smallest `fraction` of the values. Sorts `values` in place.
pub fn mean_of_lowest(values: &mut [f64], fraction: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    sort_ascending(values);
    let n = tail_len(values.len(), fraction);
    mean(&values[..n])
}

/// Mean of the largest `fraction` of the values. Sorts `values` in place.
pub fn mean_of_highest(values: &mut [f64], fraction: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    sort_ascending(values);
    let n = tail_len(values.len(), fraction);
    mean(&values[values.len() - n..])
}

/// Mean of everything at or above the `level` rank, minus the value at that rank.
///
/// The rank is `floor(level * n)`. Sorts `values` in place.
pub fn tail_excess(values: &mut [f64], level: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    sort_ascending(values);
    let p = ((values.len() as f64 * level) as usize).min(values.len() - 1);
    mean(&values[p..]) - values[p]
}
