//! Small numeric helpers with NaN-on-degenerate semantics.
//!
//! Empty inputs and zero denominators return `f64::NAN` instead of panicking
//! or silently producing zero.

/// Mean of the values; NaN when empty.
pub fn mean<I>(values: I) -> f64
where
    I: IntoIterator,
    I::Item: Into<f64>,
{
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in values {
        sum += v.into();
        n += 1;
    }
    if n == 0 { f64::NAN } else { sum / n as f64 }
}

/// Population variance (denominator n); NaN when empty.
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values.iter().copied());
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

/// Population standard deviation; NaN when empty.
pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// `num / den`, NaN when `den` is zero.
pub fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 { f64::NAN } else { num / den }
}

/// Mean and coefficient of variation (`std / mean`) of an integer track slice.
pub fn mean_and_cv(values: &[u32]) -> (f64, f64) {
    let as_f64: Vec<f64> = values.iter().map(|&v| v as f64).collect();
    let m = mean(as_f64.iter().copied());
    (m, ratio(std_dev(&as_f64), m))
}

/// Divide every value by their mean; returns the mean alongside.
///
/// A zero or undefined mean turns every value into NaN.
pub fn normalize_by_mean(values: &[f64]) -> (f64, Vec<f64>) {
    let m = mean(values.iter().copied());
    (m, values.iter().map(|&v| ratio(v, m)).collect())
}

/// Median of a weighted sample given as `(value, count)` pairs.
///
/// Matches the median of the expanded multiset: for an even total the two
/// middle values are averaged. Returns None when the total weight is zero.
pub fn weighted_median(pairs: &mut [(f64, u64)]) -> Option<f64> {
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let total: u64 = pairs.iter().map(|&(_, c)| c).sum();
    if total == 0 {
        return None;
    }

    // 0-based ranks of the middle element(s)
    let lo_rank = (total - 1) / 2;
    let hi_rank = total / 2;

    let mut lo = None;
    let mut seen = 0u64;
    for &(value, count) in pairs.iter() {
        if count == 0 {
            continue;
        }
        let next = seen + count;
        if lo.is_none() && lo_rank < next {
            lo = Some(value);
        }
        if hi_rank < next {
            return lo.map(|l| (l + value) / 2.0);
        }
        seen = next;
    }
    None
}
