//! Statistical reductions over the values of one pixel position.
//!
//! All functions take the values that survived masking. Empty input yields NaN,
//! and NaN inputs propagate instead of being skipped.


use std::cmp::Ordering;

use num_traits::Float;

/// MAD (Median Absolute Deviation) to standard deviation conversion factor.
///
/// For a normal distribution, σ ≈ 1.4826 × MAD.
/// This is the exact value: 1 / Φ⁻¹(3/4) where Φ⁻¹ is the inverse CDF.
pub const MAD_TO_SIGMA: f64 = 1.482_602_218_505_602;

#[inline]
fn constant<T: Float>(value: f64) -> T {
    num_traits::cast(value).unwrap_or_else(T::nan)
}

#[inline]
fn count<T: Float>(n: usize) -> T {
    num_traits::cast(n).unwrap_or_else(T::nan)
}

pub fn sum<T: Float>(values: &[T]) -> T {
    values.iter().fold(T::zero(), |acc, &v| acc + v)
}

pub fn mean<T: Float>(values: &[T]) -> T {
    if values.is_empty() {
        return T::nan();
    }
    sum(values) / count(values.len())
}

/// Population standard deviation (divides by `n`).
pub fn std_dev<T: Float>(values: &[T]) -> T {
    if values.is_empty() {
        return T::nan();
    }
    let center = mean(values);
    let sum_sq = values.iter().fold(T::zero(), |acc, &v| {
        let d = v - center;
        acc + d * d
    });
    (sum_sq / count(values.len())).sqrt()
}

/// Median using quickselect. Reorders `data`.
///
/// Even-length input averages the two middle values.
pub fn median_mut<T: Float>(data: &mut [T]) -> T {
    if data.is_empty() || data.iter().any(|v| v.is_nan()) {
        return T::nan();
    }

    let cmp = |a: &T, b: &T| a.partial_cmp(b).unwrap_or(Ordering::Equal);
    let len = data.len();
    let mid = len / 2;

    let (left_part, median, _) = data.select_nth_unstable_by(mid, cmp);
    let upper = *median;
    if len % 2 == 1 {
        return upper;
    }
    let lower = left_part
        .iter()
        .copied()
        .fold(T::neg_infinity(), |acc, v| acc.max(v));
    (lower + upper) / count(2)
}

/// Median absolute deviation, using `scratch` for the deviations.
pub fn mad_with_scratch<T: Float>(values: &[T], scratch: &mut Vec<T>) -> T {
    scratch.clear();
    scratch.extend_from_slice(values);
    let center = median_mut(scratch);
    for v in scratch.iter_mut() {
        *v = (*v - center).abs();
    }
    median_mut(scratch)
}

/// Robust standard deviation estimate: `MAD_TO_SIGMA * MAD`.
pub fn mad_std<T: Float>(values: &[T], scratch: &mut Vec<T>) -> T {
    mad_with_scratch(values, scratch) * constant(MAD_TO_SIGMA)
}
