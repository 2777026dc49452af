//! Pixel rejection for combining.
//!
//! Both strategies work on a stack of `n` slabs (one per frame) holding the
//! same tile, plus one mask slab per frame. They OR their result into the
//! masks and never touch the data.
//!
//! - Min/max clipping: fixed bounds, a pure per-value test.
//! - Sigma clipping: per pixel position, center and deviation of the unmasked
//!   finite values across frames, then a threshold test against them.
//!
//! Both also reject non-finite values.

use std::ops::Deref;

use rayon::prelude::*;

use crate::frame::{Pixel, cast_sample};
use crate::math;

use super::config::{CenterFn, DeviationFn, MinMaxClip, SigmaClip, SigmaLimits};

/// Per-thread buffers for the per-position reductions.
#[derive(Debug, Default)]
pub(crate) struct ClipScratch<T> {
    values: Vec<T>,
    work: Vec<T>,
    wide: Vec<f64>,
}

impl<T: Pixel> ClipScratch<T> {
    pub(crate) fn with_capacity(frames: usize) -> Self {
        Self {
            values: Vec::with_capacity(frames),
            work: Vec::with_capacity(frames),
            wide: Vec::new(),
        }
    }
}

fn run_custom<T: Pixel>(
    reducer: &(dyn Fn(&[f64]) -> f64 + Send + Sync),
    values: &[T],
    wide: &mut Vec<f64>,
) -> T {
    wide.clear();
    wide.extend(values.iter().map(|&v| cast_sample::<T, f64>(v)));
    cast_sample(reducer(wide))
}

impl CenterFn {
    /// Center of `values`. May reorder them.
    pub(crate) fn reduce<T: Pixel>(&self, values: &mut [T], wide: &mut Vec<f64>) -> T {
        match self {
            CenterFn::Median => math::median_mut(values),
            CenterFn::Mean => math::mean(values),
            CenterFn::Custom(f) => run_custom(f.as_ref(), values, wide),
        }
    }
}

impl DeviationFn {
    pub(crate) fn reduce<T: Pixel>(
        &self,
        values: &[T],
        work: &mut Vec<T>,
        wide: &mut Vec<f64>,
    ) -> T {
        match self {
            DeviationFn::Std => math::std_dev(values),
            DeviationFn::MadStd => math::mad_std(values, work),
            DeviationFn::Custom(f) => run_custom(f.as_ref(), values, wide),
        }
    }
}

/// Accepted range `[low, high]` around `center`. A disabled side is infinite.
fn sigma_bounds<T: Pixel>(center: T, dev: T, limits: &SigmaLimits) -> (T, T) {
    let low = match limits.low {
        Some(sigma) => center - cast_sample::<f64, T>(sigma) * dev,
        None => T::neg_infinity(),
    };
    let high = match limits.high {
        Some(sigma) => center + cast_sample::<f64, T>(sigma) * dev,
        None => T::infinity(),
    };
    (low, high)
}

#[inline]
fn outside<T: Pixel>(value: T, low: T, high: T) -> bool {
    // NaN bounds compare false, so only non-finite values are rejected there.
    !value.is_finite() || value < low || value > high
}

/// Reject values outside the fixed bounds. Returns the number of values the
/// test rejected, including ones that were already masked.
pub(crate) fn minmax_clip<T, D>(data: &[D], masks: &mut [Vec<bool>], clip: &MinMaxClip) -> usize
where
    T: Pixel,
    D: Deref<Target = [T]> + Sync,
{
    let low = clip.min.map_or(T::neg_infinity(), cast_sample::<f64, T>);
    let high = clip.max.map_or(T::infinity(), cast_sample::<f64, T>);

    let rejected: usize = masks
        .par_iter_mut()
        .zip(data.par_iter())
        .map(|(mask, slab)| mark_outside(slab, mask, |_| (low, high)))
        .sum();

    tracing::debug!(rejected, "Rejected pixels by min/max clipping");
    rejected
}

/// Sigma clip along the frame axis. Returns the number of values the test
/// rejected, including ones that were already masked.
pub(crate) fn sigma_clip<T, D>(data: &[D], masks: &mut [Vec<bool>], clip: &SigmaClip) -> usize
where
    T: Pixel,
    D: Deref<Target = [T]> + Sync,
{
    debug_assert_eq!(data.len(), masks.len());
    let frames = data.len();
    let positions = masks.first().map_or(0, Vec::len);

    let current: &[Vec<bool>] = masks;
    let bounds: Vec<(T, T)> = (0..positions)
        .into_par_iter()
        .map_init(
            || ClipScratch::with_capacity(frames),
            |scratch, pos| position_bounds(data, current, pos, clip, scratch),
        )
        .collect();

    let rejected: usize = masks
        .par_iter_mut()
        .zip(data.par_iter())
        .map(|(mask, slab)| mark_outside(slab, mask, |pos| bounds[pos]))
        .sum();

    tracing::debug!(rejected, "Rejected pixels by sigma clipping");
    rejected
}

fn position_bounds<T, D>(
    data: &[D],
    masks: &[Vec<bool>],
    pos: usize,
    clip: &SigmaClip,
    scratch: &mut ClipScratch<T>,
) -> (T, T)
where
    T: Pixel,
    D: Deref<Target = [T]>,
{
    let ClipScratch { values, work, wide } = scratch;
    values.clear();
    values.extend(
        data.iter()
            .zip(masks)
            .filter(|(_, mask)| !mask[pos])
            .map(|(slab, _)| slab[pos])
            .filter(|v| v.is_finite()),
    );

    if values.is_empty() {
        return (T::nan(), T::nan());
    }

    // Deviation first: the median center reorders `values`.
    let dev = clip.deviation.reduce(values, work, wide);
    let center = clip.center.reduce(values, wide);
    sigma_bounds(center, dev, &clip.limits)
}

fn mark_outside<T: Pixel>(
    slab: &[T],
    mask: &mut [bool],
    bounds_at: impl Fn(usize) -> (T, T),
) -> usize {
    let mut rejected = 0;
    for (pos, (m, &value)) in mask.iter_mut().zip(slab).enumerate() {
        let (low, high) = bounds_at(pos);
        if outside(value, low, high) {
            *m = true;
            rejected += 1;
        }
    }
    rejected
}
