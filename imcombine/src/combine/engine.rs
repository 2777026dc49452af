//! Reduction of a working stack to one combined tile.
//!
//! For every pixel position only the unmasked values take part:
//! - mean / median: the statistic, uncertainty `std / sqrt(n_valid)`
//! - sum: the plain sum; uncertainty `sqrt(sum(u^2))` when per-frame
//!   uncertainties are available, otherwise `std * sqrt(n_valid)`. With
//!   normalization both are scaled by `n / n_valid`.
//!
//! A position with no valid value gets NaN value and uncertainty and a set
//! output mask. Unmasked NaN samples are not filtered and propagate.

use rayon::prelude::*;

use crate::frame::{Pixel, cast_sample};
use crate::math;

use super::config::CombineMethod;
use super::stack::Stack;

/// Combined values of one tile, row-major over the tile.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TileResult<T> {
    pub value: Vec<T>,
    pub uncertainty: Vec<T>,
    pub mask: Vec<bool>,
    /// Positions where every frame was masked.
    pub all_rejected: usize,
}

struct Scratch<T> {
    values: Vec<T>,
    sq_unct: Vec<T>,
}

pub(crate) fn combine_stack<T: Pixel>(
    stack: &Stack<'_, T>,
    method: CombineMethod,
    sum_normalize: bool,
) -> TileResult<T> {
    let positions = stack.position_count();
    let frames = stack.frame_count();

    let mut value = vec![T::nan(); positions];
    let mut uncertainty = vec![T::nan(); positions];
    let mut mask = vec![true; positions];

    value
        .par_iter_mut()
        .zip(uncertainty.par_iter_mut())
        .zip(mask.par_iter_mut())
        .enumerate()
        .for_each_init(
            || Scratch {
                values: Vec::with_capacity(frames),
                sq_unct: Vec::with_capacity(frames),
            },
            |scratch, (pos, ((v, u), m))| {
                if let Some((value, unct)) = combine_position(stack, pos, method, sum_normalize, scratch) {
                    *v = value;
                    *u = unct;
                    *m = false;
                }
            },
        );

    let all_rejected = mask.iter().filter(|&&m| m).count();
    TileResult {
        value,
        uncertainty,
        mask,
        all_rejected,
    }
}

/// Value and uncertainty at `pos`, `None` when every frame is masked there.
fn combine_position<T: Pixel>(
    stack: &Stack<'_, T>,
    pos: usize,
    method: CombineMethod,
    sum_normalize: bool,
    scratch: &mut Scratch<T>,
) -> Option<(T, T)> {
    let Scratch { values, sq_unct } = scratch;
    values.clear();
    values.extend(stack.column(pos).filter(|&(_, masked)| !masked).map(|(v, _)| v));
    if values.is_empty() {
        return None;
    }

    let n = cast_sample::<f64, T>(stack.frame_count() as f64);
    let n_valid = cast_sample::<f64, T>(values.len() as f64);

    match method {
        CombineMethod::Mean => {
            let std = math::std_dev(values);
            Some((math::mean(values), std / n_valid.sqrt()))
        }
        CombineMethod::Median => {
            let std = math::std_dev(values);
            Some((math::median_mut(values), std / n_valid.sqrt()))
        }
        CombineMethod::Sum => {
            let total = math::sum(values);
            let unct = match &stack.uncertainty {
                Some(slabs) => {
                    sq_unct.clear();
                    sq_unct.extend(
                        slabs
                            .iter()
                            .zip(&stack.masks)
                            .filter(|(_, mask)| !mask[pos])
                            .map(|(slab, _)| slab[pos] * slab[pos]),
                    );
                    math::sum(sq_unct).sqrt()
                }
                None => math::std_dev(values) * n_valid.sqrt(),
            };
            if sum_normalize {
                let norm = n / n_valid;
                Some((total * norm, unct * norm))
            } else {
                Some((total, unct))
            }
        }
    }
}
