//! imcombine - CCD image combination.
//!
//! Combines a list of frames of the same shape and unit into one:
//! - mean, median and sum reductions with uncertainty propagation
//! - min/max and sigma clipping along the frame axis
//! - tiling under a memory budget, with optional disk-backed working storage
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use imcombine::prelude::*;
//!
//! let mut combiner = Combiner::<f64>::default();
//! combiner.set_sigma_clip(Some(3.0.into()), CenterFn::Median, DeviationFn::MadStd)?;
//! let master = combiner.combine(&bias_frames, CombineMethod::Median, CombineOptions::default())?;
//!
//! println!("{} frames combined", master.metadata.combined_count.unwrap_or(0));
//! ```

pub mod combine;
pub mod common;
mod frame;
pub(crate) mod math;

#[cfg(test)]
pub mod testing;

pub mod prelude;

// ============================================================================
// Frames
// ============================================================================

pub use common::{Buffer2, Shape};
pub use frame::{Frame, FrameMetadata, FrameSource, Pixel, Unit};

// ============================================================================
// Combining
// ============================================================================

pub use combine::{
    CacheConfig, CenterFn, CombineConfig, CombineMethod, CombineOptions, CombineProgress,
    CombineStage, Combiner, DeviationFn, Error, MinMaxClip, ProgressCallback, SigmaClip,
    SigmaLimits, StorageMode, combine,
};

pub use math::MAD_TO_SIGMA;
