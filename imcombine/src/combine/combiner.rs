//! Combine entry points.

use std::marker::PhantomData;
use std::mem::size_of;

use crate::common::Buffer2;
use crate::frame::{Frame, FrameMetadata, FrameSource, Pixel};

use super::cache::WorkingSet;
use super::chunks::ChunkPlan;
use super::config::{
    CacheConfig, CenterFn, CombineConfig, CombineMethod, CombineOptions, DeviationFn, SigmaLimits,
};
use super::engine;
use super::error::Error;
use super::progress::{CombineStage, ProgressCallback, report_progress};

/// Combines frames of equal shape and unit into one, with optional rejection.
///
/// `T` is the working precision: inputs are converted to it when loaded and the
/// result is produced in it.
///
/// # Examples
///
/// ```ignore
/// use imcombine::{Combiner, CombineMethod, CombineOptions};
///
/// let mut combiner = Combiner::<f64>::default();
/// combiner.set_sigma_clip_named(Some(3.0.into()), "median", "mad_std")?;
/// combiner.set_minmax_clip(Some(0.0), Some(65535.0))?;
/// let master = combiner.combine(&frames, CombineMethod::Median, CombineOptions::default())?;
/// ```
#[derive(Debug, Clone)]
pub struct Combiner<T: Pixel = f64> {
    config: CombineConfig,
    _precision: PhantomData<T>,
}

impl<T: Pixel> Default for Combiner<T> {
    fn default() -> Self {
        Self {
            config: CombineConfig::default(),
            _precision: PhantomData,
        }
    }
}

impl<T: Pixel> Combiner<T> {
    pub fn new(config: CombineConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            _precision: PhantomData,
        })
    }

    pub fn config(&self) -> &CombineConfig {
        &self.config
    }

    /// Enable sigma clipping, or disable it with `None`.
    pub fn set_sigma_clip(
        &mut self,
        limits: Option<SigmaLimits>,
        center: CenterFn,
        deviation: DeviationFn,
    ) -> Result<(), Error> {
        self.config.set_sigma_clip(limits, center, deviation)
    }

    /// Sigma clipping with center and deviation functions given by name.
    pub fn set_sigma_clip_named(
        &mut self,
        limits: Option<SigmaLimits>,
        center: &str,
        deviation: &str,
    ) -> Result<(), Error> {
        self.config.set_sigma_clip_named(limits, center, deviation)
    }

    /// Enable min/max clipping. `(None, None)` disables it.
    pub fn set_minmax_clip(&mut self, min: Option<f64>, max: Option<f64>) -> Result<(), Error> {
        self.config.set_minmax_clip(min, max)
    }

    pub fn set_memory_budget(&mut self, bytes: u64) -> Result<(), Error> {
        if bytes == 0 {
            return Err(Error::InvalidConfig(
                "memory budget must be positive".to_string(),
            ));
        }
        self.config.memory_budget = bytes;
        Ok(())
    }

    pub fn set_cache(&mut self, cache: CacheConfig) {
        self.config.cache = cache;
    }

    pub fn set_progress(&mut self, progress: Option<ProgressCallback>) {
        self.config.progress = progress;
    }

    /// Combine by method name: `"mean"`, `"median"` or `"sum"`.
    pub fn combine_named<F: FrameSource>(
        &self,
        frames: &[F],
        method: &str,
        options: CombineOptions,
    ) -> Result<Frame<T>, Error> {
        let method = CombineMethod::parse(method)?;
        self.combine(frames, method, options)
    }

    /// Combine `frames` into a new frame.
    ///
    /// Inputs are validated and copied before any work starts. The image is
    /// then processed tile by tile within the memory budget: min/max clipping,
    /// sigma clipping, then the reduction. The result mask is set where every
    /// frame was rejected.
    ///
    /// # Errors
    ///
    /// - `EmptyInput`, `ShapeMismatch` or `UnitMismatch` for unusable inputs
    /// - `InvalidConfig` when the configuration was edited into an invalid state
    /// - cache errors for disk-backed working storage
    pub fn combine<F: FrameSource>(
        &self,
        frames: &[F],
        method: CombineMethod,
        options: CombineOptions,
    ) -> Result<Frame<T>, Error> {
        self.config.validate()?;

        tracing::info!(
            method = %method,
            frame_count = frames.len(),
            sigma_clip = ?self.config.sigma_clip,
            minmax_clip = ?self.config.minmax_clip,
            sum_normalize = options.sum_normalize,
            "Starting combine"
        );

        let progress = self.config.progress.as_ref();
        let working = WorkingSet::<T>::load(
            frames,
            &self.config.cache,
            self.config.memory_budget,
            method == CombineMethod::Sum,
            progress,
        )?;

        if method == CombineMethod::Sum && !working.has_uncertainty() {
            tracing::info!(
                "Data with no uncertainties; using the std dev approximation for the sum uncertainty"
            );
        }

        let shape = working.shape();
        let plan = ChunkPlan::new(
            shape,
            working.frame_count(),
            size_of::<T>() * 2,
            method,
            self.config.memory_budget,
        );
        let total_tiles = plan.tile_count();
        if !plan.is_single() {
            tracing::debug!(tiles = total_tiles, "Splitting the images into tiles");
        }

        let mut data = Buffer2::new_filled(shape.width, shape.height, T::nan());
        let mut mask = Buffer2::new_filled(shape.width, shape.height, false);
        let mut uncertainty = Buffer2::new_filled(shape.width, shape.height, T::zero());
        let mut all_rejected = 0;

        report_progress(progress, 0, total_tiles, CombineStage::Combining);
        for (index, tile) in plan.tiles().enumerate() {
            let mut stack = working.stack(&tile);
            if let Some(clip) = &self.config.minmax_clip {
                stack.apply_minmax_clip(clip);
            }
            if let Some(clip) = &self.config.sigma_clip {
                stack.apply_sigma_clip(clip);
            }

            let result = engine::combine_stack(&stack, method, options.sum_normalize);
            if result.all_rejected > 0 {
                tracing::warn!(
                    rows = ?tile.rows,
                    cols = ?tile.cols,
                    count = result.all_rejected,
                    "All input values rejected at some pixel positions"
                );
            }
            all_rejected += result.all_rejected;

            data.write_region(tile.rows.clone(), tile.cols.clone(), &result.value);
            uncertainty.write_region(tile.rows.clone(), tile.cols.clone(), &result.uncertainty);
            mask.write_region(tile.rows.clone(), tile.cols.clone(), &result.mask);

            report_progress(progress, index + 1, total_tiles, CombineStage::Combining);
        }

        let metadata = FrameMetadata {
            combined_count: Some(working.frame_count()),
            combine_method: Some(method),
            all_rejected,
        };

        tracing::info!(
            method = %method,
            frame_count = working.frame_count(),
            tiles = total_tiles,
            all_rejected,
            "Combine finished"
        );

        Ok(Frame::assemble(
            data,
            mask,
            uncertainty,
            working.unit().clone(),
            metadata,
        ))
    }
}

/// One-shot combine at `f64` precision with default options.
pub fn combine<F: FrameSource>(
    frames: &[F],
    method: CombineMethod,
    config: CombineConfig,
) -> Result<Frame, Error> {
    Combiner::<f64>::new(config)?.combine(frames, method, CombineOptions::default())
}
