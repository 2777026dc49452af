//! Combine configuration.
//!
//! `CombineConfig` holds everything that stays fixed across `combine()` calls:
//! rejection settings, memory budget, working storage and progress reporting.
//! Per-call switches live in `CombineOptions`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use strum_macros::{Display, EnumString};

use super::error::Error;
use super::progress::ProgressCallback;

/// Default memory budget for the per-tile working set: 1 GB.
pub const DEFAULT_MEMORY_BUDGET: u64 = 1_000_000_000;

/// Method for combining pixel values across frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum CombineMethod {
    /// Average of the unmasked values.
    Mean,
    /// Median of the unmasked values.
    #[default]
    Median,
    /// Sum of the unmasked values, optionally normalized for rejections.
    Sum,
}

impl CombineMethod {
    /// Parse a method name, failing with `Error::InvalidMethod`.
    pub fn parse(name: &str) -> Result<Self, Error> {
        Self::from_str(name).map_err(|_| Error::InvalidMethod(name.to_string()))
    }

    /// Working-set inflation for temporaries of the reduction.
    /// Median needs sort buffers on top of the stack itself.
    pub fn memory_factor(self) -> f64 {
        match self {
            CombineMethod::Median => 4.5,
            CombineMethod::Mean | CombineMethod::Sum => 3.0,
        }
    }
}

/// Reduction over the valid values of one pixel position.
pub type Reducer = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// Center estimate used by sigma clipping.
#[derive(Clone, Default, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum CenterFn {
    #[default]
    Median,
    Mean,
    #[strum(disabled)]
    Custom(Reducer),
}

impl CenterFn {
    pub fn custom(f: impl Fn(&[f64]) -> f64 + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }
}

impl fmt::Display for CenterFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CenterFn::Median => "median",
            CenterFn::Mean => "mean",
            CenterFn::Custom(_) => "custom",
        })
    }
}

impl fmt::Debug for CenterFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CenterFn::{}", self)
    }
}

/// Deviation estimate used by sigma clipping.
#[derive(Clone, Default, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum DeviationFn {
    Std,
    #[default]
    MadStd,
    #[strum(disabled)]
    Custom(Reducer),
}

impl DeviationFn {
    pub fn custom(f: impl Fn(&[f64]) -> f64 + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }
}

impl fmt::Display for DeviationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviationFn::Std => "std",
            DeviationFn::MadStd => "mad_std",
            DeviationFn::Custom(_) => "custom",
        })
    }
}

impl fmt::Debug for DeviationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviationFn::{}", self)
    }
}

/// Low/high sigma thresholds. `None` on a side disables clipping on that side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SigmaLimits {
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl SigmaLimits {
    pub fn symmetric(sigma: f64) -> Self {
        Self {
            low: Some(sigma),
            high: Some(sigma),
        }
    }

    pub fn asymmetric(low: f64, high: f64) -> Self {
        Self {
            low: Some(low),
            high: Some(high),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        for (side, value) in [("low", self.low), ("high", self.high)] {
            if let Some(v) = value
                && !(v.is_finite() && v >= 0.0)
            {
                return Err(Error::InvalidConfig(format!(
                    "sigma clipping {side} threshold {v} must be a finite, non-negative number"
                )));
            }
        }
        Ok(())
    }
}

impl From<f64> for SigmaLimits {
    fn from(sigma: f64) -> Self {
        Self::symmetric(sigma)
    }
}

impl From<(f64, f64)> for SigmaLimits {
    fn from((low, high): (f64, f64)) -> Self {
        Self::asymmetric(low, high)
    }
}

impl From<(Option<f64>, Option<f64>)> for SigmaLimits {
    fn from((low, high): (Option<f64>, Option<f64>)) -> Self {
        Self { low, high }
    }
}

impl TryFrom<&[f64]> for SigmaLimits {
    type Error = Error;

    fn try_from(values: &[f64]) -> Result<Self, Self::Error> {
        match *values {
            [sigma] => Ok(Self::symmetric(sigma)),
            [low, high] => Ok(Self::asymmetric(low, high)),
            _ => Err(Error::InvalidConfig(format!(
                "sigma clipping thresholds must have 1 or 2 values, got {}",
                values.len()
            ))),
        }
    }
}

/// Sigma clipping settings.
#[derive(Debug, Clone)]
pub struct SigmaClip {
    pub limits: SigmaLimits,
    pub center: CenterFn,
    pub deviation: DeviationFn,
}

impl SigmaClip {
    /// Median center and `mad_std` deviation.
    pub fn new(limits: impl Into<SigmaLimits>) -> Self {
        Self {
            limits: limits.into(),
            center: CenterFn::default(),
            deviation: DeviationFn::default(),
        }
    }
}

/// Fixed-threshold clipping bounds, `min <= max` when both are set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinMaxClip {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl MinMaxClip {
    /// Validate and order the bounds. Returns `None` when both are `None`.
    pub fn new(min: Option<f64>, max: Option<f64>) -> Result<Option<Self>, Error> {
        for value in [min, max].into_iter().flatten() {
            if value.is_nan() {
                return Err(Error::InvalidConfig(
                    "min/max clipping bound is not a number".to_string(),
                ));
            }
        }

        let (min, max) = match (min, max) {
            (None, None) => return Ok(None),
            (Some(lo), Some(hi)) if hi < lo => (Some(hi), Some(lo)),
            bounds => bounds,
        };

        Ok(Some(Self { min, max }))
    }
}

/// Where the working copies of the input frames live during a combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// In memory while the working copies fit the memory budget, disk-backed
    /// otherwise.
    #[default]
    Auto,
    /// Plain heap buffers.
    InMemory,
    /// Raw sample files under `CacheConfig::cache_dir`, memory-mapped read-only.
    DiskBacked,
}

impl StorageMode {
    /// Concrete mode for `frame_count` frames of `pixel_count` pixels, each
    /// pixel costing `bytes_per_pixel` of working storage.
    ///
    /// Uses checked arithmetic so pathologically large stacks go to disk.
    pub fn resolve(
        self,
        pixel_count: usize,
        frame_count: usize,
        bytes_per_pixel: usize,
        memory_budget: u64,
    ) -> StorageMode {
        match self {
            StorageMode::Auto => {
                if fits_in_memory(pixel_count, frame_count, bytes_per_pixel, memory_budget) {
                    StorageMode::InMemory
                } else {
                    StorageMode::DiskBacked
                }
            }
            mode => mode,
        }
    }
}

fn fits_in_memory(
    pixel_count: usize,
    frame_count: usize,
    bytes_per_pixel: usize,
    memory_budget: u64,
) -> bool {
    let Some(bytes_per_image) = pixel_count.checked_mul(bytes_per_pixel) else {
        return false;
    };
    let Some(total_bytes) = bytes_per_image.checked_mul(frame_count) else {
        return false;
    };
    (total_bytes as u64) <= memory_budget
}

/// Working storage settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub storage: StorageMode,
    /// Parent directory for disk-backed working files.
    pub cache_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            storage: StorageMode::Auto,
            cache_dir: std::env::temp_dir().join("imcombine_cache"),
        }
    }
}

impl CacheConfig {
    pub fn in_memory() -> Self {
        Self {
            storage: StorageMode::InMemory,
            ..Self::default()
        }
    }

    pub fn disk_backed(cache_dir: PathBuf) -> Self {
        Self {
            storage: StorageMode::DiskBacked,
            cache_dir,
        }
    }
}

/// Configuration owned by a [`Combiner`](super::Combiner).
///
/// # Examples
///
/// ```ignore
/// use imcombine::{CombineConfig, CenterFn, DeviationFn, SigmaLimits};
///
/// let mut config = CombineConfig::default();
/// config.set_sigma_clip(Some(SigmaLimits::asymmetric(3.0, 2.5)), CenterFn::Median, DeviationFn::MadStd)?;
/// config.set_minmax_clip(Some(0.0), Some(60000.0))?;
/// ```
#[derive(Clone)]
pub struct CombineConfig {
    /// Sigma clipping, applied after min/max clipping.
    pub sigma_clip: Option<SigmaClip>,
    /// Min/max clipping, applied first.
    pub minmax_clip: Option<MinMaxClip>,
    /// Upper bound for the estimated per-tile working set, in bytes.
    pub memory_budget: u64,
    /// Working storage for the copied input frames.
    pub cache: CacheConfig,
    /// Optional progress callback.
    pub progress: Option<ProgressCallback>,
}

impl fmt::Debug for CombineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CombineConfig")
            .field("sigma_clip", &self.sigma_clip)
            .field("minmax_clip", &self.minmax_clip)
            .field("memory_budget", &self.memory_budget)
            .field("cache", &self.cache)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Default for CombineConfig {
    fn default() -> Self {
        Self {
            sigma_clip: None,
            minmax_clip: None,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            cache: CacheConfig::default(),
            progress: None,
        }
    }
}

impl CombineConfig {
    /// Preset: symmetric sigma clipping with median / mad_std.
    pub fn sigma_clipped(sigma: f64) -> Self {
        Self {
            sigma_clip: Some(SigmaClip::new(sigma)),
            ..Default::default()
        }
    }

    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = bytes;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Enable sigma clipping, or disable it with `None` limits.
    pub fn set_sigma_clip(
        &mut self,
        limits: Option<SigmaLimits>,
        center: CenterFn,
        deviation: DeviationFn,
    ) -> Result<(), Error> {
        let Some(limits) = limits else {
            self.sigma_clip = None;
            return Ok(());
        };
        limits.validate()?;
        self.sigma_clip = Some(SigmaClip {
            limits,
            center,
            deviation,
        });
        Ok(())
    }

    /// Same as [`set_sigma_clip`](Self::set_sigma_clip) with functions given by name:
    /// `"median"`/`"mean"` and `"std"`/`"mad_std"`.
    pub fn set_sigma_clip_named(
        &mut self,
        limits: Option<SigmaLimits>,
        center: &str,
        deviation: &str,
    ) -> Result<(), Error> {
        let center = CenterFn::from_str(center).map_err(|_| {
            Error::InvalidConfig(format!("center function '{center}' not accepted"))
        })?;
        let deviation = DeviationFn::from_str(deviation).map_err(|_| {
            Error::InvalidConfig(format!("deviation function '{deviation}' not accepted"))
        })?;
        self.set_sigma_clip(limits, center, deviation)
    }

    /// Enable min/max clipping. `(None, None)` disables it completely.
    pub fn set_minmax_clip(&mut self, min: Option<f64>, max: Option<f64>) -> Result<(), Error> {
        self.minmax_clip = MinMaxClip::new(min, max)?;
        Ok(())
    }

    /// Check values that may have been set directly on the public fields.
    pub fn validate(&self) -> Result<(), Error> {
        if self.memory_budget == 0 {
            return Err(Error::InvalidConfig(
                "memory budget must be positive".to_string(),
            ));
        }
        if let Some(clip) = &self.sigma_clip {
            clip.limits.validate()?;
        }
        if let Some(clip) = &self.minmax_clip {
            if clip.min.is_some_and(f64::is_nan) || clip.max.is_some_and(f64::is_nan) {
                return Err(Error::InvalidConfig(
                    "min/max clipping bound is not a number".to_string(),
                ));
            }
            if let (Some(lo), Some(hi)) = (clip.min, clip.max)
                && lo > hi
            {
                return Err(Error::InvalidConfig(format!(
                    "min/max clipping bounds out of order: {lo} > {hi}"
                )));
            }
        }
        Ok(())
    }
}

/// Per-call combine switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombineOptions {
    /// Scale sums by `n / n_valid` so positions with rejections are not darker.
    pub sum_normalize: bool,
}

impl Default for CombineOptions {
    fn default() -> Self {
        Self {
            sum_normalize: true,
        }
    }
}
