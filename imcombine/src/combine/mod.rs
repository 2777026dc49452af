//! Frame combination: rejection, tiling and reduction.

mod cache;
mod chunks;
mod combiner;
mod config;
mod engine;
mod error;
mod progress;
mod rejection;
mod stack;

#[cfg(test)]
mod tests;

pub use chunks::{ChunkPlan, Tile, Tiles};
pub use combiner::{Combiner, combine};
pub use config::{
    CacheConfig, CenterFn, CombineConfig, CombineMethod, CombineOptions, DEFAULT_MEMORY_BUDGET,
    DeviationFn, MinMaxClip, Reducer, SigmaClip, SigmaLimits, StorageMode,
};
pub use error::Error;
pub use progress::{CombineProgress, CombineStage, ProgressCallback};
