//! Progress reporting for combine operations.

use std::sync::Arc;

/// Progress information for a combine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombineProgress {
    /// Completed steps of the current stage.
    pub current: usize,
    /// Total steps of the current stage.
    pub total: usize,
    pub stage: CombineStage,
}

/// Stage of a combine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineStage {
    /// Copying input frames into working storage.
    Loading,
    /// Rejecting and combining tiles.
    Combining,
}

/// Callback type for progress reporting.
pub type ProgressCallback = Arc<dyn Fn(CombineProgress) + Send + Sync>;

/// Report progress using the callback if set.
pub fn report_progress(
    callback: Option<&ProgressCallback>,
    current: usize,
    total: usize,
    stage: CombineStage,
) {
    if let Some(f) = callback {
        f(CombineProgress {
            current,
            total,
            stage,
        });
    }
}
