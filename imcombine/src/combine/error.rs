//! Error types for combine operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::common::Shape;
use crate::frame::Unit;

/// Errors that can occur while configuring or running a combine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("No images provided for combining")]
    EmptyInput,

    #[error("Shape mismatch for image {index}: expected {expected}, got {actual}")]
    ShapeMismatch {
        index: usize,
        expected: Shape,
        actual: Shape,
    },

    #[error("Unit mismatch for image {index}: expected {expected}, got {actual}")]
    UnitMismatch {
        index: usize,
        expected: Unit,
        actual: Unit,
    },

    #[error("Frame {component} has shape {actual}, data has shape {expected}")]
    ComponentShape {
        component: &'static str,
        expected: Shape,
        actual: Shape,
    },

    #[error("'{0}' is not a valid combining method")]
    InvalidMethod(String),

    #[error("Invalid combine configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to create cache directory '{path}': {source}")]
    CreateCacheDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write cache file '{path}': {source}")]
    WriteCacheFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to open cache file '{path}': {source}")]
    OpenCacheFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to memory-map cache file '{path}': {source}")]
    MmapCacheFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
