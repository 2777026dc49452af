//! Common utilities for imcombine.

pub mod buffer2;

pub use buffer2::{Buffer2, Shape};
