//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use imcombine::prelude::*;
//! ```

pub use crate::{Buffer2, Frame, FrameSource, Shape, Unit};

pub use crate::{
    CenterFn, CombineConfig, CombineMethod, CombineOptions, Combiner, DeviationFn, SigmaLimits,
    combine,
};
