//! Per-tile working stack: one slab per frame, all covering the same tile.

use std::borrow::Cow;

use crate::common::Shape;
use crate::frame::Pixel;

use super::config::{MinMaxClip, SigmaClip};
use super::rejection;

/// Per-frame sample slabs, borrowed from working storage where possible.
pub(crate) type Slabs<'a, T> = Vec<Cow<'a, [T]>>;

/// Data, mask and optional uncertainty slabs of one tile, aligned with the
/// input frame list. Slabs are row-major over the tile.
///
/// Data and uncertainty may borrow the working storage; masks are always owned
/// because rejection writes into them.
#[derive(Debug)]
pub(crate) struct Stack<'a, T: Pixel> {
    pub shape: Shape,
    pub data: Slabs<'a, T>,
    pub masks: Vec<Vec<bool>>,
    pub uncertainty: Option<Slabs<'a, T>>,
}

impl<'a, T: Pixel> Stack<'a, T> {
    pub fn new(
        shape: Shape,
        data: Slabs<'a, T>,
        masks: Vec<Vec<bool>>,
        uncertainty: Option<Slabs<'a, T>>,
    ) -> Self {
        let positions = shape.pixel_count();
        assert_eq!(data.len(), masks.len(), "one mask slab per data slab");
        assert!(
            data.iter().all(|s| s.len() == positions) && masks.iter().all(|m| m.len() == positions),
            "slab length must equal tile pixel count"
        );
        if let Some(unct) = &uncertainty {
            assert_eq!(unct.len(), data.len(), "one uncertainty slab per data slab");
            assert!(
                unct.iter().all(|s| s.len() == positions),
                "slab length must equal tile pixel count"
            );
        }
        Self {
            shape,
            data,
            masks,
            uncertainty,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.data.len()
    }

    pub fn position_count(&self) -> usize {
        self.shape.pixel_count()
    }

    pub fn apply_minmax_clip(&mut self, clip: &MinMaxClip) -> usize {
        rejection::minmax_clip(&self.data, &mut self.masks, clip)
    }

    pub fn apply_sigma_clip(&mut self, clip: &SigmaClip) -> usize {
        rejection::sigma_clip(&self.data, &mut self.masks, clip)
    }

    /// Values and masks of all frames at one position.
    pub fn column(&self, pos: usize) -> impl Iterator<Item = (T, bool)> + '_ {
        self.data
            .iter()
            .zip(&self.masks)
            .map(move |(slab, mask)| (slab[pos], mask[pos]))
    }
}
