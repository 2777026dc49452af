//! Tile planning under a memory budget.
//!
//! The estimated working set of a combine is
//! `H * W * n * (sample + mask bytes) * method factor`. When it exceeds the
//! budget, the image is cut into row bands, and into column blocks too when
//! there are more tiles than rows.

use std::ops::Range;

use crate::common::Shape;

use super::config::CombineMethod;

/// Rectangular region of the image, half-open row and column ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

impl Tile {
    pub fn shape(&self) -> Shape {
        Shape::new(self.rows.len(), self.cols.len())
    }

    pub fn covers(&self, shape: Shape) -> bool {
        self.rows == (0..shape.height) && self.cols == (0..shape.width)
    }
}

/// Tiling of an image into row bands and column blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    shape: Shape,
    row_step: usize,
    col_step: usize,
}

impl ChunkPlan {
    /// Plan tiles for `frames` images of `shape`, each position costing
    /// `bytes_per_pixel` per frame before the method factor.
    pub fn new(
        shape: Shape,
        frames: usize,
        bytes_per_pixel: usize,
        method: CombineMethod,
        memory_budget: u64,
    ) -> Self {
        let (height, width) = (shape.height, shape.width);
        let total = shape.pixel_count() as f64
            * frames as f64
            * bytes_per_pixel as f64
            * method.memory_factor();
        let requested = (total / memory_budget.max(1) as f64).ceil().max(1.0);
        // A plan with more tiles than pixels degenerates to one tile per pixel.
        let requested = requested.min((height * width).max(1) as f64);
        let tiles = requested as usize;

        let row_step = (height / tiles).max(1);
        let col_step = if height >= tiles {
            width
        } else {
            let per_row = requested / height.max(1) as f64;
            ((width as f64 / per_row).ceil() as usize).max(1)
        };

        tracing::debug!(
            requested = tiles,
            row_step,
            col_step,
            "Planned combine tiles"
        );

        Self {
            shape,
            row_step,
            col_step: col_step.min(width.max(1)),
        }
    }

    /// Plan with explicit steps.
    pub fn with_steps(shape: Shape, row_step: usize, col_step: usize) -> Self {
        assert!(row_step > 0 && col_step > 0, "tile steps must be positive");
        Self {
            shape,
            row_step,
            col_step,
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn row_step(&self) -> usize {
        self.row_step
    }

    pub fn col_step(&self) -> usize {
        self.col_step
    }

    /// Actual number of tiles produced by [`tiles`](Self::tiles).
    pub fn tile_count(&self) -> usize {
        self.shape.height.div_ceil(self.row_step) * self.shape.width.div_ceil(self.col_step)
    }

    pub fn is_single(&self) -> bool {
        self.tile_count() == 1
    }

    /// Row-major iterator over the tiles. Can be called any number of times.
    pub fn tiles(&self) -> Tiles {
        Tiles {
            plan: *self,
            row: 0,
            col: 0,
        }
    }
}

/// Iterator over the tiles of a [`ChunkPlan`].
#[derive(Debug, Clone)]
pub struct Tiles {
    plan: ChunkPlan,
    row: usize,
    col: usize,
}

impl Iterator for Tiles {
    type Item = Tile;

    fn next(&mut self) -> Option<Tile> {
        let Shape { height, width } = self.plan.shape;
        if self.row >= height || width == 0 {
            return None;
        }

        let rows = self.row..(self.row + self.plan.row_step).min(height);
        let cols = self.col..(self.col + self.plan.col_step).min(width);

        self.col = cols.end;
        if self.col >= width {
            self.col = 0;
            self.row = rows.end;
        }

        Some(Tile { rows, cols })
    }
}
