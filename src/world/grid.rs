//! Uniform cell grid over the map.
//!
//! * The grid aligns and pads the map bounds to whole cells, so cell
//!   lookups are a subtract and a divide with no bounds branches.
//! * `SegIter` walks the cells crossed by a segment with an
//!   incremental error term, one add per step.
//! * `BoxRange` clamps a query box to an inclusive cell range for
//!   plain nested-loop consumption.

use glam::Vec2;

use crate::world::geometry::{Aabb, EPSILON, Seg2};

/// Callback verdict for early-exit iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GridIterationStatus {
    Continue,
    Stop,
}

pub struct UniformGrid<T> {
    /// Cell edge length in map units.
    pub dimension: i32,
    /// How many cells wide the grid is.
    pub width: i32,
    /// How many cells tall the grid is.
    pub height: i32,
    /// Padded bounds; always contain the bounds passed to `new`.
    pub bounds: Aabb,
    /// Row-major cell storage.
    pub blocks: Vec<T>,
}

impl<T: Default> UniformGrid<T> {
    /// Builds a grid covering `bounds`.  The stored bounds are expanded:
    /// min aligned down and max aligned up to cell multiples, then one
    /// extra cell of padding on the min side (see `pad_bounds`).
    pub fn new(bounds: Aabb, dimension: i32) -> UniformGrid<T> {
        let bounds = pad_bounds(bounds, dimension);
        let sides = bounds.max - bounds.min;
        let width = (sides.x / dimension as f32) as i32;
        let height = (sides.y / dimension as f32) as i32;

        let mut blocks = Vec::new();
        blocks.resize_with((width * height) as usize, T::default);

        UniformGrid {
            dimension,
            width,
            height,
            bounds,
            blocks,
        }
    }
}

impl<T> UniformGrid<T> {
    #[inline]
    pub fn origin(&self) -> Vec2 {
        self.bounds.min
    }

    #[inline]
    pub fn total_blocks(&self) -> i32 {
        self.width * self.height
    }

    /// Cell index of a point, or `None` outside the grid.
    pub fn block_index(&self, pos: Vec2) -> Option<usize> {
        let origin = self.origin();
        let x = ((pos.x - origin.x) / self.dimension as f32) as i32;
        let y = ((pos.y - origin.y) / self.dimension as f32) as i32;
        if x < 0 || x >= self.width || y < 0 || y >= self.height {
            return None;
        }
        Some((y * self.width + x) as usize)
    }

    /// Inclusive cell range covered by a box, clamped to the grid.  A
    /// box entirely outside comes back with `start > end` on an axis,
    /// so the usual nested loops iterate nothing.
    pub fn box_range(&self, b: &Aabb) -> BoxRange {
        let origin = self.origin();
        let dim = self.dimension as f32;
        BoxRange {
            start_x: (((b.min.x - origin.x) / dim) as i32).max(0),
            start_y: (((b.min.y - origin.y) / dim) as i32).max(0),
            end_x: (((b.max.x - origin.x) / dim) as i32).min(self.width - 1),
            end_y: (((b.max.y - origin.y) / dim) as i32).min(self.height - 1),
            width: self.width,
        }
    }

    /// Walks the cells crossed by `seg` in order.  The iterator copies
    /// the grid scalars it needs, so it holds no borrow of the grid.
    pub fn seg_iter(&self, seg: &Seg2) -> SegIter {
        SegIter::new(self.width, self.total_blocks(), self.dimension, self.origin(), seg)
    }
}

/// Padded, aligned bounds for the grid.
///
/// The min corner is pushed one extra cell left and down beyond
/// alignment.  The segment walk steps along the column axis when its
/// error term is not positive, so a segment passing exactly through a
/// lattice corner computes, for one step, an index one cell left/down
/// of the true path.  With the pad that transient index is still a real
/// cell and the stepping loop needs no bounds branch.
fn pad_bounds(bounds: Aabb, dimension: i32) -> Aabb {
    let dim = dimension as f32;
    let left = (bounds.min.x / dim).floor() as i32 - 1;
    let bottom = (bounds.min.y / dim).floor() as i32 - 1;
    let right = (bounds.max.x / dim).ceil() as i32 + 1;
    let top = (bounds.max.y / dim).ceil() as i32 + 1;

    Aabb::new(
        Vec2::new((left * dimension) as f32, (bottom * dimension) as f32),
        Vec2::new((right * dimension) as f32, (top * dimension) as f32),
    )
}

/// Inclusive clamped cell range of a box query.
#[derive(Clone, Copy, Debug)]
pub struct BoxRange {
    pub start_x: i32,
    pub start_y: i32,
    pub end_x: i32,
    pub end_y: i32,
    pub width: i32,
}

impl BoxRange {
    #[inline]
    pub fn index(&self, bx: i32, by: i32) -> usize {
        (by * self.width + bx) as usize
    }
}

/// Incremental cell walk along a segment.
///
/// Both endpoints are quantized to cell units (origin-relative,
/// divided by the cell dimension).  Each axis contributes a step
/// direction and a fractional error scaled by the other axis's delta;
/// the walk then repeatedly steps whichever axis the error picks.  The
/// number of cells visited is one plus the lattice crossings on each
/// axis, clamped to the grid size.
pub struct SegIter {
    index: i32,
    total: i32,
    visited: i32,
    num_blocks: i32,
    horizontal_step: i32,
    vertical_step: i32,
    error: f32,
    abs_dx: f32,
    abs_dy: f32,
}

impl SegIter {
    fn new(width: i32, total: i32, dimension: i32, origin: Vec2, seg: &Seg2) -> SegIter {
        let dim = dimension as f32;
        let unit_start = (seg.start - origin) / dim;
        let unit_end = (seg.end - origin) / dim;
        let abs_dx = (unit_end.x - unit_start.x).abs();
        let abs_dy = (unit_end.y - unit_start.y).abs();

        // In-grid coordinates are positive, so the plain cast floors.
        let start_x = unit_start.x as i32;
        let start_y = unit_start.y as i32;

        let mut num_blocks = 1;
        let mut horizontal_step = 0;
        let mut vertical_step = 0;
        let mut error;

        if abs_dx < EPSILON {
            // Never step on this axis.
            error = f32::MAX;
        } else if unit_end.x > unit_start.x {
            horizontal_step = 1;
            num_blocks += unit_end.x.floor() as i32 - start_x;
            error = (unit_start.x.floor() + 1.0 - unit_start.x) * abs_dy;
        } else {
            horizontal_step = -1;
            num_blocks += start_x - unit_end.x.floor() as i32;
            error = (unit_start.x - unit_start.x.floor()) * abs_dy;
        }

        if abs_dy < EPSILON {
            error = f32::MIN;
        } else if unit_end.y > unit_start.y {
            vertical_step = width;
            num_blocks += unit_end.y.floor() as i32 - start_y;
            error -= (unit_start.y.floor() + 1.0 - unit_start.y) * abs_dx;
        } else {
            vertical_step = -width;
            num_blocks += start_y - unit_end.y.floor() as i32;
            error -= (unit_start.y - unit_start.y.floor()) * abs_dx;
        }

        SegIter {
            index: start_x + start_y * width,
            total,
            visited: 0,
            num_blocks: num_blocks.min(total),
            horizontal_step,
            vertical_step,
            error,
            abs_dx,
            abs_dy,
        }
    }
}

impl Iterator for SegIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.visited >= self.num_blocks || self.index < 0 || self.index >= self.total {
            return None;
        }

        let current = self.index;
        self.visited += 1;

        // Exact zero takes the column step.  Flipping this tie-break
        // moves the corner-case transient from one side of a lattice
        // corner to the other and changes which cells legacy collision
        // checks see; it must stay as is, together with the one-cell
        // min-side pad that keeps the transient in bounds.
        if self.error > 0.0 {
            self.index += self.vertical_step;
            self.error -= self.abs_dx;
        } else {
            self.index += self.horizontal_step;
            self.error += self.abs_dy;
        }

        Some(current as usize)
    }
}

/*=======================================================================*/
/*                                Tests                                  */
/*=======================================================================*/
