// SPDX-License-Identifier: AGPL-3.0-only

//! Grid allocation geometry and the host-side view of a read-back grid.
//!
//! Every term index `k` of the BBP sum owns exactly one cell of a square
//! 2D grid, row-major: `k = y * width + x`. Cells past the last term are
//! padding and always hold the zero vector.
//!
//! ```text
//!   side = max(ceil(sqrt(n)), 1) + 1        n = digit position
//!   terms k = 0..=n  →  n + 1 cells used, side² ≥ n + 1
//! ```

use crate::error::PiSpringError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Channels per cell: one per BBP sub-series.
pub const CHANNELS: usize = 4;

/// Denominator offsets `j` of the four sub-series `Σ 16^(n-k) / (8k + j)`,
/// in channel order (S1, S4, S5, S6).
pub const CHANNEL_OFFSETS: [u64; CHANNELS] = [1, 4, 5, 6];

/// Largest supported digit position.
///
/// Keeps every denominator `8k + 6` below 2^31 so the WGSL kernel's 32-bit
/// shift-and-add modular multiply never overflows.
pub const MAX_DIGIT_POSITION: u64 = (1 << 28) - 1;

/// Largest grid side accepted anywhere in the pipeline: the side the
/// allocator picks for [`MAX_DIGIT_POSITION`] (`⌈√(2^28 − 1)⌉ + 1`).
pub const MAX_GRID_SIDE: u32 = (1 << 14) + 1;

/// One partial-sum vector: (S1, S4, S5, S6) contributions of a single term.
pub type Cell = [f64; CHANNELS];

/// Integer cell coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCoord {
    pub x: u32,
    pub y: u32,
}

impl GridCoord {
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Width × height of a compute or reduced grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDims {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for GridDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{}", self.width, self.height)
    }
}

/// Smallest `r` with `r * r >= n`.
#[must_use]
pub fn ceil_sqrt(n: u64) -> u64 {
    let square = |r: u64| u128::from(r) * u128::from(r);
    let target = u128::from(n);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let mut r = (n as f64).sqrt() as u64;
    while square(r) < target {
        r += 1;
    }
    while r > 0 && square(r - 1) >= target {
        r -= 1;
    }
    r
}

/// Reject digit positions outside `0..=MAX_DIGIT_POSITION`.
///
/// # Errors
///
/// Returns [`PiSpringError::InvalidArgument`] when `n` is too large.
pub fn check_position(n: u64) -> Result<(), PiSpringError> {
    if n > MAX_DIGIT_POSITION {
        return Err(PiSpringError::invalid(format!(
            "digit position {n} exceeds the supported maximum {MAX_DIGIT_POSITION}"
        )));
    }
    Ok(())
}

/// Reject empty grids and grids wider or taller than [`MAX_GRID_SIDE`].
///
/// # Errors
///
/// Returns [`PiSpringError::InvalidArgument`] for such a grid.
pub fn check_dims(dims: GridDims) -> Result<(), PiSpringError> {
    if dims.is_empty() {
        return Err(PiSpringError::invalid(format!("empty grid {dims}")));
    }
    if dims.max_side() > MAX_GRID_SIDE {
        return Err(PiSpringError::invalid(format!(
            "grid {dims} exceeds the largest supported side {MAX_GRID_SIDE}"
        )));
    }
    Ok(())
}

impl GridDims {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub const fn square(side: u32) -> Self {
        Self::new(side, side)
    }

    /// Size the square grid for `term_count` terms (indices `0..term_count`).
    ///
    /// # Errors
    ///
    /// Returns [`PiSpringError::InvalidArgument`] if `term_count` is zero or
    /// the highest term index exceeds [`MAX_DIGIT_POSITION`].
    pub fn for_term_count(term_count: u64) -> Result<Self, PiSpringError> {
        if term_count < 1 {
            return Err(PiSpringError::invalid("term count must be at least 1"));
        }
        let n = term_count - 1;
        check_position(n)?;
        let side = ceil_sqrt(n).max(1) + 1;
        let side = u32::try_from(side)
            .map_err(|_| PiSpringError::invalid(format!("grid side {side} overflows u32")))?;
        Ok(Self::square(side))
    }

    /// Size the grid for digit position `n` (terms `k = 0..=n`).
    ///
    /// # Errors
    ///
    /// Returns [`PiSpringError::InvalidArgument`] if `n` is out of range.
    pub fn for_position(n: u64) -> Result<Self, PiSpringError> {
        Self::for_term_count(n.saturating_add(1))
    }

    /// Number of cells.
    #[must_use]
    pub const fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Term index owned by `coord` (row-major).
    #[must_use]
    pub const fn term_index(&self, coord: GridCoord) -> u64 {
        coord.y as u64 * self.width as u64 + coord.x as u64
    }

    /// Coordinate of term `k`, if it lies inside the grid.
    #[must_use]
    pub fn coord_of(&self, k: u64) -> Option<GridCoord> {
        if self.width == 0 || k >= self.area() as u64 {
            return None;
        }
        let width = u64::from(self.width);
        let x = u32::try_from(k % width).ok()?;
        let y = u32::try_from(k / width).ok()?;
        Some(GridCoord::new(x, y))
    }

    /// Whether every term index `0..=n` has a cell.
    #[must_use]
    pub const fn covers_position(&self, n: u64) -> bool {
        (self.area() as u64) > n
    }

    /// Larger of width and height.
    #[must_use]
    pub const fn max_side(&self) -> u32 {
        if self.width > self.height {
            self.width
        } else {
            self.height
        }
    }

    /// Dimensions after a block-mean pass with the given `scale`.
    ///
    /// Rounding policy: ceil-division on each axis. The last block on an
    /// axis that `scale` does not divide evenly extends past the grid edge;
    /// the reduction kernel reads those cells as zero. A scale larger than
    /// the grid's larger side is rejected, `scale == max_side` collapses a
    /// square grid to a single cell.
    ///
    /// # Errors
    ///
    /// Returns [`PiSpringError::InvalidArgument`] if `scale` is zero or
    /// exceeds [`Self::max_side`].
    pub fn reduced(&self, scale: u32) -> Result<Self, PiSpringError> {
        if scale < 1 {
            return Err(PiSpringError::invalid("reduction scale must be at least 1"));
        }
        if scale > self.max_side() {
            return Err(PiSpringError::invalid(format!(
                "reduction scale {scale} exceeds grid {self}"
            )));
        }
        Ok(Self::new(
            self.width.div_ceil(scale),
            self.height.div_ceil(scale),
        ))
    }
}

/// A grid transferred to host memory: a linear row-major array of cells.
///
/// Produced once by a read-back and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct HostGrid {
    dims: GridDims,
    cells: Vec<Cell>,
}

impl HostGrid {
    /// Wrap read-back cells.
    ///
    /// # Errors
    ///
    /// Returns [`PiSpringError::InvalidArgument`] if `cells.len()` differs
    /// from the grid area.
    pub fn from_cells(dims: GridDims, cells: Vec<Cell>) -> Result<Self, PiSpringError> {
        if cells.len() != dims.area() {
            return Err(PiSpringError::invalid(format!(
                "grid {dims} needs {} cells, got {}",
                dims.area(),
                cells.len()
            )));
        }
        Ok(Self { dims, cells })
    }

    /// Rebuild from a flat `[c0, c1, c2, c3, c0, …]` channel array.
    ///
    /// # Errors
    ///
    /// Returns [`PiSpringError::InvalidArgument`] on a length mismatch.
    pub fn from_flat(dims: GridDims, flat: &[f64]) -> Result<Self, PiSpringError> {
        if flat.len() != dims.area() * CHANNELS {
            return Err(PiSpringError::invalid(format!(
                "grid {dims} needs {} channel values, got {}",
                dims.area() * CHANNELS,
                flat.len()
            )));
        }
        let cells = flat
            .chunks_exact(CHANNELS)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect();
        Self::from_cells(dims, cells)
    }

    #[must_use]
    pub const fn dims(&self) -> GridDims {
        self.dims
    }

    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    #[must_use]
    pub fn cell(&self, coord: GridCoord) -> Option<&Cell> {
        if coord.x >= self.dims.width || coord.y >= self.dims.height {
            return None;
        }
        usize::try_from(self.dims.term_index(coord))
            .ok()
            .and_then(|i| self.cells.get(i))
    }

    /// Channels flattened in cell order (length `area * 4`).
    #[must_use]
    pub fn to_flat(&self) -> Vec<f64> {
        self.cells.iter().flatten().copied().collect()
    }

    /// First `(cell index, channel, value)` that is NaN or infinite.
    #[must_use]
    pub fn first_non_finite(&self) -> Option<(usize, usize, f64)> {
        self.cells.iter().enumerate().find_map(|(i, cell)| {
            cell.iter()
                .position(|v| !v.is_finite())
                .map(|ch| (i, ch, cell[ch]))
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ceil_sqrt_exact_and_between_squares() {
        assert_eq!(ceil_sqrt(0), 0);
        assert_eq!(ceil_sqrt(1), 1);
        assert_eq!(ceil_sqrt(2), 2);
        assert_eq!(ceil_sqrt(16), 4);
        assert_eq!(ceil_sqrt(17), 5);
        assert_eq!(ceil_sqrt(1600), 40);
        assert_eq!(ceil_sqrt(u64::MAX), 1 << 32);
    }

    #[test]
    fn allocator_side_matches_formula() {
        assert_eq!(GridDims::for_position(0).unwrap(), GridDims::square(2));
        assert_eq!(GridDims::for_position(1).unwrap(), GridDims::square(2));
        assert_eq!(GridDims::for_position(2).unwrap(), GridDims::square(3));
        assert_eq!(GridDims::for_position(1600).unwrap(), GridDims::square(41));
        assert_eq!(GridDims::for_position(1601).unwrap(), GridDims::square(42));
    }

    #[test]
    fn allocator_always_covers_every_term() {
        for n in (0..5_000).chain([MAX_DIGIT_POSITION - 1, MAX_DIGIT_POSITION]) {
            let dims = GridDims::for_position(n).unwrap();
            assert!(dims.covers_position(n), "n={n} dims={dims}");
        }
    }

    #[test]
    fn allocator_rejects_zero_terms_and_huge_positions() {
        assert!(matches!(
            GridDims::for_term_count(0),
            Err(PiSpringError::InvalidArgument(_))
        ));
        assert!(matches!(
            GridDims::for_position(MAX_DIGIT_POSITION + 1),
            Err(PiSpringError::InvalidArgument(_))
        ));
    }

    #[test]
    fn coord_past_the_grid_is_none() {
        let dims = GridDims::new(7, 3);
        assert_eq!(dims.coord_of(20), Some(GridCoord::new(6, 2)));
        assert!(dims.coord_of(21).is_none());
        assert!(GridDims::new(0, 3).coord_of(0).is_none());
    }

    #[test]
    fn grid_side_bounded_by_allocator_maximum() {
        let largest = GridDims::for_position(MAX_DIGIT_POSITION).unwrap();
        assert_eq!(largest.max_side(), MAX_GRID_SIDE);
        assert!(check_dims(largest).is_ok());
        assert!(check_dims(GridDims::new(3, MAX_GRID_SIDE + 1)).is_err());
        assert!(check_dims(GridDims::square(u32::MAX)).is_err());
        assert!(check_dims(GridDims::new(4, 0)).is_err());
    }

    proptest! {
        #[test]
        fn term_index_and_coord_are_inverse(
            width in 1u32..=MAX_GRID_SIDE,
            height in 1u32..=MAX_GRID_SIDE,
            frac in 0.0f64..1.0,
        ) {
            let dims = GridDims::new(width, height);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
            let k = ((dims.area() as f64 * frac) as u64).min(dims.area() as u64 - 1);
            let c = dims.coord_of(k).unwrap();
            prop_assert!(c.x < width && c.y < height);
            prop_assert_eq!(dims.term_index(c), k);
        }
    }

    #[test]
    fn reduced_uses_ceil_division() {
        let dims = GridDims::square(41);
        assert_eq!(dims.reduced(1).unwrap(), GridDims::square(41));
        assert_eq!(dims.reduced(16).unwrap(), GridDims::square(3));
        assert_eq!(dims.reduced(41).unwrap(), GridDims::square(1));
        assert_eq!(GridDims::new(10, 4).reduced(4).unwrap(), GridDims::new(3, 1));
    }

    #[test]
    fn reduced_rejects_zero_and_oversize_scale() {
        let dims = GridDims::square(40);
        assert!(dims.reduced(0).is_err());
        assert!(dims.reduced(41).is_err());
    }

    #[test]
    fn host_grid_length_checked() {
        let dims = GridDims::square(2);
        assert!(HostGrid::from_cells(dims, vec![[0.0; 4]; 3]).is_err());
        assert!(HostGrid::from_flat(dims, &[0.0; 15]).is_err());
        let g = HostGrid::from_flat(dims, &(0..16).map(f64::from).collect::<Vec<_>>()).unwrap();
        assert_eq!(g.cell(GridCoord::new(1, 1)), Some(&[12.0, 13.0, 14.0, 15.0]));
        assert_eq!(g.cell(GridCoord::new(2, 0)), None);
        assert_eq!(g.to_flat().len(), 16);
    }

    #[test]
    fn first_non_finite_reports_location() {
        let mut cells = vec![[0.0; 4]; 4];
        cells[2][3] = f64::INFINITY;
        let g = HostGrid::from_cells(GridDims::square(2), cells).unwrap();
        let (i, ch, v) = g.first_non_finite().unwrap();
        assert_eq!((i, ch), (2, 3));
        assert!(v.is_infinite());
    }
}
