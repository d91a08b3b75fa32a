// SPDX-License-Identifier: AGPL-3.0-only

//! Host reference of the block-mean reduction kernel.
//!
//! Output cell `(X, Y)` is the mean of the `scale × scale` input block whose
//! top-left corner is `(X·scale, Y·scale)`. Cells of a tail block that fall
//! outside the input grid read as zero, and the sum is still divided by the
//! nominal `scale²`. With that policy
//! `Σ reduced · scale² = Σ full` holds exactly in real arithmetic for every
//! scale, dividing or not.

use crate::grid::{Cell, GridCoord, GridDims, CHANNELS};

/// Mean of the block of `src` (row-major, `src_dims`) reduced into `dst`.
#[must_use]
pub fn block_mean(src: &[Cell], src_dims: GridDims, dst: GridCoord, scale: u32) -> Cell {
    let x0 = dst.x.saturating_mul(scale);
    let y0 = dst.y.saturating_mul(scale);
    let x1 = x0.saturating_add(scale).min(src_dims.width);
    let y1 = y0.saturating_add(scale).min(src_dims.height);

    let mut acc = [0.0f64; CHANNELS];
    for y in y0..y1 {
        let row = y as usize * src_dims.width as usize;
        for x in x0..x1 {
            if let Some(cell) = src.get(row + x as usize) {
                for (a, v) in acc.iter_mut().zip(cell) {
                    *a += v;
                }
            }
        }
    }

    let area = f64::from(scale) * f64::from(scale);
    acc.map(|a| a / area)
}
