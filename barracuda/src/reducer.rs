// SPDX-License-Identifier: AGPL-3.0-only

//! Host reducer: read-back grid → four channel totals.
//!
//! Two equivalent policies:
//!
//! | Policy | Input grid | Total |
//! |--------|------------|-------|
//! | `Direct` | compute grid | Σ cells |
//! | `Decimated { scale }` | reduced grid of block means | Σ means · scale² |
//!
//! Both agree within [`crate::tolerances::REDUCTION_EQUIVALENCE_ABS`].
//!
//! Summation is split into fixed chunks summed in parallel; chunk partials
//! are combined in chunk order, so the result is bitwise identical from run
//! to run whatever the thread count.

use crate::error::PiSpringError;
use crate::grid::{Cell, HostGrid};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Add;

/// Cells per parallel partial sum.
pub const SUM_CHUNK: usize = 1024;

/// Totals of the four BBP sub-series.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelSums {
    pub s1: f64,
    pub s4: f64,
    pub s5: f64,
    pub s6: f64,
}

impl ChannelSums {
    pub const ZERO: Self = Self::from_array([0.0; 4]);

    /// Build from channel order (S1, S4, S5, S6).
    #[must_use]
    pub const fn from_array(c: Cell) -> Self {
        Self {
            s1: c[0],
            s4: c[1],
            s5: c[2],
            s6: c[3],
        }
    }

    #[must_use]
    pub const fn as_array(&self) -> Cell {
        [self.s1, self.s4, self.s5, self.s6]
    }

    /// Every channel multiplied by `factor`.
    #[must_use]
    pub fn scaled(self, factor: f64) -> Self {
        Self::from_array(self.as_array().map(|v| v * factor))
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.as_array().iter().all(|v| v.is_finite())
    }

    /// Largest per-channel absolute difference.
    #[must_use]
    pub fn max_abs_diff(&self, other: &Self) -> f64 {
        self.as_array()
            .iter()
            .zip(other.as_array())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

impl Add for ChannelSums {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        let (a, b) = (self.as_array(), rhs.as_array());
        Self::from_array([a[0] + b[0], a[1] + b[1], a[2] + b[2], a[3] + b[3]])
    }
}

/// How the read-back grid is turned into totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReductionPolicy {
    /// Sum every cell of the full compute grid.
    Direct,
    /// Sum the block means of a reduced grid, then multiply by `scale²` once.
    Decimated { scale: u32 },
}

impl ReductionPolicy {
    /// `scale == 1` degenerates to [`ReductionPolicy::Direct`].
    ///
    /// # Errors
    ///
    /// Returns [`PiSpringError::InvalidArgument`] for a zero scale.
    pub fn from_scale(scale: u32) -> Result<Self, PiSpringError> {
        match scale {
            0 => Err(PiSpringError::invalid("reduction scale must be at least 1")),
            1 => Ok(Self::Direct),
            scale => Ok(Self::Decimated { scale }),
        }
    }

    /// Block edge of the reduction pass (1 for `Direct`).
    #[must_use]
    pub const fn scale(&self) -> u32 {
        match self {
            Self::Direct => 1,
            Self::Decimated { scale } => *scale,
        }
    }
}

fn chunk_sum(chunk_index: usize, chunk: &[Cell]) -> Result<Cell, PiSpringError> {
    let mut acc = [0.0f64; 4];
    for (i, cell) in chunk.iter().enumerate() {
        for (ch, (a, v)) in acc.iter_mut().zip(cell).enumerate() {
            if !v.is_finite() {
                return Err(PiSpringError::NumericDivergence {
                    stage: "host reduction",
                    detail: format!("cell {} channel {ch} = {v}", chunk_index * SUM_CHUNK + i),
                });
            }
            *a += v;
        }
    }
    Ok(acc)
}

/// Sum every cell of `grid` channel-wise.
///
/// # Errors
///
/// Returns [`PiSpringError::NumericDivergence`] at the first NaN/Inf.
pub fn sum_cells(grid: &HostGrid) -> Result<ChannelSums, PiSpringError> {
    let partials: Vec<Cell> = grid
        .cells()
        .par_chunks(SUM_CHUNK)
        .enumerate()
        .map(|(i, chunk)| chunk_sum(i, chunk))
        .collect::<Result<_, _>>()?;
    Ok(partials
        .into_iter()
        .map(ChannelSums::from_array)
        .fold(ChannelSums::ZERO, Add::add))
}

/// Totals of a read-back grid under `policy`.
///
/// For `Decimated`, `grid` must be the reduced grid produced with the same
/// scale.
///
/// # Errors
///
/// Returns [`PiSpringError::NumericDivergence`] on a non-finite cell or
/// total, [`PiSpringError::InvalidArgument`] for a zero scale.
pub fn reduce(grid: &HostGrid, policy: ReductionPolicy) -> Result<ChannelSums, PiSpringError> {
    let sums = match policy {
        ReductionPolicy::Direct => sum_cells(grid)?,
        ReductionPolicy::Decimated { scale } => {
            if scale == 0 {
                return Err(PiSpringError::invalid("reduction scale must be at least 1"));
            }
            let block = f64::from(scale) * f64::from(scale);
            sum_cells(grid)?.scaled(block)
        }
    };
    if !sums.is_finite() {
        return Err(PiSpringError::NumericDivergence {
            stage: "host reduction",
            detail: format!("totals overflowed: {:?}", sums.as_array()),
        });
    }
    Ok(sums)
}
