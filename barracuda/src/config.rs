// SPDX-License-Identifier: AGPL-3.0-only

//! Run configuration for one digit computation.
//!
//! Everything is validated up front by [`DigitConfig::validate`] so that a
//! bad argument is rejected before any buffer is allocated.

use crate::error::PiSpringError;
use crate::grid::{check_dims, check_position, GridDims};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default downsample scale applied before read-back.
pub const DEFAULT_SCALE: u32 = 16;

/// Environment variable consulted by [`BackendChoice::from_env`].
pub const BACKEND_ENV: &str = "PISPRING_BACKEND";

/// Which compute backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// Best capable substrate: GPU if present, otherwise CPU.
    #[default]
    Auto,
    /// wgpu compute; fails with `BackendUnavailable` when no adapter qualifies.
    Gpu,
    /// Native rayon threads.
    Cpu,
}

impl BackendChoice {
    /// Read `PISPRING_BACKEND`; unset means [`BackendChoice::Auto`].
    ///
    /// # Errors
    ///
    /// Returns [`PiSpringError::InvalidArgument`] for an unrecognized value.
    pub fn from_env() -> Result<Self, PiSpringError> {
        match std::env::var(BACKEND_ENV) {
            Ok(v) if !v.trim().is_empty() => v.parse(),
            _ => Ok(Self::Auto),
        }
    }
}

impl FromStr for BackendChoice {
    type Err = PiSpringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "gpu" => Ok(Self::Gpu),
            "cpu" => Ok(Self::Cpu),
            other => Err(PiSpringError::invalid(format!(
                "unknown backend '{other}' (expected auto, gpu or cpu)"
            ))),
        }
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Gpu => "gpu",
            Self::Cpu => "cpu",
        })
    }
}

/// Parameters of a single digit computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitConfig {
    /// 0-indexed hex digit position after the point.
    pub position: u64,
    /// Downsample scale; `None` means [`DEFAULT_SCALE`] clamped to the grid.
    pub scale: Option<u32>,
    /// Explicit square grid side; `None` sizes the grid from the position.
    pub grid_side: Option<u32>,
    /// Host-side terms past the position added before extraction.
    pub tail_terms: u32,
}

/// A [`DigitConfig`] after validation: concrete grid and scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub position: u64,
    pub grid: GridDims,
    pub scale: u32,
    pub tail_terms: u32,
}

impl DigitConfig {
    /// Configuration for `position` with every option at its default.
    #[must_use]
    pub const fn new(position: u64) -> Self {
        Self {
            position,
            scale: None,
            grid_side: None,
            tail_terms: 0,
        }
    }

    #[must_use]
    pub const fn with_scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    #[must_use]
    pub const fn with_grid_side(mut self, side: u32) -> Self {
        self.grid_side = Some(side);
        self
    }

    #[must_use]
    pub const fn with_tail_terms(mut self, terms: u32) -> Self {
        self.tail_terms = terms;
        self
    }

    /// Resolve the grid and scale, rejecting anything invalid.
    ///
    /// # Errors
    ///
    /// Returns [`PiSpringError::InvalidArgument`] when the position is out of
    /// range, an explicit grid is empty, too large or does not cover every
    /// term, or an explicit scale is zero or larger than the grid.
    pub fn validate(&self) -> Result<Plan, PiSpringError> {
        check_position(self.position)?;
        let grid = match self.grid_side {
            Some(side) => {
                let dims = GridDims::square(side);
                check_dims(dims)?;
                if !dims.covers_position(self.position) {
                    return Err(PiSpringError::invalid(format!(
                        "grid {dims} cannot hold {} terms",
                        self.position + 1
                    )));
                }
                dims
            }
            None => GridDims::for_position(self.position)?,
        };
        let scale = match self.scale {
            Some(s) => {
                grid.reduced(s)?;
                s
            }
            None => DEFAULT_SCALE.min(grid.max_side()),
        };
        Ok(Plan {
            position: self.position,
            grid,
            scale,
            tail_terms: self.tail_terms,
        })
    }
}
