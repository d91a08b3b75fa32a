// SPDX-License-Identifier: AGPL-3.0-only

//! Typed errors for the digit pipeline.
//!
//! Callers pattern-match on the failure mode (bad argument, numeric
//! divergence, missing backend) rather than parsing opaque strings. None of
//! these are retried: an error always propagates instead of yielding a digit.

use std::path::PathBuf;
use thiserror::Error;

/// Errors arising from argument validation, kernel execution, or backends.
#[derive(Debug, Error)]
pub enum PiSpringError {
    /// Rejected before any dispatch: bad position, scale, or grid shape.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A kernel or the final combination produced NaN or infinity.
    #[error("numeric divergence in {stage}: {detail}")]
    NumericDivergence {
        /// Pipeline stage that observed the value.
        stage: &'static str,
        /// Location and value of the first offending element.
        detail: String,
    },

    /// No substrate offers the compute capability the request needs.
    #[error("compute backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A backend could not reserve memory for a grid.
    #[error("grid allocation failed: {0}")]
    Allocation(String),

    /// GPU device creation failed (wraps the underlying wgpu error message).
    #[error("failed to create GPU device: {0}")]
    DeviceCreation(String),

    /// Buffer mapping or queue submission failed after the device was up.
    #[error("GPU compute failed: {0}")]
    GpuCompute(String),

    /// A kernel source file could not be read.
    #[error("failed to read kernel source '{path}'")]
    KernelSource {
        /// The path that could not be read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The backend rejected a kernel program.
    #[error("kernel '{kernel}' failed to compile: {message}")]
    KernelCompile {
        /// Kernel name, e.g. `"term-evaluation"`.
        kernel: &'static str,
        /// Validation message from the backend.
        message: String,
    },
}

impl PiSpringError {
    /// Shorthand for [`PiSpringError::InvalidArgument`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Whether this error is a fatal numerical defect.
    #[must_use]
    pub const fn is_divergence(&self) -> bool {
        matches!(self, Self::NumericDivergence { .. })
    }
}
