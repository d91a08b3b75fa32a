// SPDX-License-Identifier: AGPL-3.0-only

#![deny(clippy::expect_used, clippy::unwrap_used)]

//! piSpring Forge: which device on this machine runs the digit pipeline.
//!
//! Before the digit engine allocates a grid it asks forge for a substrate
//! that can dispatch a 2D term grid, block-reduce it and read it back, and
//! whose limits hold the grid for the requested position. If no substrate
//! qualifies, the engine stops with `BackendUnavailable`.
//!
//! ```text
//!   probe       wgpu adapters + /proc/cpuinfo, /proc/meminfo
//!     │ Vec<Substrate>
//!   inventory   GPUs in enumeration order, then the CPU
//!     │ &[Substrate]
//!   dispatch    Workload (capabilities, grid side) → Decision
//! ```

pub mod dispatch;
pub mod inventory;
pub mod probe;
pub mod substrate;
