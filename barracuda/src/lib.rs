// SPDX-License-Identifier: AGPL-3.0-only

//! piSpring — hexadecimal digits of π by parallel BBP term grids.
//!
//! Computes the Nth hex digit of π directly, without the digits before it,
//! by evaluating every term of the Bailey–Borwein–Plouffe sum in its own
//! grid cell on a parallel backend (wgpu compute or rayon threads), then
//! reducing the grid and combining four channel totals into one digit.
//!
//! ## Modules
//!   - `grid`: grid sizing, term ↔ cell mapping, host grid view
//!   - `kernels`: WGSL programs and their pure host counterparts
//!   - `backend`: compute-backend contract, CPU backend, backend routing
//!   - `gpu`: wgpu backend (adapter selection, buffers, dispatch)
//!   - `reducer`: deterministic channel totals, direct or decimated
//!   - `digit`: BBP combination and hex digit extraction
//!   - `engine`: end-to-end orchestration
//!   - `config`, `error`, `logging`: run options, typed errors, tracing
//!   - `tolerances`, `provenance`, `validation`: reference checks
//!
//! ## Binaries
//!   - `pispring`: compute a digit, list substrates
//!   - `validate_bbp`: digit, reduction and reference-grid validation

#![deny(clippy::expect_used, clippy::unwrap_used)]

pub mod backend;
pub mod config;
pub mod digit;
pub mod engine;
pub mod error;
pub mod gpu;
pub mod grid;
pub mod kernels;
pub mod logging;
pub mod provenance;
pub mod reducer;
pub mod tolerances;
pub mod validation;

pub use config::{BackendChoice, DigitConfig};
pub use digit::HexDigit;
pub use engine::{DigitEngine, DigitResult};
pub use error::PiSpringError;
pub use reducer::{ChannelSums, ReductionPolicy};
