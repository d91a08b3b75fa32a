// SPDX-License-Identifier: AGPL-3.0-only

//! Centralized validation tolerances for the digit pipeline.
//!
//! Every threshold used by tests and validation binaries is defined here
//! with its origin. No ad-hoc magic numbers.
//!
//! | Category | Basis | Example |
//! |----------|-------|---------|
//! | Reduction | f64 reassociation over block means | 1e-3 equivalence |
//! | Reference | recorded term array | 1e-3 per element |
//! | Device | f32 storage on the GPU | 1e-6 per cell |
//! | Routing | f32 error growth vs. one digit step | n ≤ 2500 on the GPU |

// ═══════════════════════════════════════════════════════════════════
// Host reduction
// ═══════════════════════════════════════════════════════════════════

/// Direct vs. decimated channel totals.
///
/// Both policies sum the same values in a different order and the
/// decimated one multiplies by `scale²`; at n = 1600 the observed f64
/// difference is below 1e-10, so 1e-3 leaves room for f32 device grids.
pub const REDUCTION_EQUIVALENCE_ABS: f64 = 1e-3;

/// Per-element agreement with the recorded n = 1600 term array.
///
/// The reference was produced in f64 by the same formula; the bound is the
/// acceptance threshold for any backend, including f32 device storage.
pub const REFERENCE_TERM_ABS: f64 = 1e-3;

/// Padding invariance: totals of the same terms on grids of different side.
///
/// Padding cells are exactly zero, so only summation order changes.
pub const PADDING_INVARIANCE_ABS: f64 = 1e-9;

// ═══════════════════════════════════════════════════════════════════
// GPU (f32 storage) vs. CPU (f64)
// ═══════════════════════════════════════════════════════════════════

/// One grid cell computed on the GPU vs. the host reference.
///
/// Term values lie in [0, 1); a single f32 rounding is below 6e-8.
pub const GPU_VS_CPU_CELL_ABS: f64 = 1e-6;

/// Channel totals from the GPU vs. the CPU backend at n = 1600.
///
/// ~1600 f32 roundings per channel plus f32 accumulation inside each
/// 16×16 block mean; observed worst case is a few 1e-4.
pub const GPU_VS_CPU_SUM_ABS: f64 = 1e-2;

// ═══════════════════════════════════════════════════════════════════
// f32 GPU position limit
// ═══════════════════════════════════════════════════════════════════

/// Error allowed in the raw combination `4·S1 − 2·S4 − S5 − S6` computed
/// from f32 device grids: 1/4096, 256 times smaller than one digit step
/// (1/16). A digit is misread only when the exact fraction lies within
/// this distance of a step boundary, which happens for under 1% of
/// positions.
pub const GPU_RAW_ERROR_BUDGET: f64 = 1.0 / 4096.0;

/// Growth rate of the f32 raw-sum error per `√(n + 1)`.
///
/// Each term carries one f32 storage rounding (≤ 2^-24) and the 16×16 f32
/// block sum adds about 16 more per term. The channel weights (4, 2, 1, 1)
/// contribute `√22`. Independent roundings add in quadrature:
/// `17 · 2^-24 · √22 ≈ 4.75e-6`.
pub const GPU_ERROR_PER_SQRT_TERM: f64 = 4.75e-6;

/// Largest digit position routed to the f32 GPU kernels.
///
/// Chosen so that [`gpu_raw_error_estimate`] stays within
/// [`GPU_RAW_ERROR_BUDGET`]. Larger positions run on the CPU backend.
pub const GPU_MAX_DIGIT_POSITION: u64 = 2_500;

/// Expected raw-sum error of the f32 GPU path at position `n`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn gpu_raw_error_estimate(n: u64) -> f64 {
    GPU_ERROR_PER_SQRT_TERM * ((n + 1) as f64).sqrt()
}
