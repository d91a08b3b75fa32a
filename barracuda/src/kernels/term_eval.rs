// SPDX-License-Identifier: AGPL-3.0-only

//! Host reference of the term-evaluation kernel.
//!
//! Term `k` contributes to the four sub-series `S_j = Σ 16^(n-k) / (8k + j)`
//! for `j ∈ {1, 4, 5, 6}`. Only the fractional part of each sum matters, so
//! for `k < n` the numerator is reduced modulo the denominator first:
//!
//! ```text
//!   k < n :  (16^(n-k) mod (8k+j)) / (8k+j)
//!   k = n :  1 / (8k+j)
//!   k > n :  0                      (grid padding)
//! ```
//!
//! The CPU backend runs these functions directly; the WGSL kernel
//! `term_eval_f32.wgsl` mirrors them in 32-bit integer arithmetic.

use crate::grid::{Cell, GridCoord, GridDims, CHANNEL_OFFSETS};

/// `a * b mod m` without overflow.
#[inline]
const fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    ((a as u128 * b as u128) % m as u128) as u64
}

/// `16^exp mod modulus` by square-and-multiply.
///
/// `modulus == 1` yields 0. `modulus` must be non-zero.
#[must_use]
pub const fn pow16_mod(mut exp: u64, modulus: u64) -> u64 {
    if modulus == 1 {
        return 0;
    }
    let mut base = 16 % modulus;
    let mut acc = 1;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = mul_mod(acc, base, modulus);
        }
        base = mul_mod(base, base, modulus);
        exp >>= 1;
    }
    acc
}

/// Contribution of term `k` to `S_j` for digit position `n`, any `k`.
///
/// Terms with `k > n` are the exponentially small tail `16^(n-k) / (8k+j)`;
/// the grid never evaluates them, but the engine's optional tail does.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn term(n: u64, k: u64, j: u64) -> f64 {
    let denom = 8 * k + j;
    match k.cmp(&n) {
        std::cmp::Ordering::Less => pow16_mod(n - k, denom) as f64 / denom as f64,
        std::cmp::Ordering::Equal => 1.0 / denom as f64,
        std::cmp::Ordering::Greater => {
            let shift = (k - n).saturating_mul(4).min(i32::MAX as u64);
            #[allow(clippy::cast_possible_truncation)]
            let scale = 2f64.powi(-(shift as i32));
            scale / denom as f64
        }
    }
}

/// The four-channel vector of term `k`; zero when `k > n`.
#[must_use]
pub fn evaluate_terms(k: u64, n: u64) -> Cell {
    if k > n {
        return [0.0; 4];
    }
    CHANNEL_OFFSETS.map(|j| term(n, k, j))
}

/// Evaluate the cell at `coord` of a `dims` grid for digit position `n`.
#[must_use]
pub fn evaluate_cell(coord: GridCoord, dims: GridDims, n: u64) -> Cell {
    evaluate_terms(dims.term_index(coord), n)
}
